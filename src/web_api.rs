use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Multipart, Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::PrincipalResolver;
use crate::chat;
use crate::claims;
use crate::errors::ServiceError;
use crate::files::FileStore;
use crate::realtime::{handle_socket, Gateway, ServerEvent};
use crate::state::ServiceState;
use crate::types::*;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Mutex<ServiceState>>,
    pub gateway: Arc<Gateway>,
    pub resolver: Arc<dyn PrincipalResolver>,
    pub files: Arc<dyn FileStore>,
}

impl AppState {
    pub fn new(
        service: ServiceState,
        resolver: Arc<dyn PrincipalResolver>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            gateway: Arc::new(Gateway::new()),
            resolver,
            files,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    code: u16,
    message: String,
}

fn error_to_http(err: ServiceError) -> Response {
    let status = match &err {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
        ServiceError::ItemNotFound
        | ServiceError::ConversationNotFound
        | ServiceError::MessageNotFound
        | ServiceError::ClaimNotFound => StatusCode::NOT_FOUND,
        ServiceError::NotParticipant
        | ServiceError::NotMessageSender
        | ServiceError::Forbidden
        | ServiceError::OwnClaimForbidden => StatusCode::FORBIDDEN,
        ServiceError::InvalidState(_)
        | ServiceError::ItemNotClaimable
        | ServiceError::ClaimAlreadyExists => StatusCode::CONFLICT,
        ServiceError::TooManyClaims => StatusCode::TOO_MANY_REQUESTS,
    };
    (
        status,
        Json(ErrorBody {
            ok: false,
            code: err.code(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, ServiceError> {
    let token = bearer_token(headers).ok_or(ServiceError::Unauthorized)?;
    state.resolver.resolve(token)
}

fn audit_from_headers(headers: &HeaderMap) -> AuditInfo {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    AuditInfo {
        ip_address,
        user_agent,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    product: &'static str,
    connections: usize,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        product: "findback",
        connections: state.gateway.connection_count(),
    })
}

// ---- chat ----

#[derive(Deserialize)]
struct PostMessageRequest {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageResponse {
    ok: bool,
    chat_id: ConversationId,
    message: ChatMessage,
}

async fn get_chat_by_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<ItemId>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let mut s = state.service.lock().expect("state lock");
    let conversation_id = match chat::get_or_create(&mut s, item_id, principal.user_id, Utc::now())
    {
        Ok(id) => id,
        Err(e) => return error_to_http(e),
    };
    match chat::conversation_for(&s, conversation_id, principal.user_id) {
        Ok(conv) => (StatusCode::OK, Json(conv)).into_response(),
        Err(e) => error_to_http(e),
    }
}

async fn get_chat_by_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let s = state.service.lock().expect("state lock");
    match chat::conversation_for(&s, id, principal.user_id) {
        Ok(conv) => (StatusCode::OK, Json(conv)).into_response(),
        Err(e) => error_to_http(e),
    }
}

async fn post_chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<ItemId>,
    Json(req): Json<PostMessageRequest>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let posted = {
        let mut s = state.service.lock().expect("state lock");
        match chat::post_message(&mut s, item_id, principal.user_id, &req.content, Utc::now()) {
            Ok(p) => p,
            Err(e) => return error_to_http(e),
        }
    };

    // Push to the peer's personal room. Fan-out failure never rolls back the
    // persisted message; the store is authoritative.
    let event = ServerEvent::NewMessage {
        item_id,
        chat_id: posted.conversation_id,
        message: posted.message.clone(),
    };
    for recipient in &posted.recipients {
        state.gateway.notify_user(recipient, &event);
    }

    (
        StatusCode::CREATED,
        Json(PostMessageResponse {
            ok: true,
            chat_id: posted.conversation_id,
            message: posted.message,
        }),
    )
        .into_response()
}

async fn mark_chat_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let mut s = state.service.lock().expect("state lock");
    match chat::mark_read(&mut s, id, principal.user_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_to_http(e),
    }
}

async fn clear_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let mut s = state.service.lock().expect("state lock");
    match chat::clear(&mut s, id, principal.user_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_to_http(e),
    }
}

async fn edit_chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, message_id)): Path<(ConversationId, MessageId)>,
    Json(req): Json<PostMessageRequest>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let mut s = state.service.lock().expect("state lock");
    match chat::edit_message(&mut s, id, message_id, principal.user_id, &req.content, Utc::now()) {
        Ok(message) => (StatusCode::OK, Json(message)).into_response(),
        Err(e) => error_to_http(e),
    }
}

async fn delete_chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, message_id)): Path<(ConversationId, MessageId)>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let mut s = state.service.lock().expect("state lock");
    match chat::delete_message(&mut s, id, message_id, principal.user_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_to_http(e),
    }
}

async fn list_user_conversations(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let s = state.service.lock().expect("state lock");
    let summaries = chat::list_for_user(&s, principal.user_id);
    (StatusCode::OK, Json(summaries)).into_response()
}

// ---- claims ----

struct ClaimUpload {
    item_id: Option<ItemId>,
    full_name: Option<String>,
    phone_number: Option<String>,
    id_document_type: Option<IdDocumentType>,
    id_number: Option<String>,
    ownership_details: Option<String>,
    additional_proof: Option<String>,
    proof_documents: Vec<StoredFile>,
    extra_proof_files: Vec<StoredFile>,
    extra_proof_captions: Vec<String>,
}

async fn read_claim_multipart(
    files: &Arc<dyn FileStore>,
    mut multipart: Multipart,
) -> Result<ClaimUpload, ServiceError> {
    let mut upload = ClaimUpload {
        item_id: None,
        full_name: None,
        phone_number: None,
        id_document_type: None,
        id_number: None,
        ownership_details: None,
        additional_proof: None,
        proof_documents: Vec::new(),
        extra_proof_files: Vec::new(),
        extra_proof_captions: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ServiceError::Validation("malformed multipart body"))?
    {
        let Some(name) = field.name().map(|n| n.to_string()) else {
            continue;
        };
        match name.as_str() {
            "itemId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ServiceError::Validation("invalid itemId field"))?;
                upload.item_id =
                    Some(text.parse().map_err(|_| ServiceError::Validation("invalid itemId"))?);
            }
            "fullName" => upload.full_name = Some(read_text(field).await?),
            "phoneNumber" => upload.phone_number = Some(read_text(field).await?),
            "idDocumentType" => {
                let text = read_text(field).await?;
                upload.id_document_type = Some(
                    IdDocumentType::parse(&text)
                        .ok_or(ServiceError::Validation("unknown id document type"))?,
                );
            }
            "idNumber" => upload.id_number = Some(read_text(field).await?),
            "ownershipDetails" => upload.ownership_details = Some(read_text(field).await?),
            "additionalProof" => upload.additional_proof = Some(read_text(field).await?),
            "proofDocuments" => {
                if upload.proof_documents.len() >= MAX_PROOF_DOCUMENTS {
                    return Err(ServiceError::Validation("too many proof documents"));
                }
                upload.proof_documents.push(store_file(files, field).await?);
            }
            "extraProofImages" => {
                if upload.extra_proof_files.len() >= MAX_EXTRA_PROOF_IMAGES {
                    return Err(ServiceError::Validation("too many extra proof images"));
                }
                upload.extra_proof_files.push(store_file(files, field).await?);
            }
            "extraProofCaptions" => upload.extra_proof_captions.push(read_text(field).await?),
            _ => {}
        }
    }
    Ok(upload)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ServiceError> {
    field
        .text()
        .await
        .map_err(|_| ServiceError::Validation("invalid text field"))
}

async fn store_file(
    files: &Arc<dyn FileStore>,
    field: axum::extract::multipart::Field<'_>,
) -> Result<StoredFile, ServiceError> {
    let filename = field.file_name().unwrap_or("file").to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|_| ServiceError::Validation("unreadable file field"))?;
    let path = files.store(&filename, &bytes)?;
    Ok(StoredFile { path })
}

async fn submit_claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let upload = match read_claim_multipart(&state.files, multipart).await {
        Ok(u) => u,
        Err(e) => return error_to_http(e),
    };

    let (Some(item_id), Some(full_name), Some(phone_number), Some(id_document_type), Some(id_number), Some(ownership_details)) = (
        upload.item_id,
        upload.full_name,
        upload.phone_number,
        upload.id_document_type,
        upload.id_number,
        upload.ownership_details,
    ) else {
        return error_to_http(ServiceError::Validation("missing verification fields"));
    };

    // Captions pair with extra images by position; a missing caption is an
    // empty string, a surplus caption is a validation failure.
    if upload.extra_proof_captions.len() > upload.extra_proof_files.len() {
        return error_to_http(ServiceError::Validation("caption without matching image"));
    }
    let extra_proof_images: Vec<CaptionedFile> = upload
        .extra_proof_files
        .into_iter()
        .enumerate()
        .map(|(i, f)| CaptionedFile {
            path: f.path,
            caption: upload
                .extra_proof_captions
                .get(i)
                .cloned()
                .unwrap_or_default(),
        })
        .collect();

    let verification = VerificationInfo {
        full_name,
        phone_number,
        id_document_type,
        id_number,
        ownership_details,
        additional_proof: upload.additional_proof,
    };

    let mut s = state.service.lock().expect("state lock");
    match claims::submit(
        &mut s,
        item_id,
        principal.user_id,
        verification,
        upload.proof_documents,
        extra_proof_images,
        audit_from_headers(&headers),
        Utc::now(),
    ) {
        Ok(claim) => (StatusCode::CREATED, Json(claim.masked())).into_response(),
        Err(e) => error_to_http(e),
    }
}

async fn my_claims(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let s = state.service.lock().expect("state lock");
    (
        StatusCode::OK,
        Json(claims::claims_by_claimant(&s, principal.user_id)),
    )
        .into_response()
}

async fn pending_review(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let s = state.service.lock().expect("state lock");
    (
        StatusCode::OK,
        Json(claims::claims_pending_review(&s, principal.user_id)),
    )
        .into_response()
}

async fn claims_for_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<ItemId>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let s = state.service.lock().expect("state lock");
    match claims::claims_for_item(&s, item_id, principal.user_id) {
        Ok(list) => (StatusCode::OK, Json(list)).into_response(),
        Err(e) => error_to_http(e),
    }
}

async fn claim_by_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ClaimId>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let s = state.service.lock().expect("state lock");
    match claims::claim_view(&s, id, principal.user_id) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_to_http(e),
    }
}

#[derive(Deserialize)]
struct ReviewRequest {
    decision: ReviewDecision,
    notes: Option<String>,
}

async fn review_claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ClaimId>,
    Json(req): Json<ReviewRequest>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let mut s = state.service.lock().expect("state lock");
    match claims::review(
        &mut s,
        id,
        principal.user_id,
        req.decision,
        req.notes.unwrap_or_default(),
        Utc::now(),
    ) {
        Ok(claim) => (StatusCode::OK, Json(claim.masked())).into_response(),
        Err(e) => error_to_http(e),
    }
}

#[derive(Deserialize)]
struct HandoverRequest {
    location: Option<String>,
    notes: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HandoverResponse {
    ok: bool,
    resolved: bool,
    claim: MaskedClaim,
}

async fn complete_handover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ClaimId>,
    Json(req): Json<HandoverRequest>,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let mut s = state.service.lock().expect("state lock");
    match claims::confirm_handover(
        &mut s,
        id,
        principal.user_id,
        req.location,
        req.notes,
        Utc::now(),
    ) {
        Ok(outcome) => (
            StatusCode::OK,
            Json(HandoverResponse {
                ok: true,
                resolved: outcome.resolved_now,
                claim: outcome.claim.masked(),
            }),
        )
            .into_response(),
        Err(e) => error_to_http(e),
    }
}

#[derive(Serialize)]
struct ReturnsCountResponse {
    ok: bool,
    count: u64,
}

async fn successful_returns_count(State(state): State<AppState>) -> Response {
    let s = state.service.lock().expect("state lock");
    (
        StatusCode::OK,
        Json(ReturnsCountResponse {
            ok: true,
            count: claims::successful_returns_count(&s),
        }),
    )
        .into_response()
}

// ---- realtime ----

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Same principal-resolution contract as HTTP; failure refuses the
    // connection before the upgrade completes.
    let principal = match state.resolver.resolve(&q.token) {
        Ok(p) => p,
        Err(e) => return error_to_http(e),
    };
    let service = state.service.clone();
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, principal, service, gateway))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .route("/chat/user/conversations", get(list_user_conversations))
        .route("/chat/byid/{id}", get(get_chat_by_id))
        .route("/chat/{id}", get(get_chat_by_item).post(post_chat_message))
        .route("/chat/{id}/read", put(mark_chat_read))
        .route("/chat/{id}/messages", delete(clear_chat))
        .route(
            "/chat/{id}/messages/{message_id}",
            put(edit_chat_message).delete(delete_chat_message),
        )
        .route("/claims", post(submit_claim))
        .route("/claims/my-claims", get(my_claims))
        .route("/claims/pending-review", get(pending_review))
        .route("/claims/successful-returns-count", get(successful_returns_count))
        .route("/claims/item/{id}", get(claims_for_item))
        .route("/claims/{id}", get(claim_by_id))
        .route("/claims/{id}/review", put(review_claim))
        .route("/claims/{id}/complete-handover", put(complete_handover))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_http_server(addr: SocketAddr, state: AppState) {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind api listener");
    axum::serve(listener, build_router(state))
        .await
        .expect("run api server");
}
