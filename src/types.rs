use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_MESSAGE_CHARS: usize = 2_000;
pub const MAX_PROOF_DOCUMENTS: usize = 3;
pub const MAX_EXTRA_PROOF_IMAGES: usize = 2;
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

pub const CLAIM_WINDOW_HOURS: i64 = 1;
pub const MAX_CLAIMS_PER_WINDOW: usize = 3;

pub type UserId = Uuid;
pub type ItemId = Uuid;
pub type ConversationId = Uuid;
pub type MessageId = Uuid;
pub type ClaimId = Uuid;

/// Authenticated caller, produced by the principal resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Active,
    PendingReturn,
    Returned,
    Removed,
}

/// Snapshot of a listing owned by the external item collaborator. This core
/// only reads owner/status and flips status on claim transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub owner_id: UserId,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStats {
    pub items_returned: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub item_id: ItemId,
    /// Sorted, deduped; a single entry in the self-chat case.
    pub participant_ids: Vec<UserId>,
    pub messages: Vec<ChatMessage>,
    pub last_activity_at: DateTime<Utc>,
    pub active: bool,
}

impl Conversation {
    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.participant_ids.contains(user_id)
    }
}

/// Reduced shape for the conversation list view: shell plus latest message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub item_id: ItemId,
    pub participant_ids: Vec<UserId>,
    pub last_activity_at: DateTime<Utc>,
    pub last_message: ChatMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdDocumentType {
    NationalId,
    TaxId,
    DriverLicense,
    Passport,
    VoterId,
}

impl IdDocumentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "national-id" => Some(Self::NationalId),
            "tax-id" => Some(Self::TaxId),
            "driver-license" => Some(Self::DriverLicense),
            "passport" => Some(Self::Passport),
            "voter-id" => Some(Self::VoterId),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationInfo {
    pub full_name: String,
    pub phone_number: String,
    pub id_document_type: IdDocumentType,
    pub id_number: String,
    pub ownership_details: String,
    pub additional_proof: Option<String>,
}

/// Reference into the external blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionedFile {
    pub path: String,
    pub caption: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Approved,
    Rejected,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub decision: ReviewDecision,
    pub notes: String,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoverRecord {
    pub confirmed_by_owner: bool,
    pub confirmed_by_claimant: bool,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: ClaimId,
    pub item_id: ItemId,
    pub claimant_id: UserId,
    /// Owner at submission time; later ownership changes do not retarget the
    /// review or handover capability.
    pub item_owner_id: UserId,
    pub verification: VerificationInfo,
    pub proof_documents: Vec<StoredFile>,
    pub extra_proof_images: Vec<CaptionedFile>,
    pub status: ClaimStatus,
    pub review: Option<ReviewRecord>,
    pub handover: Option<HandoverRecord>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request-scoped audit capture, stored on the claim, never exposed to
/// non-admin readers.
#[derive(Debug, Clone, Default)]
pub struct AuditInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Non-admin read view of a claim: audit fields absent by construction,
/// phone/id reduced to last-4 masks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedClaim {
    pub id: ClaimId,
    pub item_id: ItemId,
    pub claimant_id: UserId,
    pub item_owner_id: UserId,
    pub verification: MaskedVerification,
    pub proof_documents: Vec<StoredFile>,
    pub extra_proof_images: Vec<CaptionedFile>,
    pub status: ClaimStatus,
    pub review: Option<ReviewRecord>,
    pub handover: Option<HandoverRecord>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedVerification {
    pub full_name: String,
    pub phone_number: String,
    pub id_document_type: IdDocumentType,
    pub id_number: String,
    pub ownership_details: String,
    pub additional_proof: Option<String>,
}

/// Keeps the real last four characters, stars the rest. Inputs of four or
/// fewer characters are fully starred.
pub fn mask_last4(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

impl Claim {
    pub fn masked(&self) -> MaskedClaim {
        MaskedClaim {
            id: self.id,
            item_id: self.item_id,
            claimant_id: self.claimant_id,
            item_owner_id: self.item_owner_id,
            verification: MaskedVerification {
                full_name: self.verification.full_name.clone(),
                phone_number: mask_last4(&self.verification.phone_number),
                id_document_type: self.verification.id_document_type,
                id_number: mask_last4(&self.verification.id_number),
                ownership_details: self.verification.ownership_details.clone(),
                additional_proof: self.verification.additional_proof.clone(),
            },
            proof_documents: self.proof_documents.clone(),
            extra_proof_images: self.extra_proof_images.clone(),
            status: self.status,
            review: self.review.clone(),
            handover: self.handover.clone(),
            created_at: self.created_at,
        }
    }
}
