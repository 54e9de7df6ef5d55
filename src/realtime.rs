use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat;
use crate::errors::ServiceError;
use crate::state::{conversation_key, ServiceState};
use crate::types::*;

pub type ConnectionId = Uuid;

/// Client -> server events on the duplex channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinItemChat { item_id: ItemId },
    LeaveItemChat { item_id: ItemId },
    SendMessage { item_id: ItemId, content: String },
    TypingStart { item_id: ItemId },
    TypingStop { item_id: ItemId },
    UpdateStatus { status: String },
}

/// Server -> client events. The shapes are part of the external contract:
/// a cross-instance fan-out layer must be able to forward them unchanged.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage {
        item_id: ItemId,
        chat_id: ConversationId,
        message: ChatMessage,
    },
    UserTyping {
        item_id: ItemId,
        user_id: UserId,
    },
    UserStopTyping {
        item_id: ItemId,
        user_id: UserId,
    },
    UserStatusUpdate {
        user_id: UserId,
        status: String,
        last_seen: Option<DateTime<Utc>>,
    },
    Error {
        code: u16,
        message: String,
    },
}

/// Deterministic chat-room key: item id plus the sorted participant pair.
/// Stable across instances so an external pub/sub layer can reuse it.
pub fn room_key(item_id: ItemId, participants: &[UserId]) -> String {
    let mut ids: Vec<String> = participants.iter().map(|u| u.to_string()).collect();
    ids.sort();
    format!("item:{}:{}", item_id, ids.join(":"))
}

struct ConnectionEntry {
    user_id: UserId,
    tx: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct GatewayInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    // Personal rooms: every live connection of a principal. Message delivery
    // targets these so it works whether or not the chat view is open.
    personal: HashMap<UserId, HashSet<ConnectionId>>,
    // Chat rooms: typing/presence scope only, never the delivery path.
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

/// Per-process connection and room registry. Membership is in-memory only;
/// the store stays authoritative and a dropped notification is recovered by
/// the client re-fetching.
#[derive(Default)]
pub struct Gateway {
    inner: Mutex<GatewayInner>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(
        &self,
        user_id: UserId,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionId {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().expect("gateway lock");
        inner.connections.insert(
            id,
            ConnectionEntry {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        inner.personal.entry(user_id).or_default().insert(id);
        id
    }

    pub fn disconnect(&self, connection_id: ConnectionId) -> Option<UserId> {
        let mut inner = self.inner.lock().expect("gateway lock");
        let entry = inner.connections.remove(&connection_id)?;
        if let Some(conns) = inner.personal.get_mut(&entry.user_id) {
            conns.remove(&connection_id);
            if conns.is_empty() {
                inner.personal.remove(&entry.user_id);
            }
        }
        for key in &entry.rooms {
            if let Some(members) = inner.rooms.get_mut(key) {
                members.remove(&connection_id);
                if members.is_empty() {
                    inner.rooms.remove(key);
                }
            }
        }
        Some(entry.user_id)
    }

    pub fn join_room(&self, connection_id: ConnectionId, key: &str) {
        let mut inner = self.inner.lock().expect("gateway lock");
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry.rooms.insert(key.to_string());
            inner
                .rooms
                .entry(key.to_string())
                .or_default()
                .insert(connection_id);
        }
    }

    pub fn leave_room(&self, connection_id: ConnectionId, key: &str) {
        let mut inner = self.inner.lock().expect("gateway lock");
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry.rooms.remove(key);
        }
        if let Some(members) = inner.rooms.get_mut(key) {
            members.remove(&connection_id);
            if members.is_empty() {
                inner.rooms.remove(key);
            }
        }
    }

    /// Delivers to every live connection in the user's personal room.
    pub fn notify_user(&self, user_id: &UserId, event: &ServerEvent) {
        let inner = self.inner.lock().expect("gateway lock");
        let Some(conns) = inner.personal.get(user_id) else {
            return;
        };
        for conn in conns {
            if let Some(entry) = inner.connections.get(conn) {
                // A full/closed channel means the connection is going away;
                // the store is authoritative, so the event is droppable.
                let _ = entry.tx.send(event.clone());
            }
        }
    }

    /// Room-scoped emit, excluding the originating connection.
    pub fn emit_room(&self, key: &str, except: ConnectionId, event: &ServerEvent) {
        let inner = self.inner.lock().expect("gateway lock");
        let Some(members) = inner.rooms.get(key) else {
            return;
        };
        for conn in members {
            if *conn == except {
                continue;
            }
            if let Some(entry) = inner.connections.get(conn) {
                let _ = entry.tx.send(event.clone());
            }
        }
    }

    /// Presence fan-out, narrowed to interested parties: the user's own
    /// connections and members of chat rooms any of those connections
    /// currently occupy.
    pub fn broadcast_presence(&self, user_id: &UserId, event: &ServerEvent) {
        let inner = self.inner.lock().expect("gateway lock");
        let mut targets: HashSet<ConnectionId> = HashSet::new();
        if let Some(own) = inner.personal.get(user_id) {
            for conn in own {
                targets.insert(*conn);
                if let Some(entry) = inner.connections.get(conn) {
                    for key in &entry.rooms {
                        if let Some(members) = inner.rooms.get(key) {
                            targets.extend(members.iter().copied());
                        }
                    }
                }
            }
        }
        for conn in targets {
            if let Some(entry) = inner.connections.get(&conn) {
                let _ = entry.tx.send(event.clone());
            }
        }
    }

    /// Direct reply to one connection, used as the duplex response path.
    pub fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) {
        let inner = self.inner.lock().expect("gateway lock");
        if let Some(entry) = inner.connections.get(&connection_id) {
            let _ = entry.tx.send(event);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().expect("gateway lock").connections.len()
    }
}

fn error_event(err: &ServiceError) -> ServerEvent {
    ServerEvent::Error {
        code: err.code(),
        message: err.to_string(),
    }
}

/// Drives one authenticated duplex connection: join the personal room,
/// announce presence, then process the client's events strictly in arrival
/// order until the socket closes.
pub async fn handle_socket(
    socket: WebSocket,
    principal: Principal,
    state: Arc<Mutex<ServiceState>>,
    gateway: Arc<Gateway>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = gateway.connect(principal.user_id, tx);
    info!(user_id = %principal.user_id, %connection_id, "realtime connection opened");

    gateway.broadcast_presence(
        &principal.user_id,
        &ServerEvent::UserStatusUpdate {
            user_id: principal.user_id,
            status: "online".to_string(),
            last_seen: None,
        },
    );

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(p) => p,
                Err(err) => {
                    warn!(?err, "failed to encode server event");
                    continue;
                }
            };
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                handle_client_event(&text, connection_id, principal, &state, &gateway);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(?err, %connection_id, "realtime receive error");
                break;
            }
        }
    }

    writer.abort();
    gateway.disconnect(connection_id);
    gateway.broadcast_presence(
        &principal.user_id,
        &ServerEvent::UserStatusUpdate {
            user_id: principal.user_id,
            status: "offline".to_string(),
            last_seen: Some(Utc::now()),
        },
    );
    info!(user_id = %principal.user_id, %connection_id, "realtime connection closed");
}

/// One event, processed to completion before the next frame is read, so a
/// single sender's messages are never reordered. Failures answer the caller
/// with an `error` event and leave the connection up.
fn handle_client_event(
    text: &str,
    connection_id: ConnectionId,
    principal: Principal,
    state: &Arc<Mutex<ServiceState>>,
    gateway: &Arc<Gateway>,
) {
    let reply = |event: ServerEvent| gateway.send_to(connection_id, event);

    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(err) => {
            debug!(?err, %connection_id, "malformed client event");
            reply(error_event(&ServiceError::Validation(
                "malformed event payload",
            )));
            return;
        }
    };

    match event {
        ClientEvent::JoinItemChat { item_id } => {
            let rooms = {
                let s = state.lock().expect("state lock");
                chat_rooms_for(&s, item_id, principal.user_id)
            };
            match rooms {
                Ok(keys) => {
                    for key in &keys {
                        gateway.join_room(connection_id, key);
                    }
                }
                Err(err) => reply(error_event(&err)),
            }
        }
        ClientEvent::LeaveItemChat { item_id } => {
            let rooms = {
                let s = state.lock().expect("state lock");
                chat_rooms_for(&s, item_id, principal.user_id)
            };
            if let Ok(keys) = rooms {
                for key in &keys {
                    gateway.leave_room(connection_id, key);
                }
            }
        }
        ClientEvent::SendMessage { item_id, content } => {
            // Same service call as the HTTP path: both transports observe
            // identical validation and invariants.
            let result = {
                let mut s = state.lock().expect("state lock");
                chat::post_message(&mut s, item_id, principal.user_id, &content, Utc::now())
            };
            match result {
                Ok(posted) => {
                    let event = ServerEvent::NewMessage {
                        item_id,
                        chat_id: posted.conversation_id,
                        message: posted.message,
                    };
                    // The sending connection gets the event as its response;
                    // peers get it through their personal rooms.
                    reply(event.clone());
                    for recipient in &posted.recipients {
                        gateway.notify_user(recipient, &event);
                    }
                }
                Err(err) => reply(error_event(&err)),
            }
        }
        ClientEvent::TypingStart { item_id } => {
            let rooms = {
                let s = state.lock().expect("state lock");
                chat_rooms_for(&s, item_id, principal.user_id)
            };
            if let Ok(keys) = rooms {
                for key in &keys {
                    gateway.emit_room(
                        key,
                        connection_id,
                        &ServerEvent::UserTyping {
                            item_id,
                            user_id: principal.user_id,
                        },
                    );
                }
            }
        }
        ClientEvent::TypingStop { item_id } => {
            let rooms = {
                let s = state.lock().expect("state lock");
                chat_rooms_for(&s, item_id, principal.user_id)
            };
            if let Ok(keys) = rooms {
                for key in &keys {
                    gateway.emit_room(
                        key,
                        connection_id,
                        &ServerEvent::UserStopTyping {
                            item_id,
                            user_id: principal.user_id,
                        },
                    );
                }
            }
        }
        ClientEvent::UpdateStatus { status } => {
            gateway.broadcast_presence(
                &principal.user_id,
                &ServerEvent::UserStatusUpdate {
                    user_id: principal.user_id,
                    status,
                    last_seen: None,
                },
            );
        }
    }
}

/// Chat rooms for an item from the caller's perspective: the dyad room of
/// every conversation the caller participates in for that item. An item
/// owner can be party to several dyads at once, so the rooms come from the
/// conversation store rather than from a re-derived pair. A non-owner also
/// gets the derived (caller, owner) room, so joining works before the first
/// message creates the conversation row.
pub fn chat_rooms_for(
    state: &ServiceState,
    item_id: ItemId,
    user_id: UserId,
) -> Result<Vec<String>, ServiceError> {
    let owner_id = state.item(&item_id)?.owner_id;
    let mut keys: Vec<String> = state
        .conversation_by_id
        .values()
        .filter(|c| c.active && c.item_id == item_id && c.is_participant(&user_id))
        .map(|c| room_key(item_id, &c.participant_ids))
        .collect();
    if user_id != owner_id {
        let (_, participants) = conversation_key(item_id, user_id, owner_id);
        let derived = room_key(item_id, &participants);
        if !keys.contains(&derived) {
            keys.push(derived);
        }
    }
    Ok(keys)
}
