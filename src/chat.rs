use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::state::{conversation_key, ServiceState};
use crate::types::*;

/// Result of an append, carrying everything the delivery path needs: the
/// store stays authoritative, the gateway only gets told who to poke.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub conversation_id: ConversationId,
    pub message: ChatMessage,
    /// Participants other than the sender.
    pub recipients: Vec<UserId>,
}

fn normalize_content(content: &str) -> Result<String, ServiceError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation("message content is empty"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ServiceError::Validation("message content too long"));
    }
    Ok(trimmed.to_string())
}

/// Idempotent lookup-or-insert keyed by (item, sorted participant set).
/// Concurrent first calls race on the key map under the state lock; the
/// loser re-reads the winner's row instead of erroring. Self-chat (requester
/// owns the item) collapses to a single-participant set.
pub fn get_or_create(
    state: &mut ServiceState,
    item_id: ItemId,
    requester_id: UserId,
    now: DateTime<Utc>,
) -> Result<ConversationId, ServiceError> {
    let owner_id = state.item(&item_id)?.owner_id;
    let key = conversation_key(item_id, requester_id, owner_id);

    if let Some(existing) = state.conversation_id_by_key.get(&key) {
        return Ok(*existing);
    }

    let id = Uuid::new_v4();
    state.conversation_by_id.insert(
        id,
        Conversation {
            id,
            item_id,
            participant_ids: key.1.clone(),
            messages: Vec::new(),
            last_activity_at: now,
            active: true,
        },
    );
    state.conversation_id_by_key.insert(key, id);
    Ok(id)
}

/// Lazy-create append path: the item route both transports use. The sender
/// implicitly becomes a participant through get_or_create.
pub fn post_message(
    state: &mut ServiceState,
    item_id: ItemId,
    sender_id: UserId,
    content: &str,
    now: DateTime<Utc>,
) -> Result<PostedMessage, ServiceError> {
    let content = normalize_content(content)?;
    let conversation_id = get_or_create(state, item_id, sender_id, now)?;
    append(state, conversation_id, sender_id, content, now)
}

/// Append to an existing conversation; the sender must already be a
/// participant.
pub fn post_message_in(
    state: &mut ServiceState,
    conversation_id: ConversationId,
    sender_id: UserId,
    content: &str,
    now: DateTime<Utc>,
) -> Result<PostedMessage, ServiceError> {
    let content = normalize_content(content)?;
    state.ensure_participant(&conversation_id, &sender_id)?;
    append(state, conversation_id, sender_id, content, now)
}

fn append(
    state: &mut ServiceState,
    conversation_id: ConversationId,
    sender_id: UserId,
    content: String,
    now: DateTime<Utc>,
) -> Result<PostedMessage, ServiceError> {
    let conv = state.conversation_mut(&conversation_id)?;
    let message = ChatMessage {
        id: Uuid::new_v4(),
        sender_id,
        content,
        sent_at: now,
        is_read: false,
        is_edited: false,
        edited_at: None,
    };
    conv.messages.push(message.clone());
    conv.last_activity_at = now;
    let recipients = conv
        .participant_ids
        .iter()
        .copied()
        .filter(|p| *p != sender_id)
        .collect();
    Ok(PostedMessage {
        conversation_id,
        message,
        recipients,
    })
}

/// Flips `is_read` on every message from other senders. Idempotent.
pub fn mark_read(
    state: &mut ServiceState,
    conversation_id: ConversationId,
    reader_id: UserId,
) -> Result<(), ServiceError> {
    state.ensure_participant(&conversation_id, &reader_id)?;
    let conv = state.conversation_mut(&conversation_id)?;
    for msg in conv.messages.iter_mut() {
        if msg.sender_id != reader_id {
            msg.is_read = true;
        }
    }
    Ok(())
}

pub fn edit_message(
    state: &mut ServiceState,
    conversation_id: ConversationId,
    message_id: MessageId,
    caller_id: UserId,
    content: &str,
    now: DateTime<Utc>,
) -> Result<ChatMessage, ServiceError> {
    let content = normalize_content(content)?;
    state.ensure_participant(&conversation_id, &caller_id)?;
    let conv = state.conversation_mut(&conversation_id)?;
    let msg = conv
        .messages
        .iter_mut()
        .find(|m| m.id == message_id)
        .ok_or(ServiceError::MessageNotFound)?;
    if msg.sender_id != caller_id {
        return Err(ServiceError::NotMessageSender);
    }
    msg.content = content;
    msg.is_edited = true;
    msg.edited_at = Some(now);
    Ok(msg.clone())
}

pub fn delete_message(
    state: &mut ServiceState,
    conversation_id: ConversationId,
    message_id: MessageId,
    caller_id: UserId,
) -> Result<(), ServiceError> {
    state.ensure_participant(&conversation_id, &caller_id)?;
    let conv = state.conversation_mut(&conversation_id)?;
    let idx = conv
        .messages
        .iter()
        .position(|m| m.id == message_id)
        .ok_or(ServiceError::MessageNotFound)?;
    if conv.messages[idx].sender_id != caller_id {
        return Err(ServiceError::NotMessageSender);
    }
    conv.messages.remove(idx);
    Ok(())
}

/// Empties the message sequence but keeps the conversation shell.
pub fn clear(
    state: &mut ServiceState,
    conversation_id: ConversationId,
    caller_id: UserId,
) -> Result<(), ServiceError> {
    state.ensure_participant(&conversation_id, &caller_id)?;
    let conv = state.conversation_mut(&conversation_id)?;
    conv.messages.clear();
    Ok(())
}

/// Participant-only read of a full conversation.
pub fn conversation_for(
    state: &ServiceState,
    conversation_id: ConversationId,
    caller_id: UserId,
) -> Result<Conversation, ServiceError> {
    state.ensure_participant(&conversation_id, &caller_id)?;
    Ok(state.conversation(&conversation_id)?.clone())
}

/// Conversations the user participates in, non-empty only, newest activity
/// first, each reduced to its latest message.
pub fn list_for_user(state: &ServiceState, user_id: UserId) -> Vec<ConversationSummary> {
    let mut summaries: Vec<ConversationSummary> = state
        .conversation_by_id
        .values()
        .filter(|c| c.active && c.is_participant(&user_id))
        .filter_map(|c| {
            c.messages.last().map(|last| ConversationSummary {
                id: c.id,
                item_id: c.item_id,
                participant_ids: c.participant_ids.clone(),
                last_activity_at: c.last_activity_at,
                last_message: last.clone(),
            })
        })
        .collect();
    summaries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
    summaries
}
