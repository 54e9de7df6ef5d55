use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::types::*;

/// Composite lookup key for the one-conversation-per-(item, pair) invariant.
/// The participant set is sorted and deduped so both orderings of a pair, and
/// the self-chat singleton, map to the same key.
pub fn conversation_key(item_id: ItemId, a: UserId, b: UserId) -> (ItemId, Vec<UserId>) {
    let mut participants = vec![a, b];
    participants.sort();
    participants.dedup();
    (item_id, participants)
}

/// The shared durable store. All invariants (conversation uniqueness, claim
/// uniqueness, single handover resolution) are enforced by the service
/// functions as conditional writes executed while holding the state lock.
#[derive(Default, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub item_by_id: BTreeMap<ItemId, ItemRecord>,
    pub user_stats_by_id: BTreeMap<UserId, UserStats>,

    pub conversation_by_id: BTreeMap<ConversationId, Conversation>,
    pub conversation_id_by_key: BTreeMap<(ItemId, Vec<UserId>), ConversationId>,

    pub claim_by_id: BTreeMap<ClaimId, Claim>,
    pub claim_id_by_item_claimant: BTreeMap<(ItemId, UserId), ClaimId>,
}

impl ServiceState {
    /// Seeds or updates an item snapshot from the external item collaborator.
    pub fn upsert_item(&mut self, item: ItemRecord) {
        self.item_by_id.insert(item.id, item);
    }

    pub fn item(&self, item_id: &ItemId) -> Result<&ItemRecord, ServiceError> {
        self.item_by_id.get(item_id).ok_or(ServiceError::ItemNotFound)
    }

    pub fn set_item_status(
        &mut self,
        item_id: &ItemId,
        status: ItemStatus,
    ) -> Result<(), ServiceError> {
        let item = self
            .item_by_id
            .get_mut(item_id)
            .ok_or(ServiceError::ItemNotFound)?;
        item.status = status;
        Ok(())
    }

    pub fn conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<&Conversation, ServiceError> {
        self.conversation_by_id
            .get(conversation_id)
            .ok_or(ServiceError::ConversationNotFound)
    }

    pub fn conversation_mut(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<&mut Conversation, ServiceError> {
        self.conversation_by_id
            .get_mut(conversation_id)
            .ok_or(ServiceError::ConversationNotFound)
    }

    /// Capability check: the caller must be a participant of an existing,
    /// active conversation.
    pub fn ensure_participant(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<(), ServiceError> {
        let conv = self.conversation(conversation_id)?;
        if !conv.active {
            return Err(ServiceError::ConversationNotFound);
        }
        if !conv.is_participant(user_id) {
            return Err(ServiceError::NotParticipant);
        }
        Ok(())
    }

    pub fn claim(&self, claim_id: &ClaimId) -> Result<&Claim, ServiceError> {
        self.claim_by_id.get(claim_id).ok_or(ServiceError::ClaimNotFound)
    }

    pub fn claim_mut(&mut self, claim_id: &ClaimId) -> Result<&mut Claim, ServiceError> {
        self.claim_by_id
            .get_mut(claim_id)
            .ok_or(ServiceError::ClaimNotFound)
    }

    pub fn stats_mut(&mut self, user_id: UserId) -> &mut UserStats {
        self.user_stats_by_id.entry(user_id).or_default()
    }
}
