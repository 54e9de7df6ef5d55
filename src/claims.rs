use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::guard;
use crate::state::ServiceState;
use crate::types::*;

/// Outcome of a handover confirmation. `resolved_now` is true for exactly
/// one of two concurrent confirmers: the call that flipped the claim to
/// resolved and performed the item-close/stat-increment side effects.
#[derive(Debug, Clone)]
pub struct HandoverOutcome {
    pub claim: Claim,
    pub resolved_now: bool,
}

fn validate_verification(v: &VerificationInfo) -> Result<(), ServiceError> {
    if v.full_name.trim().is_empty() {
        return Err(ServiceError::Validation("full name is required"));
    }
    if v.phone_number.trim().is_empty() {
        return Err(ServiceError::Validation("phone number is required"));
    }
    if v.id_number.trim().is_empty() {
        return Err(ServiceError::Validation("id number is required"));
    }
    if v.ownership_details.trim().is_empty() {
        return Err(ServiceError::Validation("ownership details are required"));
    }
    Ok(())
}

/// Admission control and creation. Guard clauses run in order: item open for
/// claims, claimant is not the owner, no prior claim by this claimant for
/// this item, submission rate under the window threshold. The uniqueness
/// check and the insert happen under the same lock acquisition, so a racing
/// duplicate observes the first row instead of creating a second one.
pub fn submit(
    state: &mut ServiceState,
    item_id: ItemId,
    claimant_id: UserId,
    verification: VerificationInfo,
    proof_documents: Vec<StoredFile>,
    extra_proof_images: Vec<CaptionedFile>,
    audit: AuditInfo,
    now: DateTime<Utc>,
) -> Result<Claim, ServiceError> {
    validate_verification(&verification)?;
    if proof_documents.len() > MAX_PROOF_DOCUMENTS {
        return Err(ServiceError::Validation("too many proof documents"));
    }
    if extra_proof_images.len() > MAX_EXTRA_PROOF_IMAGES {
        return Err(ServiceError::Validation("too many extra proof images"));
    }

    let item = state.item(&item_id)?;
    if item.status != ItemStatus::Active {
        return Err(ServiceError::ItemNotClaimable);
    }
    let item_owner_id = item.owner_id;
    if claimant_id == item_owner_id {
        return Err(ServiceError::OwnClaimForbidden);
    }

    if state
        .claim_id_by_item_claimant
        .contains_key(&(item_id, claimant_id))
    {
        return Err(ServiceError::ClaimAlreadyExists);
    }

    let window = Duration::hours(CLAIM_WINDOW_HOURS);
    if guard::count_recent(state, claimant_id, window, now) >= MAX_CLAIMS_PER_WINDOW {
        return Err(ServiceError::TooManyClaims);
    }

    let claim = Claim {
        id: Uuid::new_v4(),
        item_id,
        claimant_id,
        item_owner_id,
        verification,
        proof_documents,
        extra_proof_images,
        status: ClaimStatus::Pending,
        review: None,
        handover: None,
        ip_address: audit.ip_address,
        user_agent: audit.user_agent,
        created_at: now,
    };
    state
        .claim_id_by_item_claimant
        .insert((item_id, claimant_id), claim.id);
    state.claim_by_id.insert(claim.id, claim.clone());
    Ok(claim)
}

/// Single reviewer transition: pending -> approved | rejected. The reviewer
/// capability is pinned to the owner snapshotted at submission.
pub fn review(
    state: &mut ServiceState,
    claim_id: ClaimId,
    reviewer_id: UserId,
    decision: ReviewDecision,
    notes: String,
    now: DateTime<Utc>,
) -> Result<Claim, ServiceError> {
    let claim = state.claim(&claim_id)?;
    if reviewer_id != claim.item_owner_id {
        return Err(ServiceError::Forbidden);
    }
    if claim.status != ClaimStatus::Pending {
        return Err(ServiceError::InvalidState("claim has already been reviewed"));
    }
    let item_id = claim.item_id;

    let claim = state.claim_mut(&claim_id)?;
    claim.review = Some(ReviewRecord {
        decision,
        notes,
        reviewed_at: now,
    });
    claim.status = match decision {
        ReviewDecision::Approved => ClaimStatus::Approved,
        ReviewDecision::Rejected => ClaimStatus::Rejected,
    };
    let updated = claim.clone();

    if decision == ReviewDecision::Approved {
        // Item moves out of the claim pool while the handover is arranged.
        // The item may have been removed by the admin collaborator; the
        // claim transition stands regardless.
        let _ = state.set_item_status(&item_id, ItemStatus::PendingReturn);
    }
    Ok(updated)
}

/// Dual-confirmation handover. One read-modify-write under the state lock:
/// the caller's flag is set idempotently and, if the other flag is already
/// set and the claim is still approved, the same write flips the claim to
/// resolved, closes the item and credits the owner's return counter. Exactly
/// one of two concurrent confirmers takes that branch.
pub fn confirm_handover(
    state: &mut ServiceState,
    claim_id: ClaimId,
    caller_id: UserId,
    location: Option<String>,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<HandoverOutcome, ServiceError> {
    let claim = state.claim(&claim_id)?;
    let is_owner = caller_id == claim.item_owner_id;
    let is_claimant = caller_id == claim.claimant_id;
    if !is_owner && !is_claimant {
        return Err(ServiceError::Forbidden);
    }
    match claim.status {
        ClaimStatus::Approved => {}
        ClaimStatus::Resolved => {
            return Err(ServiceError::InvalidState("handover already completed"))
        }
        _ => return Err(ServiceError::InvalidState("claim is not approved")),
    }
    let item_id = claim.item_id;
    let owner_id = claim.item_owner_id;

    let claim = state.claim_mut(&claim_id)?;
    let handover = claim.handover.get_or_insert_with(HandoverRecord::default);
    if is_owner {
        handover.confirmed_by_owner = true;
    } else {
        handover.confirmed_by_claimant = true;
    }
    if location.is_some() {
        handover.location = location;
    }
    if notes.is_some() {
        handover.notes = notes;
    }

    let resolved_now = handover.confirmed_by_owner && handover.confirmed_by_claimant;
    if resolved_now {
        handover.resolved_at = Some(now);
        claim.status = ClaimStatus::Resolved;
    }
    let updated = claim.clone();

    if resolved_now {
        let _ = state.set_item_status(&item_id, ItemStatus::Returned);
        state.stats_mut(owner_id).items_returned += 1;
    }

    Ok(HandoverOutcome {
        claim: updated,
        resolved_now,
    })
}

/// Claims submitted by the caller, newest first.
pub fn claims_by_claimant(state: &ServiceState, claimant_id: UserId) -> Vec<MaskedClaim> {
    let mut claims: Vec<&Claim> = state
        .claim_by_id
        .values()
        .filter(|c| c.claimant_id == claimant_id)
        .collect();
    claims.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    claims.into_iter().map(Claim::masked).collect()
}

/// Pending claims awaiting the caller's review, oldest first.
pub fn claims_pending_review(state: &ServiceState, owner_id: UserId) -> Vec<MaskedClaim> {
    let mut claims: Vec<&Claim> = state
        .claim_by_id
        .values()
        .filter(|c| c.item_owner_id == owner_id && c.status == ClaimStatus::Pending)
        .collect();
    claims.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    claims.into_iter().map(Claim::masked).collect()
}

/// Claims against an item: the snapshotted owner sees all of them, a
/// claimant sees only their own.
pub fn claims_for_item(
    state: &ServiceState,
    item_id: ItemId,
    caller_id: UserId,
) -> Result<Vec<MaskedClaim>, ServiceError> {
    let item = state.item(&item_id)?;
    let is_owner = caller_id == item.owner_id;
    let claims: Vec<MaskedClaim> = state
        .claim_by_id
        .values()
        .filter(|c| c.item_id == item_id)
        .filter(|c| is_owner || c.claimant_id == caller_id)
        .map(Claim::masked)
        .collect();
    if !is_owner && claims.is_empty() {
        return Err(ServiceError::Forbidden);
    }
    Ok(claims)
}

/// Participant-only single-claim read, masked.
pub fn claim_view(
    state: &ServiceState,
    claim_id: ClaimId,
    caller_id: UserId,
) -> Result<MaskedClaim, ServiceError> {
    let claim = state.claim(&claim_id)?;
    if caller_id != claim.claimant_id && caller_id != claim.item_owner_id {
        return Err(ServiceError::Forbidden);
    }
    Ok(claim.masked())
}

/// Public aggregate: completed returns across the whole system.
pub fn successful_returns_count(state: &ServiceState) -> u64 {
    state
        .claim_by_id
        .values()
        .filter(|c| c.status == ClaimStatus::Resolved)
        .count() as u64
}
