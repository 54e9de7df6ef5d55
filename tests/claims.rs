use std::sync::{Arc, Barrier, Mutex};

use chrono::{Duration, Utc};
use findback::{
    claims, AuditInfo, ClaimStatus, ErrorCode, IdDocumentType, ItemRecord, ItemStatus,
    ReviewDecision, ServiceState, VerificationInfo,
};
use uuid::Uuid;

fn seed_item(state: &mut ServiceState, owner: Uuid) -> Uuid {
    let item = Uuid::new_v4();
    state.upsert_item(ItemRecord {
        id: item,
        owner_id: owner,
        status: ItemStatus::Active,
    });
    item
}

fn verification() -> VerificationInfo {
    VerificationInfo {
        full_name: "Grace Hopper".to_string(),
        phone_number: "5550987654".to_string(),
        id_document_type: IdDocumentType::NationalId,
        id_number: "ID-2024-7788".to_string(),
        ownership_details: "black wallet, library card inside".to_string(),
        additional_proof: Some("photo of the wallet from last month".to_string()),
    }
}

#[test]
fn duplicate_claim_never_creates_a_second_row() {
    let owner = Uuid::new_v4();
    let claimant = Uuid::new_v4();
    let mut state = ServiceState::default();
    let item = seed_item(&mut state, owner);
    let now = Utc::now();

    claims::submit(
        &mut state,
        item,
        claimant,
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        now,
    )
    .unwrap();

    let err = claims::submit(
        &mut state,
        item,
        claimant,
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        now,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ErrClaimAlreadyExists as u16);
    assert_eq!(state.claim_by_id.len(), 1);
}

#[test]
fn owner_cannot_claim_their_own_item() {
    let owner = Uuid::new_v4();
    let mut state = ServiceState::default();
    let item = seed_item(&mut state, owner);

    let err = claims::submit(
        &mut state,
        item,
        owner,
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        Utc::now(),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ErrOwnClaimForbidden as u16);
}

#[test]
fn closed_item_is_not_claimable() {
    let owner = Uuid::new_v4();
    let mut state = ServiceState::default();
    let item = Uuid::new_v4();
    state.upsert_item(ItemRecord {
        id: item,
        owner_id: owner,
        status: ItemStatus::Returned,
    });

    let err = claims::submit(
        &mut state,
        item,
        Uuid::new_v4(),
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        Utc::now(),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ErrItemNotClaimable as u16);
}

#[test]
fn fourth_claim_within_the_hour_is_throttled() {
    let claimant = Uuid::new_v4();
    let mut state = ServiceState::default();
    let t0 = Utc::now();

    // Three claims for three different items inside ten minutes.
    for i in 0..3i64 {
        let owner = Uuid::new_v4();
        let item = seed_item(&mut state, owner);
        claims::submit(
            &mut state,
            item,
            claimant,
            verification(),
            vec![],
            vec![],
            AuditInfo::default(),
            t0 + Duration::minutes(i * 5),
        )
        .unwrap();
    }

    let owner = Uuid::new_v4();
    let item = seed_item(&mut state, owner);
    let err = claims::submit(
        &mut state,
        item,
        claimant,
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        t0 + Duration::minutes(40),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ErrTooManyClaims as u16);

    // Once the oldest submissions age out of the window the same claimant is
    // admitted again.
    claims::submit(
        &mut state,
        item,
        claimant,
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        t0 + Duration::minutes(150),
    )
    .unwrap();
}

#[test]
fn review_is_owner_only_and_single_shot() {
    let owner = Uuid::new_v4();
    let claimant = Uuid::new_v4();
    let mut state = ServiceState::default();
    let item = seed_item(&mut state, owner);
    let now = Utc::now();

    let claim = claims::submit(
        &mut state,
        item,
        claimant,
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        now,
    )
    .unwrap();

    let err = claims::review(
        &mut state,
        claim.id,
        claimant,
        ReviewDecision::Approved,
        String::new(),
        now,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ErrForbidden as u16);

    claims::review(
        &mut state,
        claim.id,
        owner,
        ReviewDecision::Rejected,
        "not convincing".to_string(),
        now,
    )
    .unwrap();

    // Terminal: a second review attempt fails, as does any handover.
    let err = claims::review(
        &mut state,
        claim.id,
        owner,
        ReviewDecision::Approved,
        String::new(),
        now,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ErrInvalidState as u16);

    let err =
        claims::confirm_handover(&mut state, claim.id, owner, None, None, now).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ErrInvalidState as u16);
}

#[test]
fn handover_requires_approval_first() {
    let owner = Uuid::new_v4();
    let claimant = Uuid::new_v4();
    let mut state = ServiceState::default();
    let item = seed_item(&mut state, owner);
    let now = Utc::now();

    let claim = claims::submit(
        &mut state,
        item,
        claimant,
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        now,
    )
    .unwrap();

    let err =
        claims::confirm_handover(&mut state, claim.id, claimant, None, None, now).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ErrInvalidState as u16);
}

#[test]
fn handover_confirmation_is_idempotent_per_party() {
    let owner = Uuid::new_v4();
    let claimant = Uuid::new_v4();
    let mut state = ServiceState::default();
    let item = seed_item(&mut state, owner);
    let now = Utc::now();

    let claim = claims::submit(
        &mut state,
        item,
        claimant,
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        now,
    )
    .unwrap();
    claims::review(
        &mut state,
        claim.id,
        owner,
        ReviewDecision::Approved,
        String::new(),
        now,
    )
    .unwrap();

    let first = claims::confirm_handover(
        &mut state,
        claim.id,
        owner,
        Some("main library desk".to_string()),
        None,
        now,
    )
    .unwrap();
    assert!(!first.resolved_now);

    // Re-confirming the same side never resolves on its own.
    let again = claims::confirm_handover(&mut state, claim.id, owner, None, None, now).unwrap();
    assert!(!again.resolved_now);
    let handover = again.claim.handover.unwrap();
    assert!(handover.confirmed_by_owner);
    assert!(!handover.confirmed_by_claimant);
    assert_eq!(handover.location.as_deref(), Some("main library desk"));
}

#[test]
fn concurrent_dual_confirmation_resolves_exactly_once() {
    let owner = Uuid::new_v4();
    let claimant = Uuid::new_v4();
    let mut state = ServiceState::default();
    let item = seed_item(&mut state, owner);
    let now = Utc::now();

    let claim = claims::submit(
        &mut state,
        item,
        claimant,
        verification(),
        vec![],
        vec![],
        AuditInfo::default(),
        now,
    )
    .unwrap();
    claims::review(
        &mut state,
        claim.id,
        owner,
        ReviewDecision::Approved,
        String::new(),
        now,
    )
    .unwrap();

    let shared = Arc::new(Mutex::new(state));
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for caller in [owner, claimant] {
        let shared = Arc::clone(&shared);
        let barrier = Arc::clone(&barrier);
        let claim_id = claim.id;
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            let mut s = shared.lock().expect("state lock");
            claims::confirm_handover(&mut s, claim_id, caller, None, None, Utc::now())
                .map(|o| o.resolved_now)
        }));
    }

    let outcomes: Vec<bool> = handles
        .into_iter()
        .map(|h| h.join().expect("thread join").expect("confirm ok"))
        .collect();
    assert_eq!(outcomes.iter().filter(|r| **r).count(), 1);

    let s = shared.lock().expect("state lock");
    let resolved = s.claim(&claim.id).unwrap();
    assert_eq!(resolved.status, ClaimStatus::Resolved);
    let handover = resolved.handover.as_ref().unwrap();
    assert!(handover.confirmed_by_owner && handover.confirmed_by_claimant);
    assert!(handover.resolved_at.is_some());
    assert_eq!(s.item(&item).unwrap().status, ItemStatus::Returned);
    assert_eq!(s.user_stats_by_id[&owner].items_returned, 1);
}

#[test]
fn masked_view_redacts_audit_and_keeps_last_four() {
    let owner = Uuid::new_v4();
    let claimant = Uuid::new_v4();
    let mut state = ServiceState::default();
    let item = seed_item(&mut state, owner);

    let claim = claims::submit(
        &mut state,
        item,
        claimant,
        verification(),
        vec![],
        vec![],
        AuditInfo {
            ip_address: Some("203.0.113.9".to_string()),
            user_agent: Some("integration-test".to_string()),
        },
        Utc::now(),
    )
    .unwrap();

    let masked = claims::claim_view(&state, claim.id, claimant).unwrap();
    assert!(masked.verification.phone_number.ends_with("7654"));
    assert!(masked.verification.phone_number.starts_with('*'));
    assert!(masked.verification.id_number.ends_with("7788"));
    assert!(!masked.verification.id_number.contains("ID-2024"));

    let json = serde_json::to_value(&masked).unwrap();
    assert!(json.get("ipAddress").is_none());
    assert!(json.get("userAgent").is_none());
    assert_eq!(json["verification"]["idDocumentType"], "national-id");

    // A stranger cannot read the claim at all.
    let err = claims::claim_view(&state, claim.id, Uuid::new_v4()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ErrForbidden as u16);
}

#[test]
fn queries_scope_to_their_caller() {
    let owner = Uuid::new_v4();
    let claimant_a = Uuid::new_v4();
    let claimant_b = Uuid::new_v4();
    let mut state = ServiceState::default();
    let item = seed_item(&mut state, owner);
    let now = Utc::now();

    for claimant in [claimant_a, claimant_b] {
        claims::submit(
            &mut state,
            item,
            claimant,
            verification(),
            vec![],
            vec![],
            AuditInfo::default(),
            now,
        )
        .unwrap();
    }

    assert_eq!(claims::claims_by_claimant(&state, claimant_a).len(), 1);
    assert_eq!(claims::claims_pending_review(&state, owner).len(), 2);
    assert_eq!(
        claims::claims_for_item(&state, item, owner).unwrap().len(),
        2
    );
    assert_eq!(
        claims::claims_for_item(&state, item, claimant_a)
            .unwrap()
            .len(),
        1
    );
    assert!(claims::claims_for_item(&state, item, Uuid::new_v4()).is_err());
    assert_eq!(claims::successful_returns_count(&state), 0);
}
