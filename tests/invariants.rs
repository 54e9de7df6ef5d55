use chrono::{Duration, TimeZone, Utc};
use findback::{
    chat, claims, mask_last4, AuditInfo, IdDocumentType, ItemRecord, ItemStatus, ServiceState,
    VerificationInfo, MAX_CLAIMS_PER_WINDOW,
};
use proptest::prelude::*;
use uuid::Uuid;

fn seed_items(state: &mut ServiceState, owner: Uuid, n: usize) -> Vec<Uuid> {
    (0..n)
        .map(|_| {
            let item = Uuid::new_v4();
            state.upsert_item(ItemRecord {
                id: item,
                owner_id: owner,
                status: ItemStatus::Active,
            });
            item
        })
        .collect()
}

fn verification() -> VerificationInfo {
    VerificationInfo {
        full_name: "Test Claimant".to_string(),
        phone_number: "5550001111".to_string(),
        id_document_type: IdDocumentType::DriverLicense,
        id_number: "DL-445566".to_string(),
        ownership_details: "described the scratch on the case".to_string(),
        additional_proof: None,
    }
}

proptest! {
    #[test]
    fn mask_preserves_length_and_real_suffix(s in "[a-zA-Z0-9+-]{0,32}") {
        let masked = mask_last4(&s);
        prop_assert_eq!(masked.chars().count(), s.chars().count());
        if s.chars().count() > 4 {
            let suffix: String = s.chars().skip(s.chars().count() - 4).collect();
            prop_assert!(masked.ends_with(&suffix));
            let stars = masked.chars().count() - 4;
            prop_assert!(masked.chars().take(stars).all(|c| c == '*'));
        } else {
            prop_assert!(masked.chars().all(|c| c == '*'));
        }
    }

    /// Any interleaving of lookups lands each (item, pair) on exactly one
    /// conversation row, and the two indexes never disagree.
    #[test]
    fn get_or_create_never_duplicates_conversations(
        ops in prop::collection::vec((0usize..4, 0usize..3), 1..40)
    ) {
        let owner = Uuid::new_v4();
        let mut state = ServiceState::default();
        let items = seed_items(&mut state, owner, 4);
        let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        for (item_ix, user_ix) in ops {
            chat::get_or_create(&mut state, items[item_ix], users[user_ix], now).unwrap();
        }

        prop_assert_eq!(state.conversation_by_id.len(), state.conversation_id_by_key.len());
        for (key, id) in &state.conversation_id_by_key {
            let conv = state.conversation(id).unwrap();
            prop_assert_eq!(&(conv.item_id, conv.participant_ids.clone()), key);
        }
    }

    /// Activity timestamps never move backwards while messages arrive in
    /// timestamp order.
    #[test]
    fn last_activity_is_monotone(offsets in prop::collection::vec(0i64..600, 1..20)) {
        let owner = Uuid::new_v4();
        let finder = Uuid::new_v4();
        let mut state = ServiceState::default();
        let item = seed_items(&mut state, owner, 1)[0];
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        let mut last_seen = None;
        for off in sorted {
            let now = t0 + Duration::seconds(off);
            let posted = chat::post_message(&mut state, item, finder, "ping", now).unwrap();
            let conv = state.conversation(&posted.conversation_id).unwrap();
            if let Some(prev) = last_seen {
                prop_assert!(conv.last_activity_at >= prev);
            }
            last_seen = Some(conv.last_activity_at);
        }
    }

    /// A burst of submissions at one instant admits at most the window
    /// allowance, regardless of burst size.
    #[test]
    fn claim_window_caps_a_burst(burst in 1usize..10) {
        let claimant = Uuid::new_v4();
        let mut state = ServiceState::default();
        let owner = Uuid::new_v4();
        let items = seed_items(&mut state, owner, burst);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let admitted = items
            .iter()
            .filter(|item| {
                claims::submit(
                    &mut state,
                    **item,
                    claimant,
                    verification(),
                    vec![],
                    vec![],
                    AuditInfo::default(),
                    now,
                )
                .is_ok()
            })
            .count();

        prop_assert_eq!(admitted, burst.min(MAX_CLAIMS_PER_WINDOW));
        prop_assert_eq!(state.claim_by_id.len(), admitted);
    }
}
