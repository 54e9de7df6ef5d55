use findback::persistence::{load_state, save_state};
use findback::{ItemRecord, ItemStatus, ServiceState};
use uuid::Uuid;

#[test]
fn roundtrip_state_snapshot() {
    let dir = std::env::temp_dir().join(format!("findback-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("state.bin");

    let item = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let mut s = ServiceState::default();
    s.upsert_item(ItemRecord {
        id: item,
        owner_id: owner,
        status: ItemStatus::Active,
    });
    s.stats_mut(owner).items_returned = 7;

    save_state(&path, &s).unwrap();
    let loaded = load_state(&path);

    assert_eq!(loaded.item(&item).unwrap().owner_id, owner);
    assert_eq!(loaded.user_stats_by_id[&owner].items_returned, 7);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_snapshot_starts_empty() {
    let loaded = load_state(std::path::Path::new("/nonexistent/findback-state.bin"));
    assert!(loaded.item_by_id.is_empty());
    assert!(loaded.claim_by_id.is_empty());
}

#[test]
fn corrupt_snapshot_starts_empty() {
    let dir = std::env::temp_dir().join(format!("findback-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("state.bin");
    std::fs::write(&path, b"not a snapshot").unwrap();

    let loaded = load_state(&path);
    assert!(loaded.conversation_by_id.is_empty());

    std::fs::remove_dir_all(&dir).unwrap();
}
