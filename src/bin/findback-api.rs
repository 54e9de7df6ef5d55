use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use findback::auth::StaticTokenResolver;
use findback::files::InMemoryFileStore;
use findback::persistence;
use findback::web_api::{self, AppState};
use findback::{ItemRecord, ItemStatus, Role};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr: SocketAddr = std::env::var("FINDBACK_API_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| "127.0.0.1:8080".parse().expect("default addr"));

    let snapshot: PathBuf = std::env::var("FINDBACK_STATE_PATH")
        .unwrap_or_else(|_| "findback-state.bin".to_string())
        .into();
    let mut service = persistence::load_state(&snapshot);

    let resolver = Arc::new(StaticTokenResolver::new());
    if std::env::var("FINDBACK_DEV_SEED").is_ok() {
        // Dev convenience: two principals and one open item, with fixed
        // tokens "owner" and "finder".
        let owner = Uuid::new_v4();
        let finder = Uuid::new_v4();
        let item = Uuid::new_v4();
        resolver.register("owner", owner, Role::User);
        resolver.register("finder", finder, Role::User);
        service.upsert_item(ItemRecord {
            id: item,
            owner_id: owner,
            status: ItemStatus::Active,
        });
        tracing::info!(%owner, %finder, %item, "seeded dev principals and item");
    }

    let state = AppState::new(service, resolver, Arc::new(InMemoryFileStore::new()));

    tracing::info!("findback API listening on http://{}", addr);
    web_api::run_http_server(addr, state).await;
}
