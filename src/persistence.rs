use std::io;
use std::path::Path;

use crate::state::ServiceState;

/// Missing or unreadable snapshots start the service from an empty state.
pub fn load_state(path: &Path) -> ServiceState {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| bincode::deserialize::<ServiceState>(&bytes).ok())
        .unwrap_or_default()
}

pub fn save_state(path: &Path, state: &ServiceState) -> io::Result<()> {
    let bytes = bincode::serialize(state).map_err(io::Error::other)?;
    std::fs::write(path, bytes)
}
