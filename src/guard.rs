use chrono::{DateTime, Duration, Utc};

use crate::state::ServiceState;
use crate::types::UserId;

/// Sliding-window count of a claimant's recent submissions. Stateless scan
/// over the claim store; correctness follows from store queryability, no
/// separate counters to keep in sync.
pub fn count_recent(
    state: &ServiceState,
    claimant_id: UserId,
    window: Duration,
    now: DateTime<Utc>,
) -> usize {
    let cutoff = now - window;
    state
        .claim_by_id
        .values()
        .filter(|c| c.claimant_id == claimant_id && c.created_at >= cutoff)
        .count()
}
