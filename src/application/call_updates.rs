//! Compare-and-swap merges on call records

use crate::domain::call::{Call, CallRepository};
use crate::domain::shared::{CallId, DomainError, Result};
use tracing::debug;

const MAX_MERGE_ATTEMPTS: usize = 16;

/// Result of a merge
#[derive(Debug)]
pub enum Merge<T> {
    /// No call with that id
    Missing,
    /// The merge had nothing to do
    Unchanged(Call),
    /// The merge was stored
    Applied(Call, T),
}

/// Load a call, apply `apply` to a copy and store it if the record was not
/// changed underneath us. `apply` returns `None` when there is nothing to
/// write and may be re-run after a version conflict.
pub async fn merge_call<T, F>(calls: &dyn CallRepository, id: CallId, mut apply: F) -> Result<Merge<T>>
where
    F: FnMut(&mut Call) -> Option<T>,
{
    for attempt in 0..MAX_MERGE_ATTEMPTS {
        let Some(current) = calls.get(id).await? else {
            return Ok(Merge::Missing);
        };

        let mut updated = current.clone();
        let Some(outcome) = apply(&mut updated) else {
            return Ok(Merge::Unchanged(current));
        };

        if calls.update(&updated).await? {
            updated.version += 1;
            return Ok(Merge::Applied(updated, outcome));
        }
        debug!("Version conflict on call {} (attempt {})", id, attempt + 1);
    }

    Err(DomainError::Conflict(format!(
        "call {} kept changing during update",
        id
    )))
}
