//! Tracked-tab list operations.
//!
//! All operations take the current list and return a new one; the caller
//! decides when to persist.

use crate::error::{RefreshError, Result};
use crate::platform::TabApi;
use crate::scheduler::state::{TabId, TrackedTab};
use rand::Rng;
use rand::seq::SliceRandom;
use std::time::Duration;
use tracing::debug;

/// Append `tab`, rejecting a handle that is already tracked.
pub fn add_tab(tabs: &[TrackedTab], tab: TrackedTab) -> Result<Vec<TrackedTab>> {
    if tabs.iter().any(|t| t.tab_id == tab.tab_id) {
        return Err(RefreshError::DuplicateTab(tab.tab_id));
    }
    let mut next = tabs.to_vec();
    next.push(tab);
    Ok(next)
}

/// Drop the entry for `tab_id`. Unknown handles leave the list unchanged.
#[must_use]
pub fn remove_tab(tabs: &[TrackedTab], tab_id: TabId) -> Vec<TrackedTab> {
    tabs.iter().filter(|t| t.tab_id != tab_id).cloned().collect()
}

/// Uniform choice over `tabs`.
pub fn pick_random<'a, R: Rng + ?Sized>(
    tabs: &'a [TrackedTab],
    rng: &mut R,
) -> Option<&'a TrackedTab> {
    tabs.choose(rng)
}

/// Probe one tab. Errors and probes slower than `timeout` count as dead.
pub async fn is_tab_alive(api: &dyn TabApi, tab_id: TabId, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, api.get_tab(tab_id)).await {
        Ok(Ok(Some(_))) => true,
        Ok(Ok(None)) => false,
        Ok(Err(e)) => {
            debug!(tab_id = %tab_id, error = %e, "liveness probe failed");
            false
        }
        Err(_) => {
            debug!(tab_id = %tab_id, timeout_ms = timeout.as_millis(), "liveness probe timed out");
            false
        }
    }
}

/// Subsequence of `tabs` whose liveness probe succeeds, in original order.
pub async fn filter_alive(
    tabs: &[TrackedTab],
    api: &dyn TabApi,
    timeout: Duration,
) -> Vec<TrackedTab> {
    let mut alive = Vec::with_capacity(tabs.len());
    for tab in tabs {
        if is_tab_alive(api, tab.tab_id, timeout).await {
            alive.push(tab.clone());
        }
    }
    alive
}
