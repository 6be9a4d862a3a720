//! External capabilities consumed by the scheduler.
//!
//! Every collaborator the scheduler depends on (persistence, timers, the
//! browser tab API, the toolbar badge, wall-clock time) sits behind a
//! trait so the state machine runs unchanged against the real host bridge
//! or against the fakes in [`crate::test_utils`].

use crate::error::Result;
use crate::scheduler::state::TabId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A browser tab as reported by the tab API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserTab {
    pub id: TabId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Persistent key-value store. Get and set are individually atomic; there
/// are no transactions.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Replace the value stored under `key`.
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Alarms are never armed for less than this.
pub const MIN_ALARM_DELAY: Duration = Duration::from_secs(3);

/// Coarse named timer. An armed alarm fires at least once near its
/// deadline; re-arming a name replaces the previous deadline.
#[async_trait]
pub trait AlarmClock: Send + Sync {
    async fn arm(&self, name: &str, delay: Duration) -> Result<()>;
    async fn cancel(&self, name: &str) -> Result<()>;
}

/// Browser tab enumeration, liveness and reload.
#[async_trait]
pub trait TabApi: Send + Sync {
    /// The focused tab of the current window, if any.
    async fn active_tab(&self) -> Result<Option<BrowserTab>>;

    /// Look up a tab by handle. `Ok(None)` means the tab is gone.
    async fn get_tab(&self, tab_id: TabId) -> Result<Option<BrowserTab>>;

    /// Reload a tab, optionally bypassing the cache.
    async fn reload(&self, tab_id: TabId, bypass_cache: bool) -> Result<()>;
}

/// Toolbar badge (short text plus background color).
pub trait StatusIndicator: Send + Sync {
    fn set_badge(&self, text: &str, color: &str) -> Result<()>;
    fn clear_badge(&self) -> Result<()>;
}

/// Wall-clock source in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        now_epoch_millis()
    }
}

/// Current UTC milliseconds since epoch.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}
