//! Persisted run state and tracked-tab records.
//!
//! [`RefreshState`] is stored as a single JSON object whose field names
//! match the browser-side record (`minSeconds`, `nextTabId`, ...), so a
//! record written by either side can be read by the other.

use serde::{Deserialize, Deserializer, Serialize};

/// Fallback minimum interval (seconds).
pub const DEFAULT_MIN_SECONDS: u32 = 300;

/// Fallback maximum interval (seconds).
pub const DEFAULT_MAX_SECONDS: u32 = 700;

/// Jitter applied to a freshly created state (percent).
pub const DEFAULT_JITTER_PERCENT: u32 = 10;

/// Opaque browser tab handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A browser tab the user registered for cyclic refreshing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTab {
    /// Browser tab handle, unique within the tracked list.
    pub tab_id: TabId,
    /// URL at the time the tab was added.
    pub url: String,
    /// Title at the time the tab was added (shortened URL when untitled).
    pub title: String,
    /// Epoch milliseconds when the tab was added.
    pub added_at: u64,
}

/// Singleton scheduler record persisted under a fixed store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshState {
    /// Tracked tabs in insertion (display) order.
    pub tabs: Vec<TrackedTab>,
    /// Lower bound of the base refresh interval, at least 3.
    #[serde(deserialize_with = "lenient_u32")]
    pub min_seconds: u32,
    /// Upper bound of the base refresh interval, at least `min_seconds`.
    #[serde(deserialize_with = "lenient_u32")]
    pub max_seconds: u32,
    /// Jitter as a percentage of the base interval, 0..=80.
    #[serde(deserialize_with = "lenient_u32")]
    pub jitter_percent: u32,
    /// Whether reloads bypass the browser cache.
    pub cache_bust: bool,
    /// Whether a run is active.
    pub is_running: bool,
    /// Tab selected for the upcoming refresh.
    pub next_tab_id: Option<TabId>,
    /// Epoch milliseconds of the next scheduled refresh.
    pub next_run_at: Option<u64>,
    /// Epoch milliseconds when the run was (re)started.
    pub started_at: Option<u64>,
    /// Refreshes performed since the last start or reset.
    pub run_count: u64,
    /// Most recently refreshed tab.
    pub last_refreshed_tab_id: Option<TabId>,
}

/// Settings written by the browser side may be fractional or negative;
/// they are truncated and saturated into range.
fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(value) = number.as_u64() {
        return Ok(u32::try_from(value).unwrap_or(u32::MAX));
    }
    match number.as_f64() {
        Some(value) if value.is_finite() => Ok(value.clamp(0.0, f64::from(u32::MAX)) as u32),
        _ => Err(serde::de::Error::custom(format!("invalid setting value {number}"))),
    }
}

impl Default for RefreshState {
    fn default() -> Self {
        Self {
            tabs: Vec::new(),
            min_seconds: DEFAULT_MIN_SECONDS,
            max_seconds: DEFAULT_MAX_SECONDS,
            jitter_percent: DEFAULT_JITTER_PERCENT,
            cache_bust: false,
            is_running: false,
            next_tab_id: None,
            next_run_at: None,
            started_at: None,
            run_count: 0,
            last_refreshed_tab_id: None,
        }
    }
}

impl RefreshState {
    /// Returns `true` when `tab_id` is tracked.
    #[must_use]
    pub fn contains_tab(&self, tab_id: TabId) -> bool {
        self.tabs.iter().any(|t| t.tab_id == tab_id)
    }

    /// Look up a tracked tab by handle.
    #[must_use]
    pub fn find_tab(&self, tab_id: TabId) -> Option<&TrackedTab> {
        self.tabs.iter().find(|t| t.tab_id == tab_id)
    }

    /// Clear the run flag and the upcoming-refresh fields together.
    pub fn mark_stopped(&mut self) {
        self.is_running = false;
        self.next_tab_id = None;
        self.next_run_at = None;
    }

    /// Snapshot as a JSON value for response payloads and events.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn tab(id: i64) -> TrackedTab {
        TrackedTab {
            tab_id: TabId(id),
            url: format!("https://example.com/{id}"),
            title: format!("Tab {id}"),
            added_at: 1_000,
        }
    }

    #[test]
    fn default_state_matches_documented_defaults() {
        let state = RefreshState::default();
        assert!(state.tabs.is_empty());
        assert_eq!(state.min_seconds, 300);
        assert_eq!(state.max_seconds, 700);
        assert_eq!(state.jitter_percent, 10);
        assert!(!state.cache_bust);
        assert!(!state.is_running);
        assert_eq!(state.run_count, 0);
        assert!(state.next_tab_id.is_none());
    }

    #[test]
    fn serializes_with_camel_case_field_names() {
        let mut state = RefreshState::default();
        state.tabs.push(tab(7));
        state.next_tab_id = Some(TabId(7));
        let json = state.to_json();
        assert_eq!(json["minSeconds"], 300);
        assert_eq!(json["nextTabId"], 7);
        assert_eq!(json["tabs"][0]["tabId"], 7);
        assert_eq!(json["tabs"][0]["addedAt"], 1_000);
        assert!(json["nextRunAt"].is_null());
        assert!(json["lastRefreshedTabId"].is_null());
    }

    #[test]
    fn partial_record_is_merged_over_defaults() {
        let json = serde_json::json!({"isRunning": true, "runCount": 4});
        let state: RefreshState = serde_json::from_value(json).unwrap();
        assert!(state.is_running);
        assert_eq!(state.run_count, 4);
        assert_eq!(state.min_seconds, DEFAULT_MIN_SECONDS);
        assert_eq!(state.max_seconds, DEFAULT_MAX_SECONDS);
    }

    #[test]
    fn fractional_and_negative_settings_are_truncated() {
        let json = serde_json::json!({"minSeconds": 10.7, "maxSeconds": 10.5, "jitterPercent": -4});
        let state: RefreshState = serde_json::from_value(json).unwrap();
        assert_eq!(state.min_seconds, 10);
        assert_eq!(state.max_seconds, 10);
        assert_eq!(state.jitter_percent, 0);
    }

    #[test]
    fn non_numeric_setting_is_rejected() {
        let json = serde_json::json!({"minSeconds": "soon"});
        assert!(serde_json::from_value::<RefreshState>(json).is_err());
    }

    #[test]
    fn mark_stopped_clears_upcoming_refresh() {
        let mut state = RefreshState {
            is_running: true,
            next_tab_id: Some(TabId(1)),
            next_run_at: Some(5_000),
            started_at: Some(1_000),
            ..RefreshState::default()
        };
        state.mark_stopped();
        assert!(!state.is_running);
        assert!(state.next_tab_id.is_none());
        assert!(state.next_run_at.is_none());
        assert_eq!(state.started_at, Some(1_000));
    }

    #[test]
    fn find_tab_by_handle() {
        let mut state = RefreshState::default();
        state.tabs.push(tab(1));
        state.tabs.push(tab(2));
        assert!(state.contains_tab(TabId(2)));
        assert!(!state.contains_tab(TabId(3)));
        assert_eq!(state.find_tab(TabId(1)).map(|t| t.title.as_str()), Some("Tab 1"));
    }
}
