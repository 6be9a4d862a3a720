//! Human-facing formatting: shortened URLs and titles, countdowns, and the
//! status summary shown by the popup.

use crate::scheduler::state::{RefreshState, TabId};
use serde::Serialize;

/// Badge background while a run is active.
pub const BADGE_COLOR_ON: &str = "#10b981";

/// Placeholder for missing values.
pub const PLACEHOLDER: &str = "--";

/// Title length limit used by the popup list.
pub const SUMMARY_TITLE_LIMIT: usize = 30;

/// Host of `url` without a leading `www.`, truncated to 20 characters.
///
/// Unparsable URLs fall back to their first 20 characters. Used as the
/// title of tabs added without one.
#[must_use]
pub fn shorten_url(url: &str) -> String {
    if url.is_empty() {
        return PLACEHOLDER.to_owned();
    }
    match host_of(url) {
        Some(host) => truncate(&host, 20),
        None => url.chars().take(20).collect(),
    }
}

/// Host of `url` without a leading `www.`, or the placeholder.
#[must_use]
pub fn display_host(url: &str) -> String {
    host_of(url).unwrap_or_else(|| PLACEHOLDER.to_owned())
}

/// Truncate `title` to `limit` characters, ending in `...` when cut.
#[must_use]
pub fn shorten_title(title: &str, limit: usize) -> String {
    if title.is_empty() {
        return PLACEHOLDER.to_owned();
    }
    truncate(title, limit)
}

/// Countdown from `now_ms` to `target_ms`: `--`, `Now`, `42s` or `5m 07s`.
#[must_use]
pub fn format_countdown(target_ms: Option<u64>, now_ms: u64) -> String {
    let Some(target) = target_ms else {
        return PLACEHOLDER.to_owned();
    };
    if target <= now_ms {
        return "Now".to_owned();
    }
    let secs = (target - now_ms).saturating_add(500) / 1000;
    if secs < 60 {
        return format!("{secs}s");
    }
    format!("{}m {:02}s", secs / 60, secs % 60)
}

/// Badge text for a running scheduler.
#[must_use]
pub fn badge_text(tab_count: usize) -> String {
    if tab_count == 0 {
        "ON".to_owned()
    } else {
        tab_count.to_string()
    }
}

fn host_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_owned())
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_owned();
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// One row of the tracked-tab list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRow {
    pub tab_id: TabId,
    /// 1-based position in the list.
    pub position: usize,
    pub title: String,
    pub host: String,
    pub is_next: bool,
}

/// Popup view model derived from a state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    /// `Running` or `Idle`.
    pub status: String,
    pub is_running: bool,
    pub countdown: String,
    /// Host of the next target tab, or the placeholder.
    pub next_tab: String,
    pub run_count: u64,
    pub tab_count: usize,
    pub min_seconds: u32,
    pub max_seconds: u32,
    pub cache_bust: bool,
    pub tabs: Vec<TabRow>,
}

impl StatusSummary {
    #[must_use]
    pub fn from_state(state: &RefreshState, now_ms: u64) -> Self {
        let running = state.is_running;
        let next_id = if running { state.next_tab_id } else { None };

        let next_tab = next_id
            .and_then(|id| state.find_tab(id))
            .map_or_else(|| PLACEHOLDER.to_owned(), |t| display_host(&t.url));
        let countdown = if running {
            format_countdown(state.next_run_at, now_ms)
        } else {
            PLACEHOLDER.to_owned()
        };

        let tabs = state
            .tabs
            .iter()
            .enumerate()
            .map(|(i, t)| TabRow {
                tab_id: t.tab_id,
                position: i + 1,
                title: shorten_title(&t.title, SUMMARY_TITLE_LIMIT),
                host: display_host(&t.url),
                is_next: state.next_tab_id == Some(t.tab_id),
            })
            .collect();

        Self {
            status: if running { "Running" } else { "Idle" }.to_owned(),
            is_running: running,
            countdown,
            next_tab,
            run_count: state.run_count,
            tab_count: state.tabs.len(),
            min_seconds: state.min_seconds,
            max_seconds: state.max_seconds,
            cache_bust: state.cache_bust,
            tabs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::state::TrackedTab;

    #[test]
    fn shorten_url_strips_www_and_path() {
        assert_eq!(shorten_url("https://www.example.com/a/b?c=d"), "example.com");
    }

    #[test]
    fn shorten_url_truncates_long_hosts() {
        assert_eq!(
            shorten_url("https://a-very-long-subdomain.example.com/"),
            "a-very-long-subdo..."
        );
    }

    #[test]
    fn shorten_url_falls_back_to_prefix() {
        assert_eq!(shorten_url("not a url at all, clearly"), "not a url at all, cl");
        assert_eq!(shorten_url(""), "--");
    }

    #[test]
    fn display_host_placeholder_on_garbage() {
        assert_eq!(display_host("::::"), "--");
        assert_eq!(display_host("https://www.rust-lang.org/learn"), "rust-lang.org");
    }

    #[test]
    fn shorten_title_respects_limit() {
        assert_eq!(shorten_title("short", 30), "short");
        let long = "x".repeat(40);
        let out = shorten_title(&long, 30);
        assert_eq!(out.chars().count(), 30);
        assert!(out.ends_with("..."));
        assert_eq!(shorten_title("", 30), "--");
    }

    #[test]
    fn shorten_title_is_char_safe() {
        let title = "日本語のタイトルがとても長い場合の表示テストです。さらに続きます";
        let out = shorten_title(title, 10);
        assert_eq!(out.chars().count(), 10);
    }

    #[test]
    fn countdown_formats() {
        assert_eq!(format_countdown(None, 0), "--");
        assert_eq!(format_countdown(Some(1_000), 2_000), "Now");
        assert_eq!(format_countdown(Some(42_000), 0), "42s");
        assert_eq!(format_countdown(Some(307_000), 0), "5m 07s");
        assert_eq!(format_countdown(Some(60_000), 0), "1m 00s");
    }

    #[test]
    fn badge_text_uses_count() {
        assert_eq!(badge_text(0), "ON");
        assert_eq!(badge_text(3), "3");
    }

    #[test]
    fn summary_marks_next_tab_when_running() {
        let state = RefreshState {
            tabs: vec![
                TrackedTab {
                    tab_id: TabId(1),
                    url: "https://www.alpha.test/".to_owned(),
                    title: "Alpha".to_owned(),
                    added_at: 0,
                },
                TrackedTab {
                    tab_id: TabId(2),
                    url: "https://beta.test/".to_owned(),
                    title: "Beta".to_owned(),
                    added_at: 0,
                },
            ],
            is_running: true,
            next_tab_id: Some(TabId(2)),
            next_run_at: Some(95_000),
            run_count: 4,
            ..RefreshState::default()
        };
        let summary = StatusSummary::from_state(&state, 5_000);
        assert_eq!(summary.status, "Running");
        assert_eq!(summary.countdown, "1m 30s");
        assert_eq!(summary.next_tab, "beta.test");
        assert_eq!(summary.tab_count, 2);
        assert_eq!(summary.tabs[0].host, "alpha.test");
        assert!(!summary.tabs[0].is_next);
        assert!(summary.tabs[1].is_next);
        assert_eq!(summary.tabs[1].position, 2);
    }

    #[test]
    fn idle_summary_has_placeholders() {
        let summary = StatusSummary::from_state(&RefreshState::default(), 0);
        assert_eq!(summary.status, "Idle");
        assert_eq!(summary.countdown, "--");
        assert_eq!(summary.next_tab, "--");
        assert!(summary.tabs.is_empty());
    }
}
