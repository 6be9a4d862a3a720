//! Run/stop state machine for randomized tab refreshing.
//!
//! The [`Scheduler`] owns no state of its own beyond its capabilities and
//! random source: every operation loads the persisted [`RefreshState`],
//! computes the next record, and writes it back. Callers must run one
//! operation at a time (the host command server does this by owning the
//! scheduler inside a single task).

use crate::display::{BADGE_COLOR_ON, badge_text, shorten_url};
use crate::error::{RefreshError, Result};
use crate::platform::{
    AlarmClock, BrowserTab, Clock, MIN_ALARM_DELAY, StateStore, StatusIndicator, SystemClock,
    TabApi,
};
use crate::scheduler::delay::sample_for;
use crate::scheduler::registry::{self, filter_alive, is_tab_alive, pick_random};
use crate::scheduler::settings::{IntervalSettings, SettingsPatch, apply_patch};
use crate::scheduler::state::{RefreshState, TabId, TrackedTab};
use crate::store::{STATE_KEY, load_state, save_state};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Name of the refresh alarm.
pub const ALARM_NAME: &str = "autoRefresherAlarm";

/// URL prefixes of pages that can never be tracked or reloaded.
pub const PROTECTED_URL_PREFIXES: [&str; 5] = [
    "chrome://",
    "chrome-extension://",
    "edge://",
    "about:",
    "file://",
];

/// Default bound on a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on a single reload request.
pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Firings earlier than this before `nextRunAt` are treated as duplicates.
const EARLY_TICK_TOLERANCE_MS: u64 = 1_000;

/// Returns `true` for pages under a protected scheme.
#[must_use]
pub fn is_protected_url(url: &str) -> bool {
    PROTECTED_URL_PREFIXES.iter().any(|p| url.starts_with(p))
}

/// Capabilities the scheduler drives.
#[derive(Clone)]
pub struct Platform {
    pub store: Arc<dyn StateStore>,
    pub alarms: Arc<dyn AlarmClock>,
    pub tabs: Arc<dyn TabApi>,
    pub indicator: Arc<dyn StatusIndicator>,
    pub clock: Arc<dyn Clock>,
}

impl Platform {
    /// Bundle capabilities, using the system clock.
    pub fn new(
        store: Arc<dyn StateStore>,
        alarms: Arc<dyn AlarmClock>,
        tabs: Arc<dyn TabApi>,
        indicator: Arc<dyn StatusIndicator>,
    ) -> Self {
        Self {
            store,
            alarms,
            tabs,
            indicator,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Keyboard shortcuts bound by the browser shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    /// `toggle-auto-refresher`
    Toggle,
    /// `refresh-now`
    RefreshNow,
}

impl Shortcut {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "toggle-auto-refresher" => Some(Self::Toggle),
            "refresh-now" => Some(Self::RefreshNow),
            _ => None,
        }
    }
}

/// Why a tick ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The record said running but held no tabs.
    NoTabs,
    /// Every tracked tab failed its liveness probe.
    AllTabsClosed,
    /// The reload of the last alive tab failed.
    LastTabFailed,
    /// The next alarm could not be armed.
    AlarmFailed,
}

/// Result of one timer firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// No run is active; nothing happened.
    Idle,
    /// Fired well before `nextRunAt`; re-armed for the remainder.
    Deferred { remaining_ms: u64 },
    /// The run was stopped.
    Stopped { reason: StopReason },
    /// A tab was targeted and the next refresh scheduled.
    Refreshed {
        tab_id: TabId,
        reloaded: bool,
        next_tab_id: Option<TabId>,
        delay_secs: u32,
    },
}

/// Randomized multi-tab refresh scheduler.
pub struct Scheduler {
    platform: Platform,
    rng: StdRng,
    state_key: String,
    probe_timeout: Duration,
    reload_timeout: Duration,
}

impl Scheduler {
    /// Create a scheduler with an entropy-seeded random source.
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            rng: StdRng::from_entropy(),
            state_key: STATE_KEY.to_owned(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            reload_timeout: DEFAULT_RELOAD_TIMEOUT,
        }
    }

    /// Replace the random source (seeded sources make runs reproducible).
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Override the liveness-probe and reload timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, probe: Duration, reload: Duration) -> Self {
        self.probe_timeout = probe;
        self.reload_timeout = reload;
        self
    }

    /// Override the store key the record lives under.
    #[must_use]
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self
    }

    /// Current time in epoch milliseconds.
    #[must_use]
    pub fn now_millis(&self) -> u64 {
        self.platform.clock.now_millis()
    }

    /// Current persisted state.
    pub async fn state(&self) -> RefreshState {
        load_state(self.platform.store.as_ref(), &self.state_key).await
    }

    /// Merge, clamp and persist a settings update. The schedule is untouched.
    pub async fn update_settings(&mut self, patch: &SettingsPatch) -> RefreshState {
        let state = self.state().await;
        let next = apply_patch(&state, patch);
        self.persist(&next).await;
        next
    }

    /// Track the browser's active tab.
    pub async fn add_active_tab(&mut self) -> Result<RefreshState> {
        let state = self.state().await;
        let Some(tab) = self.eligible_active_tab().await else {
            return Err(RefreshError::ProtectedUrl);
        };

        let url = tab.url.unwrap_or_default();
        let title = tab
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| shorten_url(&url));
        let tracked = TrackedTab {
            tab_id: tab.id,
            url,
            title,
            added_at: self.now_millis(),
        };

        let tabs = registry::add_tab(&state.tabs, tracked)?;
        let next = RefreshState { tabs, ..state };
        self.persist(&next).await;
        if next.is_running {
            self.show_running_badge(next.tabs.len());
        }
        info!(tab_id = %tab.id, count = next.tabs.len(), "tab added");
        Ok(next)
    }

    /// Stop tracking a tab. Removing the upcoming target picks another; removing
    /// the last tab of a run stops it.
    pub async fn remove_tab(&mut self, tab_id: TabId) -> RefreshState {
        let state = self.state().await;
        let tabs = registry::remove_tab(&state.tabs, tab_id);
        let mut next = RefreshState {
            tabs,
            ..state.clone()
        };

        if state.is_running {
            if next.tabs.is_empty() {
                info!(tab_id = %tab_id, "last tab removed; stopping");
                next.mark_stopped();
                self.disarm().await;
                self.clear_badge();
            } else {
                if state.next_tab_id == Some(tab_id) {
                    next.next_tab_id = pick_random(&next.tabs, &mut self.rng).map(|t| t.tab_id);
                    debug!(tab_id = %tab_id, next = ?next.next_tab_id, "retargeted next refresh");
                }
                self.show_running_badge(next.tabs.len());
            }
        }

        self.persist(&next).await;
        next
    }

    /// Forget every tab and stop.
    pub async fn clear_tabs(&mut self) -> RefreshState {
        let state = self.state().await;
        let mut next = RefreshState {
            tabs: Vec::new(),
            ..state
        };
        next.mark_stopped();
        self.disarm().await;
        self.persist(&next).await;
        self.clear_badge();
        info!("all tabs cleared");
        next
    }

    /// Start (or restart) a run.
    ///
    /// Fails with [`RefreshError::NoTabs`] or [`RefreshError::AllTabsClosed`]
    /// without touching the persisted record.
    pub async fn start(&mut self, patch: &SettingsPatch) -> Result<RefreshState> {
        let current = self.state().await;
        let merged = apply_patch(&current, patch);

        if merged.tabs.is_empty() {
            return Err(RefreshError::NoTabs);
        }

        let alive = filter_alive(
            &merged.tabs,
            self.platform.tabs.as_ref(),
            self.probe_timeout,
        )
        .await;
        let Some(first) = pick_random(&alive, &mut self.rng).map(|t| t.tab_id) else {
            return Err(RefreshError::AllTabsClosed);
        };

        let delay_secs = sample_for(&mut self.rng, IntervalSettings::of(&merged));
        self.arm(secs(delay_secs)).await?;

        let now = self.now_millis();
        let dropped = merged.tabs.len() - alive.len();
        let next = RefreshState {
            tabs: alive,
            is_running: true,
            next_tab_id: Some(first),
            next_run_at: Some(now.saturating_add(millis(delay_secs))),
            started_at: Some(now),
            run_count: 0,
            ..merged
        };

        self.persist(&next).await;
        self.show_running_badge(next.tabs.len());
        info!(
            tabs = next.tabs.len(),
            dropped,
            delay_secs,
            next_tab = %first,
            "auto-refresh started"
        );
        Ok(next)
    }

    /// Stop the run. Safe to call when idle.
    pub async fn stop(&mut self) -> RefreshState {
        let mut next = self.state().await;
        let was_running = next.is_running;
        next.mark_stopped();
        self.disarm().await;
        self.persist(&next).await;
        self.clear_badge();
        if was_running {
            info!(run_count = next.run_count, "auto-refresh stopped");
        }
        next
    }

    /// Stop when running, start otherwise.
    pub async fn toggle(&mut self, patch: &SettingsPatch) -> Result<RefreshState> {
        if self.state().await.is_running {
            Ok(self.stop().await)
        } else {
            self.start(patch).await
        }
    }

    /// Reload one tab right away without touching the schedule.
    ///
    /// With tracked tabs a random one is reloaded; otherwise the active tab,
    /// when it is not protected. Failures are logged and swallowed.
    pub async fn refresh_now(&mut self) -> RefreshState {
        let state = self.state().await;

        if state.tabs.is_empty() {
            match self.eligible_active_tab().await {
                Some(tab) => {
                    if let Err(e) = self.reload(tab.id, state.cache_bust).await {
                        warn!(tab_id = %tab.id, error = %e, "refresh-now failed");
                    }
                }
                None => debug!("refresh-now: no eligible active tab"),
            }
            return state;
        }

        let Some(target) = pick_random(&state.tabs, &mut self.rng).map(|t| t.tab_id) else {
            return state;
        };
        if is_tab_alive(self.platform.tabs.as_ref(), target, self.probe_timeout).await {
            if let Err(e) = self.reload(target, state.cache_bust).await {
                warn!(tab_id = %target, error = %e, "refresh-now failed");
            }
        } else {
            debug!(tab_id = %target, "refresh-now target is gone");
        }
        state
    }

    /// Zero the refresh counter. A running session restarts its clock.
    pub async fn reset_counter(&mut self) -> RefreshState {
        let state = self.state().await;
        let started_at = state.is_running.then(|| self.now_millis());
        let next = RefreshState {
            run_count: 0,
            started_at,
            ..state
        };
        self.persist(&next).await;
        next
    }

    /// Handle one firing of the refresh alarm.
    pub async fn tick(&mut self) -> TickOutcome {
        let state = self.state().await;
        if !state.is_running {
            debug!("tick while idle; ignoring");
            return TickOutcome::Idle;
        }
        if state.tabs.is_empty() {
            self.halt(state).await;
            return TickOutcome::Stopped {
                reason: StopReason::NoTabs,
            };
        }

        let now = self.now_millis();
        if let Some(due) = state.next_run_at {
            if now.saturating_add(EARLY_TICK_TOLERANCE_MS) < due {
                let remaining_ms = due - now;
                debug!(remaining_ms, "early tick; re-arming for remainder");
                if let Err(e) = self.arm(Duration::from_millis(remaining_ms)).await {
                    error!(error = %e, "cannot re-arm after early tick; stopping");
                    self.halt(state).await;
                    return TickOutcome::Stopped {
                        reason: StopReason::AlarmFailed,
                    };
                }
                return TickOutcome::Deferred { remaining_ms };
            }
        }

        let mut alive = filter_alive(
            &state.tabs,
            self.platform.tabs.as_ref(),
            self.probe_timeout,
        )
        .await;
        if alive.is_empty() {
            info!("all tabs closed; stopping");
            self.halt(RefreshState {
                tabs: alive,
                ..state
            })
            .await;
            return TickOutcome::Stopped {
                reason: StopReason::AllTabsClosed,
            };
        }

        let planned = state
            .next_tab_id
            .and_then(|id| alive.iter().find(|t| t.tab_id == id));
        let target = match planned {
            Some(tab) => tab.clone(),
            None => match pick_random(&alive, &mut self.rng) {
                Some(tab) => tab.clone(),
                None => {
                    return TickOutcome::Stopped {
                        reason: StopReason::AllTabsClosed,
                    };
                }
            },
        };

        let reloaded = match self.reload(target.tab_id, state.cache_bust).await {
            Ok(()) => {
                info!(tab_id = %target.tab_id, url = %target.url, "refreshed tab");
                true
            }
            Err(e) => {
                warn!(tab_id = %target.tab_id, error = %e, "reload failed; dropping tab");
                alive = registry::remove_tab(&alive, target.tab_id);
                if alive.is_empty() {
                    self.halt(RefreshState {
                        tabs: alive,
                        ..state
                    })
                    .await;
                    return TickOutcome::Stopped {
                        reason: StopReason::LastTabFailed,
                    };
                }
                false
            }
        };

        let next_tab_id = pick_random(&alive, &mut self.rng).map(|t| t.tab_id);
        let delay_secs = sample_for(&mut self.rng, IntervalSettings::of(&state));
        let now = self.now_millis();
        let mut next = RefreshState {
            tabs: alive,
            run_count: state.run_count.saturating_add(1),
            next_tab_id,
            next_run_at: Some(now.saturating_add(millis(delay_secs))),
            last_refreshed_tab_id: Some(target.tab_id),
            ..state
        };

        if let Err(e) = self.arm(secs(delay_secs)).await {
            error!(error = %e, "cannot arm next refresh; stopping");
            next.mark_stopped();
            self.persist(&next).await;
            self.clear_badge();
            return TickOutcome::Stopped {
                reason: StopReason::AlarmFailed,
            };
        }

        self.persist(&next).await;
        self.show_running_badge(next.tabs.len());
        TickOutcome::Refreshed {
            tab_id: target.tab_id,
            reloaded,
            next_tab_id,
            delay_secs,
        }
    }

    /// A browser tab was closed. Tracked tabs are removed; others ignored.
    pub async fn handle_tab_closed(&mut self, tab_id: TabId) -> Option<RefreshState> {
        if !self.state().await.contains_tab(tab_id) {
            return None;
        }
        info!(tab_id = %tab_id, "tracked tab closed; removing");
        Some(self.remove_tab(tab_id).await)
    }

    /// Run a keyboard shortcut. Start failures are logged, not returned.
    pub async fn handle_shortcut(&mut self, shortcut: Shortcut) -> RefreshState {
        match shortcut {
            Shortcut::Toggle => match self.toggle(&SettingsPatch::default()).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "cannot start via shortcut");
                    self.state().await
                }
            },
            Shortcut::RefreshNow => self.refresh_now().await,
        }
    }

    /// Install/upgrade hook: cancel the alarm and leave the scheduler idle.
    pub async fn on_installed(&mut self) -> RefreshState {
        self.disarm().await;
        let state = if self.state().await.is_running {
            self.stop().await
        } else {
            self.state().await
        };
        self.clear_badge();
        state
    }

    /// Process-start hook: pick up a persisted run where it left off.
    ///
    /// The in-process alarm does not survive a restart, so a resumed run is
    /// re-armed for whatever remains until `nextRunAt`.
    pub async fn resume(&mut self) -> RefreshState {
        let state = self.state().await;
        if !state.is_running {
            return state;
        }
        if state.tabs.is_empty() {
            return self.stop().await;
        }

        let mut any_alive = false;
        for tab in &state.tabs {
            if is_tab_alive(self.platform.tabs.as_ref(), tab.tab_id, self.probe_timeout).await {
                any_alive = true;
                break;
            }
        }
        if !any_alive {
            info!("no tracked tab survived the restart; stopping");
            return self.stop().await;
        }

        let mut next = state;
        let target_known = next.next_tab_id.is_some_and(|id| next.contains_tab(id));
        if !target_known {
            next.next_tab_id = pick_random(&next.tabs, &mut self.rng).map(|t| t.tab_id);
        }

        let now = self.now_millis();
        let remaining_ms = next.next_run_at.map_or(0, |due| due.saturating_sub(now));
        let delay = Duration::from_millis(remaining_ms).max(MIN_ALARM_DELAY);
        if let Err(e) = self.arm(delay).await {
            error!(error = %e, "cannot re-arm resumed run; stopping");
            return self.stop().await;
        }
        if remaining_ms == 0 {
            next.next_run_at = Some(now.saturating_add(millis_of(delay)));
        }

        self.persist(&next).await;
        self.show_running_badge(next.tabs.len());
        info!(tabs = next.tabs.len(), remaining_ms, "resumed auto-refresh");
        next
    }

    async fn eligible_active_tab(&self) -> Option<BrowserTab> {
        let active = match tokio::time::timeout(self.probe_timeout, self.platform.tabs.active_tab())
            .await
        {
            Ok(Ok(tab)) => tab,
            Ok(Err(e)) => {
                warn!(error = %e, "cannot query active tab");
                None
            }
            Err(_) => {
                warn!("active tab query timed out");
                None
            }
        }?;

        let eligible = active
            .url
            .as_deref()
            .is_some_and(|url| !url.is_empty() && !is_protected_url(url));
        eligible.then_some(active)
    }

    async fn reload(&self, tab_id: TabId, bypass_cache: bool) -> Result<()> {
        match tokio::time::timeout(
            self.reload_timeout,
            self.platform.tabs.reload(tab_id, bypass_cache),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RefreshError::Timeout(format!(
                "reload of tab {tab_id} exceeded {}ms",
                self.reload_timeout.as_millis()
            ))),
        }
    }

    /// Stop a run from inside a tick, persisting `state` as the base record.
    async fn halt(&mut self, mut state: RefreshState) {
        state.mark_stopped();
        self.disarm().await;
        self.persist(&state).await;
        self.clear_badge();
    }

    async fn arm(&self, delay: Duration) -> Result<()> {
        self.platform
            .alarms
            .arm(ALARM_NAME, delay.max(MIN_ALARM_DELAY))
            .await
    }

    async fn disarm(&self) {
        if let Err(e) = self.platform.alarms.cancel(ALARM_NAME).await {
            warn!(error = %e, "cannot cancel refresh alarm");
        }
    }

    async fn persist(&self, state: &RefreshState) {
        if let Err(e) = save_state(self.platform.store.as_ref(), &self.state_key, state).await {
            error!(error = %e, "cannot persist refresh state");
        }
    }

    fn show_running_badge(&self, tab_count: usize) {
        if let Err(e) = self
            .platform
            .indicator
            .set_badge(&badge_text(tab_count), BADGE_COLOR_ON)
        {
            warn!(error = %e, "cannot update badge");
        }
    }

    fn clear_badge(&self) {
        if let Err(e) = self.platform.indicator.clear_badge() {
            warn!(error = %e, "cannot clear badge");
        }
    }
}

fn secs(delay_secs: u32) -> Duration {
    Duration::from_secs(u64::from(delay_secs))
}

fn millis(delay_secs: u32) -> u64 {
    u64::from(delay_secs).saturating_mul(1_000)
}

fn millis_of(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
