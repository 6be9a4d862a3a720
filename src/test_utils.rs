//! In-memory fakes for every platform capability.
//!
//! Shared by unit tests and the integration tests under `tests/`, so the
//! scheduler and command server can be driven without a browser, a real
//! timer, or a disk.

use crate::error::{RefreshError, Result};
use crate::platform::{AlarmClock, BrowserTab, Clock, StateStore, StatusIndicator, TabApi};
use crate::scheduler::state::TabId;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct FakeTabsInner {
    open: BTreeMap<TabId, BrowserTab>,
    active: Option<TabId>,
    hung_probes: HashSet<TabId>,
    failing_probes: HashSet<TabId>,
    hung_reloads: HashSet<TabId>,
    failing_reloads: HashSet<TabId>,
    reloads: Vec<(TabId, bool)>,
}

/// Scriptable browser: open tabs, an active tab, and per-tab failures.
#[derive(Debug, Clone, Default)]
pub struct FakeTabs {
    inner: Arc<Mutex<FakeTabsInner>>,
}

impl FakeTabs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a tab (or replace its URL and title).
    pub fn open(&self, id: TabId, url: &str, title: &str) {
        lock(&self.inner).open.insert(
            id,
            BrowserTab {
                id,
                url: Some(url.to_owned()),
                title: Some(title.to_owned()),
            },
        );
    }

    /// Open a tab and focus it.
    pub fn open_active(&self, id: TabId, url: &str, title: &str) {
        self.open(id, url, title);
        lock(&self.inner).active = Some(id);
    }

    /// Focus an arbitrary tab record, even one with no URL.
    pub fn set_active_tab(&self, tab: BrowserTab) {
        let mut inner = lock(&self.inner);
        inner.active = Some(tab.id);
        inner.open.insert(tab.id, tab);
    }

    /// Close a tab.
    pub fn close(&self, id: TabId) {
        let mut inner = lock(&self.inner);
        inner.open.remove(&id);
        if inner.active == Some(id) {
            inner.active = None;
        }
    }

    /// Make liveness probes for `id` never complete.
    pub fn hang_probe(&self, id: TabId) {
        lock(&self.inner).hung_probes.insert(id);
    }

    /// Make liveness probes for `id` return an error.
    pub fn fail_probe(&self, id: TabId) {
        lock(&self.inner).failing_probes.insert(id);
    }

    /// Make reloads of `id` never complete.
    pub fn hang_reload(&self, id: TabId) {
        lock(&self.inner).hung_reloads.insert(id);
    }

    /// Make reloads of `id` fail while the tab still probes alive.
    pub fn fail_reload(&self, id: TabId) {
        lock(&self.inner).failing_reloads.insert(id);
    }

    /// Reloads performed so far as `(tab, bypass_cache)`.
    #[must_use]
    pub fn reloads(&self) -> Vec<(TabId, bool)> {
        lock(&self.inner).reloads.clone()
    }
}

#[async_trait]
impl TabApi for FakeTabs {
    async fn active_tab(&self) -> Result<Option<BrowserTab>> {
        let inner = lock(&self.inner);
        Ok(inner.active.and_then(|id| inner.open.get(&id).cloned()))
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<Option<BrowserTab>> {
        let (hang, fail, tab) = {
            let inner = lock(&self.inner);
            (
                inner.hung_probes.contains(&tab_id),
                inner.failing_probes.contains(&tab_id),
                inner.open.get(&tab_id).cloned(),
            )
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(RefreshError::Tab(format!("probe failed for tab {tab_id}")));
        }
        Ok(tab)
    }

    async fn reload(&self, tab_id: TabId, bypass_cache: bool) -> Result<()> {
        let hang = lock(&self.inner).hung_reloads.contains(&tab_id);
        if hang {
            std::future::pending::<()>().await;
        }
        let mut inner = lock(&self.inner);
        if inner.failing_reloads.contains(&tab_id) || !inner.open.contains_key(&tab_id) {
            return Err(RefreshError::Tab(format!("no tab with id: {tab_id}")));
        }
        inner.reloads.push((tab_id, bypass_cache));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AlarmInner {
    armed: BTreeMap<String, Duration>,
    arm_calls: usize,
    cancel_calls: usize,
}

/// Alarm clock that only records arm/cancel calls. Tests fire ticks
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlarmClock {
    inner: Arc<Mutex<AlarmInner>>,
    fail_arm: Arc<AtomicBool>,
}

impl RecordingAlarmClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently armed delay for `name`.
    #[must_use]
    pub fn armed(&self, name: &str) -> Option<Duration> {
        lock(&self.inner).armed.get(name).copied()
    }

    #[must_use]
    pub fn arm_calls(&self) -> usize {
        lock(&self.inner).arm_calls
    }

    #[must_use]
    pub fn cancel_calls(&self) -> usize {
        lock(&self.inner).cancel_calls
    }

    /// Make subsequent `arm` calls fail.
    pub fn set_fail_arm(&self, fail: bool) {
        self.fail_arm.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AlarmClock for RecordingAlarmClock {
    async fn arm(&self, name: &str, delay: Duration) -> Result<()> {
        if self.fail_arm.load(Ordering::SeqCst) {
            return Err(RefreshError::Alarm("alarm service unavailable".to_owned()));
        }
        let mut inner = lock(&self.inner);
        inner.arm_calls += 1;
        inner.armed.insert(name.to_owned(), delay);
        Ok(())
    }

    async fn cancel(&self, name: &str) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.cancel_calls += 1;
        inner.armed.remove(name);
        Ok(())
    }
}

/// Badge that remembers its last text and color.
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    badge: Arc<Mutex<Option<(String, String)>>>,
}

impl RecordingIndicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current `(text, color)`, `None` when cleared.
    #[must_use]
    pub fn badge(&self) -> Option<(String, String)> {
        lock(&self.badge).clone()
    }
}

impl StatusIndicator for RecordingIndicator {
    fn set_badge(&self, text: &str, color: &str) -> Result<()> {
        *lock(&self.badge) = Some((text.to_owned(), color.to_owned()));
        Ok(())
    }

    fn clear_badge(&self) -> Result<()> {
        *lock(&self.badge) = None;
        Ok(())
    }
}

/// Manually advanced clock.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Store whose writes always fail; reads return nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

#[async_trait]
impl StateStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>> {
        Err(RefreshError::Store("storage unavailable".to_owned()))
    }

    async fn set(&self, _key: &str, _value: serde_json::Value) -> Result<()> {
        Err(RefreshError::Store("storage unavailable".to_owned()))
    }
}
