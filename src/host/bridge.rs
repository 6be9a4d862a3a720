//! Browser capabilities backed by the host event stream.
//!
//! The shell owns the real tabs and the toolbar badge. It keeps the bridge's
//! mirror of open tabs current through `browser.tabs_sync` and
//! `browser.tab_closed`; reload and badge requests flow back to it as
//! events on the shared broadcast channel.

use crate::error::{RefreshError, Result};
use crate::host::contract::{
    EVENT_BADGE_CLEARED, EVENT_BADGE_SET, EVENT_RELOAD_REQUESTED, EventEnvelope,
};
use crate::platform::{BrowserTab, StatusIndicator, TabApi};
use crate::scheduler::state::TabId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Default)]
struct TabMirror {
    tabs: HashMap<TabId, BrowserTab>,
    active: Option<TabId>,
}

/// [`TabApi`] and [`StatusIndicator`] implemented over host events.
pub struct BrowserBridge {
    mirror: Mutex<TabMirror>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl BrowserBridge {
    #[must_use]
    pub fn new(event_tx: broadcast::Sender<EventEnvelope>) -> Self {
        Self {
            mirror: Mutex::new(TabMirror::default()),
            event_tx,
        }
    }

    /// Replace the mirror with the shell's current view.
    pub fn sync(&self, tabs: Vec<BrowserTab>, active: Option<TabId>) {
        let mut mirror = self.lock();
        mirror.tabs = tabs.into_iter().map(|t| (t.id, t)).collect();
        let active = active.filter(|id| mirror.tabs.contains_key(id));
        mirror.active = active;
        debug!(open = mirror.tabs.len(), active = ?mirror.active, "tab mirror synced");
    }

    /// Drop a closed tab from the mirror.
    pub fn forget(&self, tab_id: TabId) {
        let mut mirror = self.lock();
        mirror.tabs.remove(&tab_id);
        if mirror.active == Some(tab_id) {
            mirror.active = None;
        }
    }

    /// Number of tabs the shell last reported open.
    #[must_use]
    pub fn open_tab_count(&self) -> usize {
        self.lock().tabs.len()
    }

    fn lock(&self) -> MutexGuard<'_, TabMirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        // No subscribers just means no shell is listening yet.
        let _ = self.event_tx.send(EventEnvelope::fresh(event, payload));
    }
}

#[async_trait]
impl TabApi for BrowserBridge {
    async fn active_tab(&self) -> Result<Option<BrowserTab>> {
        let mirror = self.lock();
        Ok(mirror.active.and_then(|id| mirror.tabs.get(&id).cloned()))
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<Option<BrowserTab>> {
        Ok(self.lock().tabs.get(&tab_id).cloned())
    }

    async fn reload(&self, tab_id: TabId, bypass_cache: bool) -> Result<()> {
        if !self.lock().tabs.contains_key(&tab_id) {
            return Err(RefreshError::Tab(format!("tab {tab_id} is not open")));
        }
        self.emit(
            EVENT_RELOAD_REQUESTED,
            serde_json::json!({"tabId": tab_id, "bypassCache": bypass_cache}),
        );
        Ok(())
    }
}

impl StatusIndicator for BrowserBridge {
    fn set_badge(&self, text: &str, color: &str) -> Result<()> {
        self.emit(
            EVENT_BADGE_SET,
            serde_json::json!({"text": text, "color": color}),
        );
        Ok(())
    }

    fn clear_badge(&self) -> Result<()> {
        self.emit(EVENT_BADGE_CLEARED, serde_json::json!({}));
        Ok(())
    }
}
