//! Key-value state stores and typed access to the persisted record.
//!
//! [`JsonFileStore`] keeps every key in one JSON object on disk and
//! replaces the file atomically (write to a sibling temp file, then
//! rename), so a crash mid-write leaves the previous record intact.

use crate::error::{RefreshError, Result};
use crate::platform::StateStore;
use crate::scheduler::state::{RefreshState, TrackedTab};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Fixed key the scheduler record is stored under.
pub const STATE_KEY: &str = "autoRefresherState";

/// Volatile store, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.values.lock().await.insert(key.to_owned(), value);
        Ok(())
    }
}

/// Store backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Map::new());
            }
            Err(e) => {
                return Err(RefreshError::Store(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(RefreshError::Store(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(RefreshError::Store(format!(
                "cannot parse {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.read_all().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut map = match self.read_all().await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "replacing unreadable state file");
                serde_json::Map::new()
            }
        };
        map.insert(key.to_owned(), value);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RefreshError::Store(format!("cannot create state dir: {e}")))?;
        }

        let json = serde_json::to_vec_pretty(&serde_json::Value::Object(map))
            .map_err(|e| RefreshError::Store(format!("cannot serialize state: {e}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| RefreshError::Store(format!("cannot write state: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| RefreshError::Store(format!("cannot replace state: {e}")))?;

        debug!(path = %self.path.display(), key, "persisted state");
        Ok(())
    }
}

/// Load the scheduler record, merged over defaults.
///
/// Read failures and non-object records yield the default record. Fields
/// that do not decode keep their default value, and tracked tabs that do
/// not decode are skipped, so one bad value never discards the whole list.
pub async fn load_state(store: &dyn StateStore, key: &str) -> RefreshState {
    match store.get(key).await {
        Ok(Some(serde_json::Value::Object(stored))) => merge_over_defaults(stored),
        Ok(Some(other)) => {
            warn!(kind = json_kind(&other), "persisted state is not an object; using defaults");
            RefreshState::default()
        }
        Ok(None) => RefreshState::default(),
        Err(e) => {
            warn!(error = %e, "cannot load persisted state; using defaults");
            RefreshState::default()
        }
    }
}

fn merge_over_defaults(stored: serde_json::Map<String, serde_json::Value>) -> RefreshState {
    let mut merged = match serde_json::to_value(RefreshState::default()) {
        Ok(serde_json::Value::Object(defaults)) => defaults,
        _ => serde_json::Map::new(),
    };

    for (field, value) in stored {
        let value = if field == "tabs" {
            decodable_tabs(value)
        } else {
            value
        };
        let previous = merged.insert(field.clone(), value);
        let candidate = serde_json::Value::Object(merged.clone());
        if let Err(e) = serde_json::from_value::<RefreshState>(candidate) {
            warn!(field = %field, error = %e, "ignoring undecodable persisted field");
            match previous {
                Some(previous) => merged.insert(field, previous),
                None => merged.remove(&field),
            };
        }
    }

    serde_json::from_value(serde_json::Value::Object(merged)).unwrap_or_default()
}

fn decodable_tabs(value: serde_json::Value) -> serde_json::Value {
    let serde_json::Value::Array(entries) = value else {
        return value;
    };
    let total = entries.len();
    let kept: Vec<serde_json::Value> = entries
        .into_iter()
        .filter(|entry| serde_json::from_value::<TrackedTab>(entry.clone()).is_ok())
        .collect();
    if kept.len() < total {
        warn!(skipped = total - kept.len(), "skipping undecodable tracked tabs");
    }
    serde_json::Value::Array(kept)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Persist the scheduler record.
pub async fn save_state(store: &dyn StateStore, key: &str, state: &RefreshState) -> Result<()> {
    let value = serde_json::to_value(state)
        .map_err(|e| RefreshError::Store(format!("cannot serialize state: {e}")))?;
    store.set(key, value).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::state::TabId;
    use crate::test_utils::FailingStore;

    fn sample_state() -> RefreshState {
        RefreshState {
            tabs: vec![TrackedTab {
                tab_id: TabId(5),
                url: "https://news.test/".to_owned(),
                title: "News".to_owned(),
                added_at: 1_700_000_000_000,
            }],
            is_running: true,
            next_tab_id: Some(TabId(5)),
            next_run_at: Some(1_700_000_060_000),
            run_count: 3,
            ..RefreshState::default()
        }
    }

    #[tokio::test]
    async fn memory_store_returns_defaults_when_empty() {
        let store = MemoryStore::new();
        assert_eq!(load_state(&store, STATE_KEY).await, RefreshState::default());
    }

    #[tokio::test]
    async fn memory_store_persists_state() {
        let store = MemoryStore::new();
        let state = sample_state();
        save_state(&store, STATE_KEY, &state).await.unwrap();
        assert_eq!(load_state(&store, STATE_KEY).await, state);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let state = sample_state();

        save_state(&JsonFileStore::new(&path), STATE_KEY, &state)
            .await
            .unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(load_state(&reopened, STATE_KEY).await, state);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.set("other", serde_json::json!({"x": 1})).await.unwrap();
        save_state(&store, STATE_KEY, &sample_state()).await.unwrap();
        assert_eq!(
            store.get("other").await.unwrap(),
            Some(serde_json::json!({"x": 1}))
        );
    }

    #[tokio::test]
    async fn corrupt_file_loads_defaults_and_is_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json {{").unwrap();
        let store = JsonFileStore::new(&path);

        assert_eq!(load_state(&store, STATE_KEY).await, RefreshState::default());

        save_state(&store, STATE_KEY, &sample_state()).await.unwrap();
        assert_eq!(load_state(&store, STATE_KEY).await, sample_state());
    }

    #[tokio::test]
    async fn undecodable_field_keeps_its_default() {
        let store = MemoryStore::new();
        store
            .set(
                STATE_KEY,
                serde_json::json!({"minSeconds": "soon", "maxSeconds": 900, "cacheBust": true}),
            )
            .await
            .unwrap();

        let state = load_state(&store, STATE_KEY).await;

        assert_eq!(state.min_seconds, 300);
        assert_eq!(state.max_seconds, 900);
        assert!(state.cache_bust);
    }

    #[tokio::test]
    async fn fractional_settings_keep_tracked_tabs() {
        let store = MemoryStore::new();
        store
            .set(
                STATE_KEY,
                serde_json::json!({
                    "tabs": [{
                        "tabId": 5,
                        "url": "https://news.test/",
                        "title": "News",
                        "addedAt": 1_700_000_000_000_u64
                    }],
                    "minSeconds": 10,
                    "maxSeconds": 10.5,
                    "jitterPercent": 12.9,
                    "runCount": 2
                }),
            )
            .await
            .unwrap();

        let state = load_state(&store, STATE_KEY).await;

        assert_eq!(state.tabs.len(), 1);
        assert_eq!(state.tabs[0].tab_id, TabId(5));
        assert_eq!(state.run_count, 2);
        assert_eq!(state.min_seconds, 10);
        assert_eq!(state.max_seconds, 10);
        assert_eq!(state.jitter_percent, 12);
    }

    #[tokio::test]
    async fn undecodable_tab_is_skipped_and_others_kept() {
        let store = MemoryStore::new();
        store
            .set(
                STATE_KEY,
                serde_json::json!({
                    "tabs": [
                        {"tabId": "bogus"},
                        {"tabId": 7, "url": "https://b.test/", "title": "B", "addedAt": 1}
                    ],
                    "isRunning": true
                }),
            )
            .await
            .unwrap();

        let state = load_state(&store, STATE_KEY).await;

        assert_eq!(state.tabs.len(), 1);
        assert_eq!(state.tabs[0].tab_id, TabId(7));
        assert!(state.is_running);
    }

    #[tokio::test]
    async fn non_object_record_loads_defaults() {
        let store = MemoryStore::new();
        store.set(STATE_KEY, serde_json::json!([1, 2, 3])).await.unwrap();
        assert_eq!(load_state(&store, STATE_KEY).await, RefreshState::default());
    }

    #[tokio::test]
    async fn failing_store_reads_as_defaults() {
        assert_eq!(
            load_state(&FailingStore, STATE_KEY).await,
            RefreshState::default()
        );
        assert!(
            save_state(&FailingStore, STATE_KEY, &sample_state())
                .await
                .is_err()
        );
    }
}
