//! Host command channel and router.
//!
//! One [`HostCommandServer`] task owns the [`Scheduler`]. Commands from any
//! number of [`HostCommandClient`]s and firings of the refresh alarm are
//! funnelled into its loop, so no two scheduler operations ever overlap.

use crate::alarm::AlarmReceiver;
use crate::display::StatusSummary;
use crate::error::{RefreshError, Result};
use crate::host::bridge::BrowserBridge;
use crate::host::contract::{
    CommandEnvelope, CommandName, EVENT_STATE_CHANGED, EVENT_TICK, EVENT_VERSION, EventEnvelope,
    ResponseEnvelope,
};
use crate::platform::BrowserTab;
use crate::scheduler::runner::{ALARM_NAME, Scheduler, Shortcut};
use crate::scheduler::settings::SettingsPatch;
use crate::scheduler::state::{RefreshState, TabId};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    /// Send a command and wait for its response.
    ///
    /// Scheduler failures come back as error envelopes; `Err` is reserved for
    /// invalid envelopes and a server that has gone away.
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            RefreshError::InvalidCommand(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| {
                RefreshError::Channel(format!("failed to send host command request: {e}"))
            })?;

        response_rx
            .await
            .map_err(|e| RefreshError::Channel(format!("host command response dropped: {e}")))
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    alarm_rx: AlarmReceiver,
    event_tx: broadcast::Sender<EventEnvelope>,
    scheduler: Scheduler,
    bridge: Option<Arc<BrowserBridge>>,
    resumed: bool,
}

#[must_use]
pub fn command_channel(
    request_capacity: usize,
    event_capacity: usize,
    scheduler: Scheduler,
    alarm_rx: AlarmReceiver,
) -> (HostCommandClient, HostCommandServer) {
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));
    command_channel_with_events(request_capacity, event_tx, scheduler, alarm_rx)
}

/// Create a command channel using an existing event broadcast sender.
///
/// The [`BrowserBridge`] emits reload and badge events on the same sender,
/// so the shell sees one ordered stream.
#[must_use]
pub fn command_channel_with_events(
    request_capacity: usize,
    event_tx: broadcast::Sender<EventEnvelope>,
    scheduler: Scheduler,
    alarm_rx: AlarmReceiver,
) -> (HostCommandClient, HostCommandServer) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            alarm_rx,
            event_tx,
            scheduler,
            bridge: None,
            resumed: false,
        },
    )
}

enum Wake {
    Request(Option<HostCommandRequest>),
    Alarm(String),
}

impl HostCommandServer {
    /// Attach the browser bridge whose tab mirror `browser.*` commands update.
    ///
    /// With a bridge attached, resuming a persisted run waits for the first
    /// `browser.tabs_sync`, since liveness probes need the mirror populated.
    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<BrowserBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Serve until every client has been dropped.
    pub async fn run(mut self) {
        if self.bridge.is_none() {
            self.resume().await;
        }

        loop {
            let wake = tokio::select! {
                request = self.request_rx.recv() => Wake::Request(request),
                Some(name) = self.alarm_rx.recv() => Wake::Alarm(name),
            };
            match wake {
                Wake::Request(Some(request)) => {
                    let response = self.dispatch(&request.envelope).await;
                    if request.response_tx.send(response).is_err() {
                        debug!("host command caller went away before the response");
                    }
                }
                Wake::Request(None) => break,
                Wake::Alarm(name) => self.handle_alarm(&name).await,
            }
        }
        info!("host command server stopped");
    }

    /// Route a command and fold failures into an error envelope.
    pub async fn dispatch(&mut self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        match self.route(envelope).await {
            Ok(response) => response,
            Err(e) => {
                debug!(
                    command = envelope.command.as_str(),
                    code = e.code(),
                    error = %e,
                    "host command failed"
                );
                ResponseEnvelope::error(envelope.request_id.clone(), e.code(), e.to_string())
            }
        }
    }

    /// Route a command envelope to the scheduler.
    pub async fn route(&mut self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let request_id = envelope.request_id.clone();
        let payload = &envelope.payload;

        let state = match envelope.command {
            CommandName::HostPing => {
                return Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"pong": true}),
                ));
            }
            CommandName::HostVersion => {
                return Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({
                        "contract_version": EVENT_VERSION,
                        "channel": "autorefresher_v1",
                        "version": env!("CARGO_PKG_VERSION"),
                    }),
                ));
            }
            CommandName::HostShutdown => {
                return Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"accepted": true}),
                ));
            }
            CommandName::StateGet => self.scheduler.state().await,
            CommandName::StatusSummary => {
                let state = self.scheduler.state().await;
                let summary = StatusSummary::from_state(&state, self.scheduler.now_millis());
                let payload = serde_json::to_value(summary).map_err(|e| {
                    RefreshError::Channel(format!("failed to serialize status summary: {e}"))
                })?;
                return Ok(ResponseEnvelope::ok(request_id, payload));
            }
            CommandName::SettingsUpdate => {
                let patch = parse_settings_patch(payload)?;
                self.scheduler.update_settings(&patch).await
            }
            CommandName::TabsAdd => self.scheduler.add_active_tab().await?,
            CommandName::TabsRemove => {
                let tab_id = parse_tab_id(payload, "tabs.remove")?;
                self.scheduler.remove_tab(tab_id).await
            }
            CommandName::TabsClear => self.scheduler.clear_tabs().await,
            CommandName::RefreshStart => {
                let patch = parse_settings_patch(payload)?;
                self.scheduler.start(&patch).await?
            }
            CommandName::RefreshStop => self.scheduler.stop().await,
            CommandName::RefreshToggle => {
                let patch = parse_settings_patch(payload)?;
                self.scheduler.toggle(&patch).await?
            }
            CommandName::RefreshNow => self.scheduler.refresh_now().await,
            CommandName::CounterReset => self.scheduler.reset_counter().await,
            CommandName::ShortcutInvoke => {
                let shortcut = parse_shortcut(payload)?;
                self.scheduler.handle_shortcut(shortcut).await
            }
            CommandName::RuntimeInstalled => self.scheduler.on_installed().await,
            CommandName::BrowserTabsSync => return self.handle_tabs_sync(envelope).await,
            CommandName::BrowserTabClosed => return self.handle_tab_closed(envelope).await,
        };

        if envelope.command.mutates_state() {
            self.emit_state(&state);
        }
        Ok(ResponseEnvelope::ok(request_id, state.to_json()))
    }

    async fn handle_tabs_sync(&mut self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let Some(bridge) = self.bridge.clone() else {
            return Err(RefreshError::InvalidCommand(
                "browser.tabs_sync requires a browser bridge".to_owned(),
            ));
        };
        let sync = parse_tabs_sync(&envelope.payload)?;
        bridge.sync(sync.tabs, sync.active_tab_id);
        let open = bridge.open_tab_count();

        if !self.resumed {
            self.resume().await;
        }

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true, "open_tabs": open}),
        ))
    }

    async fn handle_tab_closed(&mut self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let tab_id = parse_tab_id(&envelope.payload, "browser.tab_closed")?;
        if let Some(bridge) = &self.bridge {
            bridge.forget(tab_id);
        }

        let tracked = match self.scheduler.handle_tab_closed(tab_id).await {
            Some(state) => {
                self.emit_state(&state);
                true
            }
            None => false,
        };

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"tabId": tab_id, "tracked": tracked}),
        ))
    }

    async fn handle_alarm(&mut self, name: &str) {
        if name != ALARM_NAME {
            debug!(alarm = name, "ignoring unknown alarm");
            return;
        }
        let outcome = self.scheduler.tick().await;
        match serde_json::to_value(&outcome) {
            Ok(payload) => self.emit_event(EVENT_TICK, payload),
            Err(e) => warn!(error = %e, "failed to serialize tick outcome"),
        }
        let state = self.scheduler.state().await;
        self.emit_state(&state);
    }

    async fn resume(&mut self) {
        self.resumed = true;
        let state = self.scheduler.resume().await;
        self.emit_state(&state);
    }

    fn emit_state(&self, state: &RefreshState) {
        self.emit_event(EVENT_STATE_CHANGED, state.to_json());
    }

    fn emit_event(&self, event: &str, payload: serde_json::Value) {
        let _ = self.event_tx.send(EventEnvelope::fresh(event, payload));
    }
}

/// Parse the optional settings fields of `settings.update`, `refresh.start`
/// and `refresh.toggle`.
///
/// Numbers may arrive as integers, floats (truncated) or numeric strings.
/// A null or missing payload is an empty patch.
pub fn parse_settings_patch(payload: &serde_json::Value) -> Result<SettingsPatch> {
    if payload.is_null() {
        return Ok(SettingsPatch::default());
    }
    if !payload.is_object() {
        return Err(RefreshError::InvalidCommand(
            "settings payload must be an object".to_owned(),
        ));
    }

    Ok(SettingsPatch {
        min_seconds: parse_optional_int(payload, "minSeconds")?,
        max_seconds: parse_optional_int(payload, "maxSeconds")?,
        jitter_percent: parse_optional_int(payload, "jitterPercent")?,
        cache_bust: match payload.get("cacheBust") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Bool(flag)) => Some(*flag),
            Some(_) => {
                return Err(RefreshError::InvalidCommand(
                    "payload.cacheBust must be a boolean".to_owned(),
                ));
            }
        },
    })
}

fn parse_optional_int(payload: &serde_json::Value, field: &str) -> Result<Option<i64>> {
    let invalid =
        || RefreshError::InvalidCommand(format!("payload.{field} must be a number when provided"));

    match payload.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(v) => Ok(Some(v)),
            None => n.as_f64().and_then(float_to_int).map(Some).ok_or_else(invalid),
        },
        Some(serde_json::Value::String(raw)) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Ok(None);
            }
            match raw.parse::<i64>() {
                Ok(v) => Ok(Some(v)),
                Err(_) => raw
                    .parse::<f64>()
                    .ok()
                    .and_then(float_to_int)
                    .map(Some)
                    .ok_or_else(invalid),
            }
        }
        Some(_) => Err(invalid()),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_int(value: f64) -> Option<i64> {
    // `as` saturates; reject NaN and infinities explicitly.
    value.is_finite().then(|| value.trunc() as i64)
}

/// Parse `payload.tabId`.
pub fn parse_tab_id(payload: &serde_json::Value, command: &str) -> Result<TabId> {
    payload
        .get("tabId")
        .and_then(serde_json::Value::as_i64)
        .map(TabId)
        .ok_or_else(|| RefreshError::InvalidCommand(format!("{command} requires payload.tabId")))
}

/// Parse `payload.name` of `shortcut.invoke`.
pub fn parse_shortcut(payload: &serde_json::Value) -> Result<Shortcut> {
    let Some(raw) = payload.get("name").and_then(serde_json::Value::as_str) else {
        return Err(RefreshError::InvalidCommand(
            "shortcut.invoke requires payload.name".to_owned(),
        ));
    };
    Shortcut::parse(raw)
        .ok_or_else(|| RefreshError::InvalidCommand(format!("unknown shortcut `{raw}`")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabsSyncPayload {
    #[serde(default)]
    tabs: Vec<BrowserTab>,
    #[serde(default)]
    active_tab_id: Option<TabId>,
}

fn parse_tabs_sync(payload: &serde_json::Value) -> Result<TabsSyncPayload> {
    TabsSyncPayload::deserialize(payload).map_err(|e| {
        RefreshError::InvalidCommand(format!("invalid browser.tabs_sync payload: {e}"))
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::AlarmClock;
    use crate::scheduler::runner::Platform;
    use crate::store::MemoryStore;
    use crate::test_utils::{FakeTabs, ManualClock, RecordingAlarmClock, RecordingIndicator};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;

    struct Fixture {
        server: HostCommandServer,
        tabs: FakeTabs,
        alarms: RecordingAlarmClock,
        clock: ManualClock,
        events: broadcast::Receiver<EventEnvelope>,
    }

    fn fixture() -> Fixture {
        let tabs = FakeTabs::new();
        let alarms = RecordingAlarmClock::new();
        let clock = ManualClock::new(1_700_000_000_000);
        let platform = Platform::new(
            Arc::new(MemoryStore::new()),
            Arc::new(alarms.clone()),
            Arc::new(tabs.clone()),
            Arc::new(RecordingIndicator::new()),
        )
        .with_clock(Arc::new(clock.clone()));
        let scheduler = Scheduler::new(platform).with_rng(StdRng::seed_from_u64(3));
        let (_alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (client, server) = command_channel(8, 32, scheduler, alarm_rx);
        let events = client.subscribe_events();
        Fixture {
            server,
            tabs,
            alarms,
            clock,
            events,
        }
    }

    fn envelope(command: CommandName, payload: serde_json::Value) -> CommandEnvelope {
        CommandEnvelope::new("test-req-1", command, payload)
    }

    #[tokio::test]
    async fn ping_and_version() {
        let mut f = fixture();
        let pong = f
            .server
            .dispatch(&envelope(CommandName::HostPing, serde_json::json!({})))
            .await;
        assert!(pong.ok);
        assert_eq!(pong.payload["pong"], true);

        let version = f
            .server
            .dispatch(&envelope(CommandName::HostVersion, serde_json::Value::Null))
            .await;
        assert_eq!(version.payload["contract_version"], EVENT_VERSION);
    }

    #[tokio::test]
    async fn state_get_returns_camel_case_defaults() {
        let mut f = fixture();
        let resp = f
            .server
            .dispatch(&envelope(CommandName::StateGet, serde_json::Value::Null))
            .await;
        assert!(resp.ok);
        assert_eq!(resp.payload["minSeconds"], 300);
        assert_eq!(resp.payload["maxSeconds"], 700);
        assert_eq!(resp.payload["isRunning"], false);
    }

    #[tokio::test]
    async fn start_without_tabs_reports_error_code() {
        let mut f = fixture();
        let resp = f
            .server
            .dispatch(&envelope(CommandName::RefreshStart, serde_json::json!({})))
            .await;
        assert!(!resp.ok);
        assert_eq!(resp.error_code.as_deref(), Some("no_tabs"));
        assert_eq!(resp.error.as_deref(), Some("add at least one tab first"));
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn add_then_start_emits_state_changes() {
        let mut f = fixture();
        f.tabs.open_active(TabId(4), "https://news.test/", "News");

        let added = f
            .server
            .dispatch(&envelope(CommandName::TabsAdd, serde_json::Value::Null))
            .await;
        assert!(added.ok);
        assert_eq!(added.payload["tabs"][0]["tabId"], 4);

        let started = f
            .server
            .dispatch(&envelope(
                CommandName::RefreshStart,
                serde_json::json!({"minSeconds": "10", "maxSeconds": 10.9, "jitterPercent": 0}),
            ))
            .await;
        assert!(started.ok);
        assert_eq!(started.payload["isRunning"], true);
        assert_eq!(started.payload["minSeconds"], 10);
        assert_eq!(started.payload["maxSeconds"], 10);

        let first = f.events.try_recv().unwrap();
        let second = f.events.try_recv().unwrap();
        assert_eq!(first.event, EVENT_STATE_CHANGED);
        assert_eq!(second.payload["isRunning"], true);
    }

    #[tokio::test]
    async fn settings_update_rejects_garbage() {
        let mut f = fixture();
        let resp = f
            .server
            .dispatch(&envelope(
                CommandName::SettingsUpdate,
                serde_json::json!({"minSeconds": "soon"}),
            ))
            .await;
        assert!(!resp.ok);
        assert_eq!(resp.error_code.as_deref(), Some("invalid_command"));
    }

    #[tokio::test]
    async fn alarm_firing_runs_a_tick() {
        let mut f = fixture();
        f.tabs.open_active(TabId(1), "https://a.test/", "A");
        f.server
            .dispatch(&envelope(CommandName::TabsAdd, serde_json::Value::Null))
            .await;
        f.server
            .dispatch(&envelope(
                CommandName::RefreshStart,
                serde_json::json!({"minSeconds": 5, "maxSeconds": 5, "jitterPercent": 0}),
            ))
            .await;
        while f.events.try_recv().is_ok() {}

        f.clock.advance(Duration::from_secs(5));
        f.server.handle_alarm(ALARM_NAME).await;

        let tick = f.events.try_recv().unwrap();
        assert_eq!(tick.event, EVENT_TICK);
        assert_eq!(tick.payload["outcome"], "refreshed");
        assert_eq!(tick.payload["tab_id"], 1);
        assert_eq!(f.tabs.reloads(), vec![(TabId(1), false)]);
        assert!(f.alarms.armed(ALARM_NAME).is_some());
    }

    #[tokio::test]
    async fn unknown_alarm_is_ignored() {
        let mut f = fixture();
        f.server.handle_alarm("somethingElse").await;
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn tab_closed_reports_whether_tracked() {
        let mut f = fixture();
        f.tabs.open_active(TabId(2), "https://b.test/", "B");
        f.server
            .dispatch(&envelope(CommandName::TabsAdd, serde_json::Value::Null))
            .await;

        let untracked = f
            .server
            .dispatch(&envelope(
                CommandName::BrowserTabClosed,
                serde_json::json!({"tabId": 99}),
            ))
            .await;
        assert_eq!(untracked.payload["tracked"], false);

        let tracked = f
            .server
            .dispatch(&envelope(
                CommandName::BrowserTabClosed,
                serde_json::json!({"tabId": 2}),
            ))
            .await;
        assert_eq!(tracked.payload["tracked"], true);
    }

    #[tokio::test]
    async fn tabs_sync_without_bridge_is_rejected() {
        let mut f = fixture();
        let resp = f
            .server
            .dispatch(&envelope(
                CommandName::BrowserTabsSync,
                serde_json::json!({"tabs": []}),
            ))
            .await;
        assert!(!resp.ok);
        assert_eq!(resp.error_code.as_deref(), Some("invalid_command"));
    }

    #[tokio::test]
    async fn tabs_sync_reports_distinct_open_tabs() {
        let f = fixture();
        let bridge = Arc::new(BrowserBridge::new(f.server.event_tx.clone()));
        let mut server = f.server.with_bridge(bridge);

        let resp = server
            .dispatch(&envelope(
                CommandName::BrowserTabsSync,
                serde_json::json!({
                    "tabs": [
                        {"id": 1, "url": "https://a.test/"},
                        {"id": 1, "url": "https://a.test/"},
                        {"id": 2}
                    ],
                    "activeTabId": 1
                }),
            ))
            .await;

        assert!(resp.ok);
        assert_eq!(resp.payload["open_tabs"], 2);
    }

    #[tokio::test]
    async fn status_summary_shape() {
        let mut f = fixture();
        let resp = f
            .server
            .dispatch(&envelope(CommandName::StatusSummary, serde_json::Value::Null))
            .await;
        assert!(resp.ok);
        assert_eq!(resp.payload["status"], "Idle");
        assert_eq!(resp.payload["countdown"], "--");
    }

    #[tokio::test]
    async fn install_hook_cancels_alarm() {
        let mut f = fixture();
        f.alarms
            .arm(ALARM_NAME, Duration::from_secs(30))
            .await
            .unwrap();
        let resp = f
            .server
            .dispatch(&envelope(CommandName::RuntimeInstalled, serde_json::Value::Null))
            .await;
        assert!(resp.ok);
        assert!(f.alarms.armed(ALARM_NAME).is_none());
    }

    #[test]
    fn settings_patch_parsing() {
        let patch = parse_settings_patch(&serde_json::json!({
            "minSeconds": 12.8,
            "maxSeconds": " 40 ",
            "jitterPercent": null,
            "cacheBust": true
        }))
        .unwrap();
        assert_eq!(patch.min_seconds, Some(12));
        assert_eq!(patch.max_seconds, Some(40));
        assert_eq!(patch.jitter_percent, None);
        assert_eq!(patch.cache_bust, Some(true));

        assert!(parse_settings_patch(&serde_json::Value::Null).unwrap().is_empty());
        assert!(parse_settings_patch(&serde_json::json!([1, 2])).is_err());
        assert!(parse_settings_patch(&serde_json::json!({"cacheBust": "yes"})).is_err());
        assert!(parse_settings_patch(&serde_json::json!({"maxSeconds": {}})).is_err());
    }

    #[test]
    fn tab_id_and_shortcut_parsing() {
        assert_eq!(
            parse_tab_id(&serde_json::json!({"tabId": 17}), "tabs.remove").unwrap(),
            TabId(17)
        );
        assert!(parse_tab_id(&serde_json::json!({"tabId": "x"}), "tabs.remove").is_err());
        assert_eq!(
            parse_shortcut(&serde_json::json!({"name": "refresh-now"})).unwrap(),
            Shortcut::RefreshNow
        );
        assert!(parse_shortcut(&serde_json::json!({"name": "nope"})).is_err());
        assert!(parse_shortcut(&serde_json::json!({})).is_err());
    }

    #[test]
    fn tabs_sync_payload_parsing() {
        let sync = parse_tabs_sync(&serde_json::json!({
            "tabs": [{"id": 1, "url": "https://a.test/", "title": "A"}, {"id": 2}],
            "activeTabId": 1
        }))
        .unwrap();
        assert_eq!(sync.tabs.len(), 2);
        assert_eq!(sync.active_tab_id, Some(TabId(1)));
        assert!(parse_tabs_sync(&serde_json::json!({"tabs": "nope"})).is_err());
    }
}
