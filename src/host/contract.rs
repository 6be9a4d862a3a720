//! Versioned host command/event envelopes for the browser shell.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Event carrying the state snapshot after every mutation.
pub const EVENT_STATE_CHANGED: &str = "refresh.state_changed";
/// Event carrying the outcome of one alarm firing.
pub const EVENT_TICK: &str = "refresh.tick";
/// Event asking the shell to reload a tab.
pub const EVENT_RELOAD_REQUESTED: &str = "tab.reload_requested";
/// Event asking the shell to show a badge.
pub const EVENT_BADGE_SET: &str = "badge.set";
/// Event asking the shell to clear the badge.
pub const EVENT_BADGE_CLEARED: &str = "badge.cleared";

/// Command set accepted by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "host.shutdown")]
    HostShutdown,
    #[serde(rename = "state.get")]
    StateGet,
    #[serde(rename = "settings.update")]
    SettingsUpdate,
    #[serde(rename = "tabs.add")]
    TabsAdd,
    #[serde(rename = "tabs.remove")]
    TabsRemove,
    #[serde(rename = "tabs.clear")]
    TabsClear,
    #[serde(rename = "refresh.start")]
    RefreshStart,
    #[serde(rename = "refresh.stop")]
    RefreshStop,
    #[serde(rename = "refresh.toggle")]
    RefreshToggle,
    #[serde(rename = "refresh.now")]
    RefreshNow,
    #[serde(rename = "counter.reset")]
    CounterReset,
    #[serde(rename = "status.summary")]
    StatusSummary,
    #[serde(rename = "shortcut.invoke")]
    ShortcutInvoke,
    #[serde(rename = "runtime.installed")]
    RuntimeInstalled,
    #[serde(rename = "browser.tabs_sync")]
    BrowserTabsSync,
    #[serde(rename = "browser.tab_closed")]
    BrowserTabClosed,
}

impl CommandName {
    /// Every command, in wire order.
    pub const ALL: [Self; 18] = [
        Self::HostPing,
        Self::HostVersion,
        Self::HostShutdown,
        Self::StateGet,
        Self::SettingsUpdate,
        Self::TabsAdd,
        Self::TabsRemove,
        Self::TabsClear,
        Self::RefreshStart,
        Self::RefreshStop,
        Self::RefreshToggle,
        Self::RefreshNow,
        Self::CounterReset,
        Self::StatusSummary,
        Self::ShortcutInvoke,
        Self::RuntimeInstalled,
        Self::BrowserTabsSync,
        Self::BrowserTabClosed,
    ];

    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::HostShutdown => "host.shutdown",
            Self::StateGet => "state.get",
            Self::SettingsUpdate => "settings.update",
            Self::TabsAdd => "tabs.add",
            Self::TabsRemove => "tabs.remove",
            Self::TabsClear => "tabs.clear",
            Self::RefreshStart => "refresh.start",
            Self::RefreshStop => "refresh.stop",
            Self::RefreshToggle => "refresh.toggle",
            Self::RefreshNow => "refresh.now",
            Self::CounterReset => "counter.reset",
            Self::StatusSummary => "status.summary",
            Self::ShortcutInvoke => "shortcut.invoke",
            Self::RuntimeInstalled => "runtime.installed",
            Self::BrowserTabsSync => "browser.tabs_sync",
            Self::BrowserTabClosed => "browser.tab_closed",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }

    /// Whether the command can change the persisted record.
    #[must_use]
    pub fn mutates_state(self) -> bool {
        !matches!(
            self,
            Self::HostPing
                | Self::HostVersion
                | Self::HostShutdown
                | Self::StateGet
                | Self::StatusSummary
                | Self::RefreshNow
                | Self::BrowserTabsSync
        )
    }
}

/// A versioned response envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
    /// Stable machine-readable error code (see `RefreshError::code`).
    #[serde(default)]
    pub error_code: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
            error_code: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
            error_code: Some(code.into()),
        }
    }
}

/// A versioned command envelope from frontend -> backend host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned event envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }

    /// Build an event with a fresh random id.
    #[must_use]
    pub fn fresh(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), event, payload)
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

impl ContractErrorKind {
    /// Wire code for error responses.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::UnsupportedVersion => "unsupported_version",
            Self::InvalidEnvelope => "invalid_envelope",
        }
    }
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn command_names_roundtrip_through_wire_format() {
        for command in CommandName::ALL {
            assert_eq!(CommandName::parse(command.as_str()), Some(command));
            let json = serde_json::to_value(command).unwrap();
            assert_eq!(json, serde_json::json!(command.as_str()));
        }
        assert_eq!(CommandName::parse("runtime.start"), None);
    }

    #[test]
    fn command_without_payload_deserializes() {
        let raw = r#"{"v":1,"request_id":"r1","command":"state.get"}"#;
        let envelope: CommandEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.command, CommandName::StateGet);
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn validate_rejects_wrong_version_and_empty_id() {
        let mut envelope = CommandEnvelope::new("r1", CommandName::HostPing, serde_json::json!({}));
        assert!(envelope.validate().is_ok());

        envelope.v = 2;
        let err = envelope.validate().unwrap_err();
        assert_eq!(err.kind, ContractErrorKind::UnsupportedVersion);

        envelope.v = EVENT_VERSION;
        envelope.request_id = "   ".to_owned();
        let err = envelope.validate().unwrap_err();
        assert_eq!(err.kind, ContractErrorKind::InvalidEnvelope);
    }

    #[test]
    fn error_response_carries_code() {
        let response = ResponseEnvelope::error("r9", "no_tabs", "add at least one tab first");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error_code"], "no_tabs");
        assert_eq!(json["payload"], serde_json::Value::Null);
    }

    #[test]
    fn fresh_events_get_unique_ids() {
        let a = EventEnvelope::fresh(EVENT_TICK, serde_json::json!({}));
        let b = EventEnvelope::fresh(EVENT_TICK, serde_json::json!({}));
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.v, EVENT_VERSION);
    }
}
