//! Error types for the auto-refresh scheduler.

use crate::scheduler::state::TabId;

/// Top-level error type for the auto-refresh scheduler.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The tab is already tracked.
    #[error("tab {0} is already in the list")]
    DuplicateTab(TabId),

    /// The active tab cannot be tracked or reloaded (protected URL scheme).
    #[error("cannot add this page (protected URL)")]
    ProtectedUrl,

    /// Start was requested with no tracked tabs.
    #[error("add at least one tab first")]
    NoTabs,

    /// Every tracked tab failed its liveness probe.
    #[error("all tabs have been closed")]
    AllTabsClosed,

    /// Persistent key-value store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Alarm (timer) arm or cancel failure.
    #[error("alarm error: {0}")]
    Alarm(String),

    /// Browser tab query or reload failure.
    #[error("tab error: {0}")]
    Tab(String),

    /// An external collaborator did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed command payload.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl RefreshError {
    /// Stable machine-readable code carried in response envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateTab(_) => "duplicate_tab",
            Self::ProtectedUrl => "protected_url",
            Self::NoTabs => "no_tabs",
            Self::AllTabsClosed => "all_tabs_closed",
            Self::Store(_) => "store",
            Self::Alarm(_) => "alarm",
            Self::Tab(_) => "tab",
            Self::Timeout(_) => "timeout",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Channel(_) => "channel",
            Self::InvalidCommand(_) => "invalid_command",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RefreshError>;
