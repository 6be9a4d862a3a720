//! Randomized multi-tab refresh scheduling.
//!
//! `state` holds the persisted record, `settings` and `delay` the interval
//! arithmetic, `registry` the tracked-tab list, and `runner` the state
//! machine that ties them to the platform capabilities.

pub mod delay;
pub mod registry;
pub mod runner;
pub mod settings;
pub mod state;

pub use runner::{
    ALARM_NAME, Platform, Scheduler, Shortcut, StopReason, TickOutcome, is_protected_url,
};
pub use settings::{IntervalSettings, SettingsPatch, clamp_settings};
pub use state::{RefreshState, TabId, TrackedTab};
