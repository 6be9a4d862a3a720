//! Autorefresher: randomized multi-tab auto-refresh scheduling.
//!
//! A user picks a set of browser tabs and starts a run. On each timer firing
//! one tab is reloaded and the next target and delay are drawn at random
//! from the configured interval, so refreshes never fall into a predictable
//! rhythm. The run state survives process restarts.
//!
//! # Architecture
//!
//! - **Scheduler** ([`scheduler`]): the run/stop state machine over a
//!   persisted [`RefreshState`] record
//! - **Platform** ([`platform`]): traits for storage, alarms, tabs and the
//!   badge, with tokio and file-backed implementations in [`alarm`] and
//!   [`store`]
//! - **Host** ([`host`]): versioned JSON envelopes over stdio; a single
//!   server task owns the scheduler so operations never interleave

pub mod alarm;
pub mod app_dirs;
pub mod config;
pub mod display;
pub mod error;
pub mod host;
pub mod platform;
pub mod scheduler;
pub mod store;
pub mod test_utils;

pub use config::RefresherConfig;
pub use error::{RefreshError, Result};
pub use scheduler::{Platform, RefreshState, Scheduler, SettingsPatch, TabId, TickOutcome};
