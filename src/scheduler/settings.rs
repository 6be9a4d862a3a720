//! Interval settings validation.
//!
//! Clamping is total: any combination of user-supplied values maps to a
//! valid `(min, max, jitter)` tuple, so there is no validation error path.

use crate::scheduler::state::{DEFAULT_MAX_SECONDS, DEFAULT_MIN_SECONDS, RefreshState};

/// Smallest allowed refresh interval (seconds).
pub const MIN_INTERVAL_SECS: u32 = 3;

/// Largest allowed jitter (percent of the base interval).
pub const MAX_JITTER_PERCENT: u32 = 80;

/// Validated interval settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSettings {
    pub min_seconds: u32,
    pub max_seconds: u32,
    pub jitter_percent: u32,
}

impl IntervalSettings {
    /// Current settings of a persisted state, re-clamped.
    #[must_use]
    pub fn of(state: &RefreshState) -> Self {
        clamp_settings(RawSettings::from(Self {
            min_seconds: state.min_seconds,
            max_seconds: state.max_seconds,
            jitter_percent: state.jitter_percent,
        }))
    }
}

/// Unvalidated interval values. Absent or zero means "use the fallback".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSettings {
    pub min_seconds: Option<i64>,
    pub max_seconds: Option<i64>,
    pub jitter_percent: Option<i64>,
}

impl From<IntervalSettings> for RawSettings {
    fn from(settings: IntervalSettings) -> Self {
        Self {
            min_seconds: Some(i64::from(settings.min_seconds)),
            max_seconds: Some(i64::from(settings.max_seconds)),
            jitter_percent: Some(i64::from(settings.jitter_percent)),
        }
    }
}

/// Partial settings update carried by `settings.update`, `refresh.start`
/// and `refresh.toggle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub min_seconds: Option<i64>,
    pub max_seconds: Option<i64>,
    pub jitter_percent: Option<i64>,
    pub cache_bust: Option<bool>,
}

impl SettingsPatch {
    /// Returns `true` when the patch changes nothing.
    #[cfg(test)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Clamp raw values into a valid settings tuple.
///
/// `min' = max(3, min or 300)`, `max' = max(min', max or 700)`,
/// `jitter' = clamp(jitter or 0, 0, 80)`.
#[must_use]
pub fn clamp_settings(raw: RawSettings) -> IntervalSettings {
    let min_seconds = nonzero(raw.min_seconds)
        .map_or(DEFAULT_MIN_SECONDS, saturate_u32)
        .max(MIN_INTERVAL_SECS);
    let max_seconds = nonzero(raw.max_seconds)
        .map_or(DEFAULT_MAX_SECONDS, saturate_u32)
        .max(min_seconds);
    let jitter_percent = nonzero(raw.jitter_percent)
        .map_or(0, saturate_u32)
        .min(MAX_JITTER_PERCENT);

    IntervalSettings {
        min_seconds,
        max_seconds,
        jitter_percent,
    }
}

/// Merge a patch over the state's settings and clamp the result.
///
/// Only the settings fields change; everything else is carried over.
#[must_use]
pub fn apply_patch(state: &RefreshState, patch: &SettingsPatch) -> RefreshState {
    let raw = RawSettings {
        min_seconds: patch
            .min_seconds
            .or(Some(i64::from(state.min_seconds))),
        max_seconds: patch
            .max_seconds
            .or(Some(i64::from(state.max_seconds))),
        jitter_percent: patch
            .jitter_percent
            .or(Some(i64::from(state.jitter_percent))),
    };
    let clamped = clamp_settings(raw);

    RefreshState {
        min_seconds: clamped.min_seconds,
        max_seconds: clamped.max_seconds,
        jitter_percent: clamped.jitter_percent,
        cache_bust: patch.cache_bust.unwrap_or(state.cache_bust),
        ..state.clone()
    }
}

fn nonzero(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v != 0)
}

fn saturate_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
