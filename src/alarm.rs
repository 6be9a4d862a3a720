//! Tokio-backed named alarms.
//!
//! Each armed alarm is a spawned sleep that sends the alarm name on a
//! channel when it expires. The command server selects on that channel
//! alongside incoming commands, so firings are handled one at a time with
//! everything else.

use crate::error::Result;
use crate::platform::{AlarmClock, MIN_ALARM_DELAY};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Receiving end for fired alarm names.
pub type AlarmReceiver = mpsc::UnboundedReceiver<String>;

/// [`AlarmClock`] built on `tokio::time::sleep`.
pub struct TokioAlarmClock {
    fired_tx: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioAlarmClock {
    /// Create an alarm clock and the receiver its firings arrive on.
    #[must_use]
    pub fn channel() -> (Self, AlarmReceiver) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Self {
                fired_tx,
                pending: Mutex::new(HashMap::new()),
            },
            fired_rx,
        )
    }

    /// Number of alarms currently waiting to fire.
    #[cfg(test)]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.values().filter(|h| !h.is_finished()).count()
    }
}

#[async_trait]
impl AlarmClock for TokioAlarmClock {
    async fn arm(&self, name: &str, delay: Duration) -> Result<()> {
        let delay = delay.max(MIN_ALARM_DELAY);
        let fired_tx = self.fired_tx.clone();
        let alarm_name = name.to_owned();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fired_tx.send(alarm_name.clone()).is_err() {
                debug!(alarm = %alarm_name, "alarm receiver dropped");
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.insert(name.to_owned(), handle) {
            previous.abort();
        }
        debug!(alarm = name, delay_ms = delay.as_millis(), "alarm armed");
        Ok(())
    }

    async fn cancel(&self, name: &str) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pending.remove(name) {
            handle.abort();
            debug!(alarm = name, "alarm cancelled");
        }
        Ok(())
    }
}

impl Drop for TokioAlarmClock {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }
}
