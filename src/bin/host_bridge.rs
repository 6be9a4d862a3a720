//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! drives the refresh scheduler, and writes `ResponseEnvelope` and
//! `EventEnvelope` messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use autorefresher::alarm::TokioAlarmClock;
use autorefresher::config::RefresherConfig;
use autorefresher::host::bridge::BrowserBridge;
use autorefresher::host::channel::command_channel_with_events;
use autorefresher::host::stdio::run_stdio_bridge;
use autorefresher::scheduler::{Platform, Scheduler};
use autorefresher::store::JsonFileStore;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("AUTOREFRESHER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(RefresherConfig::default_config_path);
    let (config, config_error) = RefresherConfig::load_or_default(&config_path);

    // Stdout is reserved for the JSON protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.filter))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Some(e) = config_error {
        tracing::warn!(path = %config_path.display(), error = %e, "invalid config; using defaults");
    }

    let state_file = config.storage.effective_state_file();
    tracing::info!(state_file = %state_file.display(), "autorefresher-host starting");

    let (event_tx, _event_rx) = tokio::sync::broadcast::channel(config.host.event_capacity.max(1));
    let bridge = Arc::new(BrowserBridge::new(event_tx.clone()));
    let (alarms, alarm_rx) = TokioAlarmClock::channel();

    let platform = Platform::new(
        Arc::new(JsonFileStore::new(state_file)),
        Arc::new(alarms),
        Arc::clone(&bridge) as Arc<dyn autorefresher::platform::TabApi>,
        Arc::clone(&bridge) as Arc<dyn autorefresher::platform::StatusIndicator>,
    );
    let scheduler = Scheduler::new(platform)
        .with_state_key(config.storage.state_key.clone())
        .with_timeouts(config.timeouts.liveness_probe(), config.timeouts.reload());

    let (client, server) =
        command_channel_with_events(config.host.request_capacity, event_tx, scheduler, alarm_rx);
    let server = server.with_bridge(bridge);

    run_stdio_bridge(client, server).await.map_err(|e| {
        tracing::error!(error = %e, "autorefresher-host exited with error");
        anyhow::anyhow!("autorefresher-host failed: {e}")
    })?;

    tracing::info!("autorefresher-host shut down cleanly");
    Ok(())
}
