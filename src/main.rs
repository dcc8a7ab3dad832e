//! keynet-monitor: print global input and volume events as JSON lines
//!
//! Starts a detector over the system hook, writes every event to stdout
//! (one JSON object per line) and logs to stderr. Runs until SIGINT or
//! SIGTERM.
//!
//! Configuration comes from the environment:
//! - `RUST_LOG` - log filter (default `info`)
//! - `KEYNET_POLL_TIMEOUT_MS`, `KEYNET_VOLUME_POLL_MS`,
//!   `KEYNET_KEYBOARD`, `KEYNET_MOUSE` - see `DetectorConfig::load`

mod lifecycle;

use std::io::{self, Write};

use anyhow::{Context, Result};
use keynet::{Detector, DetectorConfig, Event, EventKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the event stream
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "keynet-monitor starting"
    );

    let config = DetectorConfig::load().context("invalid configuration")?;
    info!(?config, "configuration loaded");

    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    let detector = Detector::with_config(config);
    for kind in EventKind::ALL {
        detector.try_on(kind, print_event);
    }

    detector
        .start()
        .context("failed to start detector - check input permissions")?;

    warn!("monitoring all keyboard input system-wide; output may contain sensitive text");

    let received = shutdown.wait().await;
    info!(signal = %received, "shutting down...");

    // stop() joins the dispatch thread; keep it off the async workers
    tokio::task::spawn_blocking(move || detector.stop())
        .await
        .context("detector shutdown task failed")?;

    info!("keynet-monitor stopped");

    Ok(())
}

fn print_event(event: &Event) -> Result<()> {
    let line = serde_json::to_string(event)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}
