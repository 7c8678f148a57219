//! Scan/render cycle for `goveewatch`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically with an injected advertisement source
//! and an in-memory display.
//!
//! The loop alternates between two phases. While scanning, every delivered
//! advertisement is classified and folded into the [`DeviceRegistry`] on this
//! task, so the registry never needs a lock. After the dwell time the source
//! is stopped, anything still queued is drained, and one frame is drawn.
//! A shutdown request ends the loop from either phase.

use crate::advertisement::RawAdvertisement;
use crate::alias::AliasTable;
use crate::config::ConfigError;
use crate::display::{DisplayError, DisplaySink};
use crate::filter;
use crate::registry::DeviceRegistry;
use crate::render::Renderer;
use crate::scanner::{AdvertisementSource, Backend, ScanError};
use chrono::{Local, NaiveTime, Timelike};
use clap::Parser;
use log::{debug, info};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};

/// Default scan window length.
pub const DEFAULT_DWELL: Duration = Duration::from_secs(2);

/// How long a stop request may take during shutdown before giving up.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Command-line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Alias configuration file [default: ~/.goveewatch.conf]
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Length of each scan window.
    /// Accepts duration with suffix: 2s, 500ms, 1m.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "2s", value_parser = crate::config::parse_dwell)]
    pub dwell: Duration,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Verbose output, log decode problems and every reading
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Append log output to this file.
    /// Without it, logs go to stderr only when stderr is not the terminal
    /// showing the table.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

/// Where log records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
    /// Stderr shares the screen with the table, so nothing is logged.
    Discard,
}

impl Options {
    pub fn log_target(&self, stderr_is_terminal: bool) -> LogTarget {
        match &self.log_file {
            Some(path) => LogTarget::File(path.clone()),
            None if stderr_is_terminal => LogTarget::Discard,
            None => LogTarget::Stderr,
        }
    }
}

/// Errors returned by the scan/render loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Display(#[from] DisplayError),
    /// Stopping the source failed while shutting down.
    #[error("failed to stop scanning during shutdown: {0}")]
    Shutdown(#[source] ScanError),
}

/// Where the loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scanning,
    Rendering,
    Terminating,
}

/// Current local time of day, whole seconds.
pub fn local_time_of_day() -> NaiveTime {
    let now = Local::now().time();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Classify one advertisement and apply it to the registry.
pub fn observe(registry: &mut DeviceRegistry, adv: &RawAdvertisement, now: NaiveTime) {
    if let Some(observation) = filter::classify(adv) {
        registry.apply(&observation, now);
    }
}

fn drain(registry: &mut DeviceRegistry, events: &mut mpsc::Receiver<RawAdvertisement>) {
    while let Ok(adv) = events.try_recv() {
        observe(registry, &adv, local_time_of_day());
    }
}

/// Listen for `dwell`, applying every advertisement as it arrives.
///
/// The source is stopped at the end of the window and events queued before
/// the stop are still applied.
pub async fn scan_window(
    source: &mut dyn AdvertisementSource,
    registry: &mut DeviceRegistry,
    dwell: Duration,
) -> Result<(), ScanError> {
    let deadline = Instant::now() + dwell;
    let mut events = source.start().await?;

    loop {
        match timeout_at(deadline, events.recv()).await {
            Ok(Some(adv)) => observe(registry, &adv, local_time_of_day()),
            Ok(None) => {
                // Source went quiet early; keep the cycle length anyway.
                tokio::time::sleep_until(deadline).await;
                break;
            }
            Err(_) => break,
        }
    }

    source.stop().await?;
    drain(registry, &mut events);
    Ok(())
}

/// Stop the source on the way out, bounded by [`STOP_TIMEOUT`].
async fn shutdown_source(source: &mut dyn AdvertisementSource) -> Result<(), RunError> {
    match timeout(STOP_TIMEOUT, source.stop()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RunError::Shutdown(e)),
        Err(_) => Err(RunError::Shutdown(ScanError::StopTimedOut)),
    }
}

/// Run scan/render cycles until `shutdown` resolves.
///
/// Returns the registry so callers can inspect the final state.
///
/// # Errors
/// Scanner and display failures end the loop. Failing to stop the source
/// after a shutdown request yields [`RunError::Shutdown`], which callers
/// should treat as a reason to exit immediately.
pub async fn run_with_io(
    source: &mut dyn AdvertisementSource,
    display: &mut dyn DisplaySink,
    aliases: &AliasTable,
    dwell: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<DeviceRegistry, RunError> {
    let mut registry = DeviceRegistry::new();
    let mut renderer = Renderer::new();
    let mut phase = Phase::Scanning;
    tokio::pin!(shutdown);

    loop {
        debug!("entering {phase:?}");
        phase = match phase {
            Phase::Scanning => {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => Phase::Terminating,
                    result = scan_window(source, &mut registry, dwell) => {
                        result?;
                        Phase::Rendering
                    }
                }
            }
            Phase::Rendering => {
                renderer.render(display, registry.snapshot(), aliases)?;
                Phase::Scanning
            }
            Phase::Terminating => {
                info!("shutting down, {} device(s) seen", registry.len());
                shutdown_source(source).await?;
                return Ok(registry);
            }
        };
    }
}
