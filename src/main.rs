//! # Modem Telemetry
//!
//! Reads GNSS position and battery level through a SIM7080G modem and uploads
//! them to a TCP collector over LTE-M.

use anyhow::{Context, Result};
use modem_telemetry::app::Application;
use modem_telemetry::config::{Config, LoggingConfig};
use modem_telemetry::fsm::SystemClock;
use modem_telemetry::modem::SerialTransport;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configuration used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point for Modem Telemetry
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or `config/default.toml`)
///    - Set up logging to the console and, if configured, a daily log file
///    - Open the modem serial port
///
/// 2. **Main Loop**
///    - Tick the application every `tick_interval_ms`
///    - Handle Ctrl+C for graceful shutdown
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be read or is invalid
/// - No modem serial device can be opened
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&path).with_context(|| format!("loading {}", path))?;

    // Keep the guard alive so buffered log lines are flushed on exit
    let _guard = init_logging(&config.logging);

    info!("Modem Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));

    let transport = SerialTransport::open(&config.serial)?;
    info!("Modem serial port opened at: {}", transport.device_path());

    let mut app = Application::new(&config, Box::new(transport), SystemClock::handle());

    let mut ticker = interval(Duration::from_millis(config.serial.tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = ticker.tick() => app.tick(),

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                info!("{} records left in queue", app.queue().len());
                break;
            }
        }
    }

    Ok(())
}

/// Installs the console subscriber plus an optional daily rolling file.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let (file_layer, guard) = if config.dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&config.dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}
