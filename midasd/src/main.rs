//! Midas LCD daemon
//!
//! Finds the Midas 2x16 serial LCD by its USB VID/PID and keeps the current
//! and maximum CPU and GPU temperatures on it until interrupted.
//!
//! Temperatures come from the `[[sensors]]` files in the configuration, or
//! from a synthetic source with `--mock`, which also replaces the serial port
//! with an in-memory display.

mod hardware;
mod sensors;
mod supervisor;

use anyhow::Result;
use clap::Parser;
use hardware::connection;
use midas_core::{default_config_path, StaticConfig};
use sensors::{FileSensorProvider, SensorProvider, SyntheticSensorProvider};
use std::path::PathBuf;
use supervisor::{LoopState, PollingSupervisor, SupervisorSettings};
use tokio::signal;
use tracing::{error, info, warn};

/// Midas LCD temperature display daemon
#[derive(Parser, Debug)]
#[command(name = "midasd")]
#[command(version, about = "Midas LCD temperature display daemon", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run against a simulated display and synthetic sensors
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    info!("Midas LCD daemon starting...");

    // Determine config path: CLI flag > env var > default
    let config_path = args.config.unwrap_or_else(|| {
        std::env::var("MIDASD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path())
    });
    info!("Configuration file: {}", config_path.display());

    let config = StaticConfig::load(&config_path)?;
    let settings = SupervisorSettings::from_config(&config)?;
    info!(
        "Looking for {} at {} baud, refreshing every {:?}",
        settings.identity, settings.baud_rate, settings.poll_interval
    );

    let (locator, lcd) = connection::build_display(&config.device, args.mock)?;

    let provider: Box<dyn SensorProvider> = if args.mock {
        info!("Mock mode: using synthetic temperatures");
        Box::new(SyntheticSensorProvider::new(
            &settings.cpu_sensor,
            &settings.gpu_sensor,
        ))
    } else {
        Box::new(FileSensorProvider::new(config.sensors.clone()))
    };

    let handle = PollingSupervisor::new(settings, locator, lcd, provider).spawn();
    let mut state = handle.subscribe();

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = state.wait_for(|s| *s == LoopState::Stopped) => {
            warn!("Polling loop ended on its own");
        }
    }

    info!("Stopping polling loop ({})", handle.state().as_str());
    if let Err(e) = handle.stop().await {
        error!("Midas LCD daemon failed: {}", e);
        std::process::exit(1);
    }

    info!("Midas LCD daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
