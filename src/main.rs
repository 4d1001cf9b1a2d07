//! Tethered camera HTTP server

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tethercam::device::{DeviceDriver, SimulatedDriver};
use tethercam::web::{self, AppState};
use tethercam::{CameraSession, CapturePipeline, Config, SessionOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tethercam")]
#[command(about = "HTTP server for a USB-tethered camera")]
#[command(version)]
struct Cli {
    /// Path to configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP port from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Use the built-in software camera instead of real hardware
    #[arg(long)]
    simulated: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    let mut config = match &cli.config {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    std::fs::create_dir_all(&config.server.captures_dir).with_context(|| {
        format!(
            "Failed to create captures directory {}",
            config.server.captures_dir.display()
        )
    })?;

    let driver = select_driver(cli.simulated)?;
    let name = config.camera.name.clone();
    let options = SessionOptions::from(&config);
    let session = tokio::task::spawn_blocking(move || CameraSession::connect(driver.as_ref(), &name, options))
        .await?
        .context("Failed to connect to camera, make sure it's around!")?;
    let session = Arc::new(session);

    let pipeline = CapturePipeline::new(Arc::clone(&session), &config.server.captures_dir)
        .with_raw_extension(config.camera.raw_extension.clone())
        .with_leave_on_device(config.camera.leave_on_camera);

    let shutdown = CancellationToken::new();
    let state = AppState::new(Arc::new(pipeline), &config, shutdown.clone());
    let app = web::router(state, &config.server.public_dir, &config.server.captures_dir);

    tokio::spawn(shutdown_signal(shutdown.clone()));

    let served = web::run_server(&config.bind_addr(), app, shutdown.clone()).await;
    shutdown.cancel();

    info!("Releasing camera");
    let closing = Arc::clone(&session);
    if let Err(e) = tokio::task::spawn_blocking(move || closing.shutdown()).await {
        warn!(error = %e, "Camera shutdown did not complete");
    }

    served
}

fn select_driver(simulated: bool) -> Result<Box<dyn DeviceDriver>> {
    if simulated {
        info!("Using simulated camera");
        return Ok(Box::new(SimulatedDriver::default()));
    }

    #[cfg(feature = "gphoto2")]
    {
        Ok(Box::new(tethercam::device::GphotoDriver))
    }

    #[cfg(not(feature = "gphoto2"))]
    {
        anyhow::bail!("built without camera hardware support; rebuild with --features gphoto2 or run with --simulated")
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutting down");
    token.cancel();
}
