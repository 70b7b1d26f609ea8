// src/main.rs - Arm host: config, hardware backend and command transports
use std::path::PathBuf;
#[cfg(feature = "rpi")]
use std::sync::Arc;

use arm_rs::communication::{open_serial, serve_lines, serve_serial};
use arm_rs::config::{self, Config, HardwareBackend};
use arm_rs::{web, Arm};
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::broadcast;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Robotic arm motion control host
#[derive(Parser, Debug)]
#[command(name = "arm-host", version, about = "Robotic arm motion control host")]
struct Cli {
    /// Path to a TOML config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum log level
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Override the HTTP bind address
    #[arg(long)]
    http_bind: Option<String>,

    /// Disable the HTTP/WebSocket server
    #[arg(long)]
    no_http: bool,

    /// Serve line commands on this serial port
    #[arg(long)]
    serial_port: Option<String>,

    /// Serve line commands on stdin/stdout
    #[arg(long)]
    console: bool,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    tracing::info!("Starting arm host");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            let path = path.to_string_lossy();
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(&path).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path, e);
                Box::new(e) as BoxError
            })?
        }
        None => {
            tracing::info!("No config file given, using reference arm defaults");
            Config::default()
        }
    };
    if let Some(bind) = cli.http_bind {
        config.transport.http_bind = bind;
    }
    if let Some(port) = cli.serial_port {
        config.transport.serial_port = Some(port);
    }
    config.transport.console |= cli.console;

    tracing::info!(
        "Arm: {} (L1={} L2={} margin={})",
        config.arm.name, config.arm.link1, config.arm.link2, config.arm.safety_margin
    );

    let arm = match config.hardware.backend {
        HardwareBackend::Simulated => {
            tracing::info!("Using simulated hardware");
            let (arm, _sim) = Arm::simulated(config.clone());
            arm
        }
        HardwareBackend::Rpi => start_rpi(config.clone())?,
    };
    let handle = arm.handle();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    if !cli.no_http {
        let app = web::create_router(handle.clone());
        let listener = tokio::net::TcpListener::bind(&config.transport.http_bind).await?;
        tracing::info!("Web API listening on http://{}", listener.local_addr()?);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            });
            if let Err(e) = server.await {
                tracing::error!("Web server error: {}", e);
            }
        }));
    }

    if let Some(path) = &config.transport.serial_port {
        let port = open_serial(path, config.transport.serial_baud)?;
        let handle = handle.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_serial(port, handle, shutdown_rx).await {
                tracing::error!("Serial transport error: {}", e);
            }
        }));
    }

    if config.transport.console {
        let handle = handle.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = serve_lines(stdin, tokio::io::stdout(), handle, shutdown_rx).await {
                tracing::error!("Console transport error: {}", e);
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received");
    if let Err(e) = handle.emergency_stop() {
        tracing::warn!("Could not stop arm: {}", e);
    }
    let _ = shutdown_tx.send(());
    for task in tasks {
        let _ = task.await;
    }
    arm.shutdown().await;
    Ok(())
}

#[cfg(feature = "rpi")]
fn start_rpi(config: Config) -> Result<Arm, BoxError> {
    use arm_rs::hardware::{rpi::RpiArm, EncoderTrack};
    let tracks = Arc::new(EncoderTrack::new(config.encoder.debounce_us));
    let rpi = RpiArm::new(&config.hardware.pins, tracks.clone())?;
    Ok(Arm::start(config, rpi, tracks))
}

#[cfg(not(feature = "rpi"))]
fn start_rpi(_config: Config) -> Result<Arm, BoxError> {
    tracing::error!("Config selects the rpi backend but this build lacks the `rpi` feature");
    Err("rpi backend not compiled in".into())
}
