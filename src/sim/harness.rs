//! CLI entry point for the simulation harness: runs a command script against
//! the simulated arm and prints every telemetry record as a JSON line.

use std::path::PathBuf;

use arm_rs::command::{parse_command, Intent};
use arm_rs::config::{self, Config};
use arm_rs::telemetry::TelemetryEvent;
use arm_rs::Arm;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

/// Simulation Harness CLI
#[derive(Parser, Debug)]
#[command(name = "sim-harness", about = "Run arm commands against the simulated backend.")]
pub struct Cli {
    /// Path to a TOML config file (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File with one command per line
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Command to run, repeatable (e.g. --cmd calibrate --cmd x:5,y:15,z:3)
    #[arg(long = "cmd")]
    commands: Vec<String>,

    /// Also print the idle cadence records
    #[arg(long)]
    periodic: bool,

    /// Maximum log level (logs go to stderr)
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => match config::load_config(&path.to_string_lossy()) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let mut lines = cli.commands.clone();
    if let Some(path) = &cli.script {
        match std::fs::read_to_string(path) {
            Ok(text) => lines.extend(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(String::from),
            ),
            Err(e) => {
                eprintln!("Failed to read script {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }
    if lines.is_empty() {
        lines = vec!["calibrate".to_string(), "x:5.0,y:15.0,z:3".to_string()];
    }

    let (arm, _sim) = Arm::simulated(config);
    let handle = arm.handle();
    let mut telemetry_rx = handle.subscribe();
    let periodic = cli.periodic;
    let emitter = tokio::spawn(async move {
        loop {
            match telemetry_rx.recv().await {
                Ok(record) => {
                    if record.event == TelemetryEvent::Periodic && !periodic {
                        continue;
                    }
                    match serde_json::to_string(&record) {
                        Ok(json) => println!("{json}"),
                        Err(e) => eprintln!("Failed to encode telemetry: {e}"),
                    }
                }
                Err(RecvError::Lagged(n)) => eprintln!("Dropped {n} telemetry records"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    for line in &lines {
        let intent = match parse_command(line) {
            Ok(intent) => intent,
            Err(e) => {
                eprintln!("{line}: {e}");
                continue;
            }
        };
        let result = if intent == Intent::Stop {
            handle.emergency_stop().map(|_| arm_rs::Outcome::Completed)
        } else {
            handle.execute(intent).await
        };
        eprintln!("{line}: {result:?}");
    }

    // Let the last records drain before tearing down.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(handle);
    arm.shutdown().await;
    emitter.abort();
}
