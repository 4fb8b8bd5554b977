//! sentineld - MediSentinel daemon
//!
//! Runs the orchestration and telemetry cores until interrupted, or walks
//! through a scripted emergency with `sentineld demo`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sentinel_runtime::{init_tracing, Sentinel, SentinelConfig};
use sentinel_types::{
    DeviceId, DeviceRegistration, EmergencyContact, VitalName, VitalSample, WorkflowKind,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// MediSentinel daemon CLI
#[derive(Parser)]
#[command(name = "sentineld")]
#[command(about = "MediSentinel - hospital case orchestration and device alerting", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "SENTINEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "SENTINEL_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run until Ctrl-C (default)
    Run,
    /// Register a device, start an emergency intake and stream a breach
    Demo,
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        SentinelConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }

    if let Some(Command::Config) = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    init_tracing(&config.logging).context("installing tracing subscriber")?;

    let sentinel = Sentinel::from_config(config)
        .await
        .context("starting MediSentinel")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Demo => demo(&sentinel).await?,
        _ => {
            info!("sentineld running, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
        }
    }

    sentinel.shutdown().await;
    Ok(())
}

async fn demo(sentinel: &Sentinel) -> anyhow::Result<()> {
    let device = sentinel.register_device(
        DeviceRegistration::new("demo-watch", "demo-patient")
            .with_model("Apple Watch Series 9")
            .with_contact(
                EmergencyContact::new("Jane Doe", "spouse", "+1-555-0100")
                    .with_email("jane@example.com")
                    .primary(),
            )
            .with_contact(EmergencyContact::new("John Doe", "brother", "+1-555-0101")),
    )?;

    let session_id = sentinel
        .start_workflow(
            WorkflowKind::EmergencyIntake,
            serde_json::json!({
                "patient_name": "Demo Patient",
                "device_id": &device.device_id,
            }),
        )
        .await?;

    let device_id: DeviceId = device.device_id;
    let start = chrono::Utc::now();
    for (i, heart_rate) in [88.0, 130.0, 135.0, 92.0].into_iter().enumerate() {
        let report = sentinel
            .ingest(
                VitalSample::new(device_id.clone(), start + chrono::Duration::seconds(i as i64))
                    .with(VitalName::HeartRate, heart_rate),
            )
            .await?;
        info!(
            heart_rate,
            opened = report.opened.len(),
            updated = report.updated.len(),
            closed = report.closed.len(),
            "Sample ingested"
        );
    }

    let session = sentinel.wait_until_settled(&session_id).await?;
    // Let the detached notification tasks record their final status
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("{}", serde_json::to_string_pretty(&session.view())?);
    println!(
        "{}",
        serde_json::to_string_pretty(&sentinel.device_status(&device_id).await?)?
    );
    Ok(())
}
