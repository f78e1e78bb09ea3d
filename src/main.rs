use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use tokio::sync::mpsc;

use meter_bridge_lib::commands;
use meter_bridge_lib::config::{default_config_dir, AppConfig};
use meter_bridge_lib::core::bluetooth::{BluestPlatform, ScanEvent};
use meter_bridge_lib::core::payload::CommandTemplate;
use meter_bridge_lib::logging;
use meter_bridge_lib::state::AppState;

#[derive(Parser)]
#[command(name = "meter-bridge")]
#[command(about = "Send command payloads to a BLE meter")]
struct Cli {
    /// Config directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices bonded with this machine
    Devices,
    /// Scan for nearby devices
    Scan {
        /// Scan duration in seconds (defaults to the configured scan window)
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Select the device commands are sent to
    Select {
        address: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Build a command payload and send it to the selected device
    Send {
        /// Command definition as JSON
        #[arg(short, long)]
        command: PathBuf,
        /// Parameter value as KEY=VALUE, repeatable
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Print the CheckSum8 Modulo 256 of a hex string
    Checksum { hex: String },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", raw))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_logging();
    let cli = Cli::parse();
    let config_dir = cli.config_dir;

    match cli.command {
        Commands::Checksum { hex } => {
            println!("{}", commands::calculate_checksum(&hex).map_err(|e| anyhow!(e))?);
        }
        Commands::Devices => {
            let app_state = load_state(config_dir).await?;
            let devices = commands::list_bonded_devices(&app_state).await;
            println!("Found {} bonded devices:", devices.len());
            for device in devices {
                println!("  {} ({})", device.name, device.address);
            }
        }
        Commands::Scan { seconds } => {
            let app_state = load_state(config_dir).await?;
            scan(&app_state, seconds).await?;
        }
        Commands::Select { address, name } => {
            let app_state = load_state(config_dir).await?;
            let device = commands::select_device(&app_state, &address, name.as_deref())
                .await
                .map_err(|e| anyhow!(e))?;
            println!("Selected {} ({})", device.name, device.address);
        }
        Commands::Send { command, params } => {
            let json = tokio::fs::read_to_string(&command)
                .await
                .with_context(|| format!("Failed to read command file {:?}", command))?;
            let template = CommandTemplate::from_json(&json)?;
            let values: HashMap<String, String> = params.into_iter().collect();

            let app_state = load_state(config_dir).await?;
            let payload = commands::send_command(&app_state, &template, &values)
                .await
                .map_err(|e| anyhow!(e))?;
            println!("Sent {}", payload);
            commands::disconnect(&app_state).await;
        }
    }

    Ok(())
}

async fn load_state(config_dir: Option<PathBuf>) -> Result<AppState> {
    let config_dir = match config_dir {
        Some(dir) => dir,
        None => default_config_dir()?,
    };
    info!("Using config directory {:?}", config_dir);
    let config = AppConfig::load(&config_dir).await?;
    let platform = Arc::new(BluestPlatform::new(config.bluetooth.connect_timeout()).await);
    Ok(AppState::with_config(platform, config_dir, config))
}

async fn scan(app_state: &AppState, seconds: Option<u64>) -> Result<()> {
    if let Some(seconds) = seconds {
        commands::set_scan_window(app_state, Duration::from_secs(seconds)).await;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    commands::start_scan(app_state, tx).await.map_err(|e| anyhow!(e))?;

    let mut found = 0;
    while let Some(event) = rx.recv().await {
        match event {
            ScanEvent::DeviceFound(device) => {
                found += 1;
                println!("  {} ({})", device.name, device.address);
            }
            ScanEvent::Error(e) => bail!("Scan failed: {}", e),
            ScanEvent::Finished => break,
        }
    }
    println!("Scan finished, {} devices found.", found);
    Ok(())
}
