// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SPP telemetry sender.
//!
//! Powers on the local adapter, connects to the configured peer and relays
//! each line read from stdin over the link.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spp_telemetry::bluetooth::{protocol, Address, Endpoint, LoopbackRadio, Radio};
use spp_telemetry::config::Config;
use spp_telemetry::events::EventProcessor;
use spp_telemetry::state::AppState;
use spp_telemetry::Session;

#[derive(Parser)]
#[command(name = "spp-telemetry")]
#[command(about = "Stream telemetry lines to a Bluetooth serial peer", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Peer address, overriding the configured one
    #[arg(short, long)]
    target: Option<Address>,

    /// Use the in-memory radio instead of BlueZ
    #[arg(long)]
    loopback: bool,

    /// Print events and status as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and relay stdin lines (default)
    Run,
    /// List devices the adapter knows about
    Devices {
        /// Scan for this many seconds before listing
        #[arg(long)]
        scan: Option<u64>,
    },
    /// Show adapter status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for JSON output.
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("spp_telemetry={}", log_level).parse()?),
        )
        .init();

    info!("Starting spp-telemetry v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(target) = cli.target {
        config.bluetooth.target_address = target;
    }
    info!("Configuration loaded");

    let loopback = cli.loopback.then(|| {
        let radio = Arc::new(LoopbackRadio::new());
        radio.add_device(config.bluetooth.target_address, Some("loopback-peer"), true);
        radio
    });
    let radio: Arc<dyn Radio> = match &loopback {
        Some(radio) => radio.clone(),
        None => bluez_radio(&config).await?,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(radio, loopback, config, cli.json).await,
        Commands::Devices { scan } => list_devices(radio, scan, cli.json).await,
        Commands::Status => show_status(radio, cli.json).await,
    }
}

#[cfg(feature = "bluez")]
async fn bluez_radio(config: &Config) -> Result<Arc<dyn Radio>> {
    use anyhow::Context;

    let radio = spp_telemetry::bluetooth::BluezRadio::new(config.bluetooth.rfcomm_channel)
        .await
        .context("Failed to connect to BlueZ")?;
    Ok(Arc::new(radio))
}

#[cfg(not(feature = "bluez"))]
async fn bluez_radio(_config: &Config) -> Result<Arc<dyn Radio>> {
    bail!("Built without BlueZ support; use --loopback")
}

async fn run(
    radio: Arc<dyn Radio>,
    loopback: Option<Arc<LoopbackRadio>>,
    config: Config,
    json: bool,
) -> Result<()> {
    let session = Session::initialize(radio, config.bluetooth.link_settings()).await?;
    let state = AppState::new();

    let processor = EventProcessor::new(state.clone(), json);
    let events = tokio::spawn(processor.run(session.events()));

    if !session.ensure_enabled(config.bluetooth.enable_wait()).await? {
        bail!("Bluetooth adapter did not power on");
    }

    let target = config.bluetooth.target_address;
    session.link().connect(Endpoint::new(target)).await;
    if !session.link().is_connected().await {
        session.shutdown().await;
        bail!("Could not connect to {}", target);
    }

    if let Some(radio) = &loopback {
        spawn_loopback_peer(radio, target);
    }

    info!("Ready. Relaying stdin to {}", target);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    session.link().send(&line).await;
                    state.record_sent();
                }
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    session.shutdown().await;
    info!("Relayed {} lines", state.snapshot().lines_sent);
    events.abort();
    Ok(())
}

/// Play the remote end of a loopback link, logging what arrives.
fn spawn_loopback_peer(radio: &LoopbackRadio, target: Address) {
    let Some(peer) = radio.take_peer(target) else {
        warn!("No loopback peer for {}", target);
        return;
    };

    tokio::spawn(async move {
        let mut lines = BufReader::new(peer).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match protocol::parse_sync(&line) {
                Some((name, address)) => info!("Peer got sync from {} ({})", name, address),
                None => info!("Peer received: {}", protocol::strip_terminator(&line)),
            }
        }
    });
}

async fn list_devices(radio: Arc<dyn Radio>, scan: Option<u64>, json: bool) -> Result<()> {
    if !radio.is_available() {
        bail!("No Bluetooth radio available");
    }

    if let Some(secs) = scan {
        radio.start_discovery().await?;
        info!("Scanning for {}s...", secs);
        tokio::time::sleep(Duration::from_secs(secs)).await;
        radio.cancel_discovery().await?;
    }

    let devices = radio.known_devices().await?;
    if json {
        println!("{}", serde_json::to_string(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No known devices");
    }
    for device in devices {
        println!(
            "{}  {}{}",
            device.endpoint.address,
            device.endpoint.display_name(),
            if device.paired { "  (paired)" } else { "" }
        );
    }
    Ok(())
}

async fn show_status(radio: Arc<dyn Radio>, json: bool) -> Result<()> {
    let available = radio.is_available();
    let powered = radio.is_powered().await;
    let identity = if available {
        Some((radio.local_name().await?, radio.local_address().await?))
    } else {
        None
    };

    if json {
        let status = serde_json::json!({
            "available": available,
            "enabled": available && powered,
            "name": identity.as_ref().map(|(name, _)| name),
            "address": identity.as_ref().map(|(_, address)| address),
        });
        println!("{}", status);
        return Ok(());
    }

    println!("Available: {}", if available { "yes" } else { "no" });
    println!("Enabled:   {}", if available && powered { "yes" } else { "no" });
    if let Some((name, address)) = identity {
        println!("Adapter:   {} ({})", name, address);
    }
    Ok(())
}
