// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SimCor Node
//!
//! Runs one participant of a SimCor hybrid simulation:
//! - `coordinator`: accepts clients and broadcasts one trigger per step
//! - `client`: connects to a coordinator and answers its triggers
//! - `responder`: accepts one point-to-point session and answers commands
//! - `initiator`: connects to a responder and sends one command per step
//!
//! # Usage
//!
//! ```bash
//! # Coordinator on the default port (11997), 10 steps
//! simcor-node --mode coordinator --steps 10
//!
//! # Client of a remote coordinator
//! simcor-node --mode client --remote 192.168.1.20:11997 --model MDL-01
//!
//! # Everything from a config file
//! simcor-node --mode responder --config node.json
//! ```

use clap::{Parser, ValueEnum};
use simcor::SimCorConfig;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod modes;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Coordinator,
    Client,
    Responder,
    Initiator,
}

/// SimCor Node - coordinator, client and point-to-point roles
#[derive(Parser, Debug)]
#[command(name = "simcor-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Role to run
    #[arg(short, long, value_enum, default_value = "coordinator")]
    mode: Mode,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(short, long, default_value = "11997")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Remote endpoint for client/initiator roles (host:port)
    #[arg(short, long)]
    remote: Option<String>,

    /// Local model name
    #[arg(long, default_value = "MDL-00")]
    model: String,

    /// Steps to run (0 = until interrupted)
    #[arg(long, default_value = "0")]
    steps: u32,

    /// Delay between steps in milliseconds
    #[arg(long, default_value = "1000")]
    step_interval_ms: u64,

    /// JSON-lines transaction archive
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let config = if let Some(config_path) = &args.config {
        info!("Loading config from {:?}", config_path);
        SimCorConfig::from_file(config_path)?
    } else {
        SimCorConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            remote_address: args.remote.as_deref().map(str::parse::<std::net::SocketAddr>).transpose()?,
            model: args.model.clone(),
            archive_path: args.archive.clone(),
            ..Default::default()
        }
    };

    info!("+----------------------------------------------------+");
    info!("|       SimCor Node v{:<30} |", env!("CARGO_PKG_VERSION"));
    info!("+----------------------------------------------------+");
    info!("|  Mode:   {:40} |", format!("{:?}", args.mode));
    info!("|  Model:  {:40} |", config.address().to_string());
    match args.mode {
        Mode::Coordinator | Mode::Responder => info!("|  Bind:   {:40} |", config.bind_socket_addr()),
        Mode::Client | Mode::Initiator => info!(
            "|  Remote: {:40} |",
            config
                .remote_address
                .map(|a| a.to_string())
                .unwrap_or_else(|| "<none>".into())
        ),
    }
    info!(
        "|  Steps:  {:40} |",
        if args.steps == 0 {
            "unlimited".to_string()
        } else {
            args.steps.to_string()
        }
    );
    info!("+----------------------------------------------------+");

    let plan = modes::StepPlan {
        steps: args.steps,
        interval: std::time::Duration::from_millis(args.step_interval_ms.max(1)),
    };

    match args.mode {
        Mode::Coordinator => modes::run_coordinator(&config, plan).await?,
        Mode::Client => modes::run_client(&config).await?,
        Mode::Responder => modes::run_responder(&config).await?,
        Mode::Initiator => modes::run_initiator(&config, plan).await?,
    }

    info!("SimCor node stopped");
    Ok(())
}
