// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # ACP Node
//!
//! The `acp-node` binary hosts one ACP gateway and its task dispatcher.
//!
//! Agents connect over WebSocket (`ws://<host>:<port>/acp`), register their
//! capabilities and receive tasks placed by the dispatcher. Result, state and
//! heartbeat messages flow back into the dispatcher through the event bus.
//!
//! Configuration is discovered as described on
//! [`acp_core::domain::node_config::NodeConfigManifest::load_or_default`]; the
//! flags below override it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use acp_core::domain::node_config::{NodeConfigManifest, SchedulingStrategy};
use acp_orchestrator::node;

/// ACP Node - gateway and capability-aware task dispatcher
#[derive(Parser)]
#[command(name = "acp-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// WebSocket listen port
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ACP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Scheduling strategy (round_robin, least_loaded, capability_match, random)
    #[arg(long)]
    strategy: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let mut config = NodeConfigManifest::load_or_default(cli.config)?;
    if let Some(port) = cli.port {
        config.spec.server.port = port;
    }
    if let Some(strategy) = cli.strategy {
        config.spec.dispatcher.strategy = strategy
            .parse::<SchedulingStrategy>()
            .context("Invalid --strategy")?;
    }
    config.validate()?;

    node::run(config).await
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
