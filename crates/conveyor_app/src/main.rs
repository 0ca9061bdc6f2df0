mod cli;
mod logging;
mod paths;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use conveyor_network::{ConveyorConfig, ConveyorId, Layout, LayoutSpec, ServiceKind};

use crate::cli::{Command, RunOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let command = cli::parse_args(std::env::args().skip(1))?;
    let opts = match command {
        Command::Help => {
            println!("{}", cli::USAGE);
            return Ok(());
        }
        Command::Run(opts) => opts,
    };

    let _guard = logging::init_logging(&paths::logs_dir()?)?;
    info!("Starting conveyor v{}", env!("CARGO_PKG_VERSION"));

    let result = run(opts).await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

async fn run(opts: RunOptions) -> Result<()> {
    let config_path = match opts.config {
        Some(path) => path,
        None => paths::config_path()?,
    };
    let config = ConveyorConfig::load_or_default(&config_path);

    let spec = match &opts.layout {
        Some(path) => LayoutSpec::load_from_file(path)
            .with_context(|| format!("Failed to load layout {}", path.display()))?,
        None => LayoutSpec::reference_plant(),
    };

    // Worst case per hop: belt time, first wait, then backoff plus wait per retry.
    let longest_belt = spec.conveyors.iter().map(|c| c.transfer_time).max().unwrap_or(1);
    let per_hop = config.hop_duration(longest_belt)
        + config.load_reply_timeout
        + (config.retry_backoff + config.retry_reply_timeout) * config.max_retries;
    let patience = config.discovery_window * 2 + per_hop * (spec.conveyors.len() as u32 + 1);

    let layout = Layout::spawn(&spec, config).await?;
    let mut client = layout.client("operator").await?;
    let registered = layout.switchboard().list(ServiceKind::Conveyor).await;
    info!(
        "{} conveyors on the switchboard: {}",
        registered.len(),
        registered
            .iter()
            .map(|entry| entry.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let source = ConveyorId::from(opts.source.as_str());
    let destination = ConveyorId::from(opts.destination.as_str());

    let outcome = async {
        let loaded = client.load(&source).await?;
        info!("{source}: {loaded}");
        client.transfer(&source, &destination, opts.reroute).await?;
        info!("Transfer from {source} to {destination} requested");
        client
            .wait_for_transfer_finished(patience)
            .await
            .map_err(anyhow::Error::from)
    }
    .await;

    match &outcome {
        Ok(reported_by) => {
            info!("Transfer finished, reported by {reported_by}");
            println!("Pallet delivered to {destination}");
        }
        Err(e) => warn!("Transfer did not finish: {e}"),
    }

    for id in layout.conveyor_ids() {
        if let Some(handle) = layout.conveyor(id.as_str()) {
            let info = handle.info();
            info!(
                "{id}: {} {}",
                info.status,
                if info.pallet_loaded { "loaded" } else { "empty" }
            );
        }
    }

    client.disconnect().await;
    // Give in-flight notices a moment before tearing the actors down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    layout.shutdown().await;

    outcome.map(|_| ())
}
