//! NearMesh CLI entry point

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nearmesh_cli::{
    cli::{Cli, Commands},
    config::{load_configuration, render_configuration, ConfigOverrides},
    simulate::{run_simulation, SimulationOptions},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let overrides = ConfigOverrides {
        config_path: cli.config.clone(),
        service_id: cli.service_id.clone(),
        dedup_horizon_ms: cli.dedup_horizon_ms,
    };
    let config = load_configuration(&overrides).context("Failed to load configuration")?;

    match cli.command {
        Commands::Simulate {
            devices,
            topology,
            messages,
            from,
            info_level,
            settle_ms,
        } => {
            let options = SimulationOptions {
                devices,
                topology,
                messages,
                from,
                info_level,
                settle: Duration::from_millis(settle_ms),
            };
            info!(devices, %topology, "Starting simulation");
            let report = run_simulation(&config, &options)
                .await
                .context("Simulation failed")?;
            print!("{report}");

            let complete = report.fully_delivered(options.messages.len());
            if complete < devices {
                anyhow::bail!("only {complete} of {devices} devices received every message");
            }
        }
        Commands::Config => {
            let rendered =
                render_configuration(&config).context("Failed to render configuration")?;
            print!("{rendered}");
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
