//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nearmesh_harness::Topology;

#[derive(Parser)]
#[command(author, version, about = "Simulate a NearMesh relay network", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (defaults to ./nearmesh.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Service id the devices advertise and discover
    #[arg(long, global = true)]
    pub service_id: Option<String>,

    /// Forget seen message ids after this many milliseconds
    #[arg(long, global = true)]
    pub dedup_horizon_ms: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run N devices over an in-memory radio and flood messages through them
    Simulate {
        /// Number of simulated devices
        #[arg(short, long, default_value_t = 3)]
        devices: usize,

        /// Which devices are in range of each other: full, line, ring or star
        #[arg(short, long, default_value_t = Topology::Line)]
        topology: Topology,

        /// Message body to send (repeat for several messages)
        #[arg(short, long = "message", default_value = "hello mesh")]
        messages: Vec<String>,

        /// Index of the sending device
        #[arg(short, long, default_value_t = 0)]
        from: usize,

        /// Info level attached to each message
        #[arg(long)]
        info_level: Option<String>,

        /// How long to wait for links and deliveries
        #[arg(long, default_value_t = 3000)]
        settle_ms: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}
