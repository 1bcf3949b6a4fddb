//! NearMesh CLI library
//!
//! Argument parsing, layered configuration loading and the mesh simulator
//! behind the `nearmesh` binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod simulate;

pub use cli::{Cli, Commands};
pub use config::{load_configuration, render_configuration, ConfigOverrides};
pub use error::{CliError, Result};
pub use simulate::{run_simulation, SimulationOptions, SimulationReport};
