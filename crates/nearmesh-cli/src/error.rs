//! Error handling for the NearMesh CLI

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Mesh error: {0}")]
    Mesh(#[from] nearmesh_core::MeshError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML formatting error: {0}")]
    TomlFormatting(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
