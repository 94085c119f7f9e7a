use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Config file not found. Looked in:\n\
        - current directory: hostflow.local.yaml, .hostflow.local.yaml, hostflow.yaml, .hostflow.yaml\n\
        - ./.hostflow/ directory\n\
        - ~/.config/hostflow/hostflow.yaml\n\
        or point HOSTFLOW_CONFIG_PATH at a file directly"
    )]
    ConfigFileNotFound,

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
