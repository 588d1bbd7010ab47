use std::io;

use reveille_core::config::ConfigError;
use reveille_core::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] reveille_core::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    SyncConfig(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync hub is not configured. Set hubUrl and userId in the config file, or REVEILLE_HUB_URL and REVEILLE_USER_ID.")]
    HubNotConfigured,
    #[error("Could not connect to the sync hub")]
    HubUnavailable,
}
