use std::path::{Path, PathBuf};

use dimse::{DimseConfig, DimseError, RemoteNode, TransferSyntaxPolicy};
use serde::Deserialize;
use thiserror::Error;

use crate::config::{Cli, LoggingConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("log_to_file is set but log_file_path is empty")]
    MissingLogFilePath,

    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Invalid(#[from] DimseError),
}

/// Settings file contents; every section is optional
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dimse: DimseConfig,
}

impl Config {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Configuration file (if any) with command line overrides applied
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(aet) = &cli.calling_aet {
            config.dimse.calling_aet = aet.clone();
        }
        if let Some(max_pdu) = cli.max_pdu {
            config.dimse.max_pdu = max_pdu;
        }
        if cli.ts_fallback {
            config.dimse.transfer_syntax_policy = TransferSyntaxPolicy::FallbackBigEndian;
        }
        if let Some(level) = cli.requested_level() {
            config.logging.level = level;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.log_to_file && self.logging.log_file_path.trim().is_empty() {
            return Err(ConfigError::MissingLogFilePath);
        }
        self.dimse.validate()?;
        Ok(())
    }
}

/// Peer named on the command line
pub fn remote_node(cli: &Cli) -> RemoteNode {
    RemoteNode::new(cli.called_aet.clone(), cli.peer.clone(), cli.port)
}
