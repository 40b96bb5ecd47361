//! Configuration types for the Storage SCU

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::transfer_syntax::{TransferSyntax, TransferSyntaxPolicy};

/// Smallest maximum PDU length accepted in configuration
pub const MIN_MAX_PDU: u32 = 4096;
/// Largest maximum PDU length accepted in configuration
pub const MAX_MAX_PDU: u32 = 131072;

/// Configuration for DIMSE services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimseConfig {
    /// Local (calling) Application Entity Title
    #[serde(default = "default_calling_aet")]
    pub calling_aet: String,

    /// Maximum PDU length advertised to the peer, in bytes
    #[serde(default = "default_max_pdu")]
    pub max_pdu: u32,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Wait for A-ASSOCIATE-AC/RJ and A-RELEASE-RP in milliseconds
    #[serde(default = "default_acse_timeout")]
    pub acse_timeout_ms: u64,

    /// Wait for the C-STORE-RSP in milliseconds
    #[serde(default = "default_dimse_timeout")]
    pub dimse_timeout_ms: u64,

    /// Preferred transfer syntaxes (in order of preference)
    #[serde(default = "default_transfer_syntaxes")]
    pub preferred_transfer_syntaxes: Vec<String>,

    /// Handling of unrecognised transfer syntax UIDs in input files
    #[serde(default)]
    pub transfer_syntax_policy: TransferSyntaxPolicy,
}

/// Configuration for a remote DICOM node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteNode {
    /// Remote (called) Application Entity Title
    pub ae_title: String,

    /// Remote host address
    pub host: String,

    /// Remote port
    pub port: u16,

    /// Connection timeout in milliseconds (overrides global setting)
    pub connect_timeout_ms: Option<u64>,
}

impl Default for DimseConfig {
    fn default() -> Self {
        Self {
            calling_aet: default_calling_aet(),
            max_pdu: default_max_pdu(),
            connect_timeout_ms: default_connect_timeout(),
            acse_timeout_ms: default_acse_timeout(),
            dimse_timeout_ms: default_dimse_timeout(),
            preferred_transfer_syntaxes: default_transfer_syntaxes(),
            transfer_syntax_policy: TransferSyntaxPolicy::default(),
        }
    }
}

impl DimseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn acse_timeout(&self) -> Duration {
        Duration::from_millis(self.acse_timeout_ms)
    }

    pub fn dimse_timeout(&self) -> Duration {
        Duration::from_millis(self.dimse_timeout_ms)
    }

    /// Proposed transfer syntaxes, resolved from their UIDs
    pub fn transfer_syntaxes(&self) -> crate::error::Result<Vec<TransferSyntax>> {
        self.preferred_transfer_syntaxes
            .iter()
            .map(|uid| {
                TransferSyntax::from_uid(uid).ok_or_else(|| {
                    crate::error::DimseError::config(format!(
                        "Transfer syntax {} is not supported for proposal",
                        uid
                    ))
                })
            })
            .collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        // Validate AE title
        validate_ae_title(&self.calling_aet, "Calling")?;

        // Validate PDU size
        if self.max_pdu < MIN_MAX_PDU || self.max_pdu > MAX_MAX_PDU {
            return Err(crate::error::DimseError::config(format!(
                "Max PDU size must be between {} and {} bytes",
                MIN_MAX_PDU, MAX_MAX_PDU
            )));
        }

        if self.connect_timeout_ms == 0 || self.acse_timeout_ms == 0 || self.dimse_timeout_ms == 0 {
            return Err(crate::error::DimseError::config(
                "Timeouts must be greater than 0",
            ));
        }

        if self.preferred_transfer_syntaxes.is_empty() {
            return Err(crate::error::DimseError::config(
                "At least one transfer syntax must be proposed",
            ));
        }
        self.transfer_syntaxes()?;

        Ok(())
    }
}

impl RemoteNode {
    /// Create a new remote node configuration
    pub fn new(ae_title: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            ae_title: ae_title.into(),
            host: host.into(),
            port,
            connect_timeout_ms: None,
        }
    }

    /// Set connection timeout for this node
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = Some(timeout_ms);
        self
    }

    /// `host:port` for connecting and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the remote node configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        validate_ae_title(&self.ae_title, "Remote")?;

        if self.host.is_empty() {
            return Err(crate::error::DimseError::config(
                "Remote host cannot be empty"
            ));
        }

        if self.port == 0 {
            return Err(crate::error::DimseError::config(
                "Remote port must be greater than 0"
            ));
        }

        Ok(())
    }
}

/// Titles longer than 16 characters are accepted; the A-ASSOCIATE-RQ
/// carries only their first 16 bytes.
fn validate_ae_title(title: &str, which: &str) -> crate::error::Result<()> {
    if title.trim().is_empty() {
        return Err(crate::error::DimseError::config(format!(
            "{} AE title must not be empty",
            which
        )));
    }
    if !title.chars().all(|c| c.is_ascii() && !c.is_ascii_control() && c != '\\') {
        return Err(crate::error::DimseError::config(format!(
            "{} AE title contains invalid characters",
            which
        )));
    }
    if title.len() > AE_TITLE_LEN {
        warn!(
            "{} AE title '{}' is longer than {} characters and will be truncated",
            which, title, AE_TITLE_LEN
        );
    }
    Ok(())
}

const AE_TITLE_LEN: usize = 16;

// Default value functions
fn default_calling_aet() -> String {
    "STORESCU".to_string()
}

fn default_max_pdu() -> u32 {
    16384
}

fn default_connect_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_acse_timeout() -> u64 {
    30_000
}

fn default_dimse_timeout() -> u64 {
    60_000
}

fn default_transfer_syntaxes() -> Vec<String> {
    TransferSyntax::ALL.iter().map(|ts| ts.uid().to_string()).collect()
}
