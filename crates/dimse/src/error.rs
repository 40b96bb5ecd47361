//! Error types for DIMSE operations

use std::path::PathBuf;

use thiserror::Error;

use crate::dataset::Tag;

/// Result type alias for DIMSE operations
pub type Result<T> = std::result::Result<T, DimseError>;

/// Error types that can occur while preparing or storing a DICOM object
#[derive(Error, Debug)]
pub enum DimseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot read input file {}: {source}", path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File may not be DICOM {}: {reason}", path.display())]
    NotDicom { path: PathBuf, reason: String },

    #[error("Unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    #[error("Malformed value for element {tag}: {reason}")]
    MalformedElementValue { tag: Tag, reason: String },

    #[error("Association with {peer} failed: {reason}")]
    AssociationFailed { peer: String, reason: String },

    #[error("Association rejected: {0}")]
    AssociationRejected(crate::pdu::RejectReason),

    #[error("Transfer interrupted: {0}")]
    TransferInterrupted(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),
}

impl DimseError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn malformed(tag: Tag, reason: impl Into<String>) -> Self {
        Self::MalformedElementValue {
            tag,
            reason: reason.into(),
        }
    }

    /// Errors raised before any connection is opened
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            DimseError::Config(_)
                | DimseError::FileUnreadable { .. }
                | DimseError::NotDicom { .. }
                | DimseError::UnsupportedTransferSyntax(_)
                | DimseError::MalformedElementValue { .. }
        )
    }

    /// Errors meaning no association was ever established
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            DimseError::AssociationFailed { .. } | DimseError::AssociationRejected(_)
        )
    }

    /// Check whether the transport can still carry an orderly release
    pub fn leaves_transport_usable(&self) -> bool {
        !matches!(
            self,
            DimseError::Network(_)
                | DimseError::TransferInterrupted(_)
                | DimseError::Timeout(_)
                | DimseError::Cancelled
                | DimseError::Protocol(_)
        )
    }
}
