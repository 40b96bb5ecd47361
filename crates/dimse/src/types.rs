//! Common types for DIMSE operations

use std::fmt;

use serde::{Deserialize, Serialize};

/// DIMSE operation status, classified from the raw status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimseStatus {
    /// Operation completed successfully
    Success,
    /// Operation is pending (more responses to follow)
    Pending(u16),
    /// Operation cancelled by user
    Cancel,
    /// Operation failed with error
    Failure(u16), // DICOM status code
    /// Warning occurred during operation
    Warning(u16), // DICOM status code
}

impl DimseStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => DimseStatus::Success,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => DimseStatus::Warning(code),
            0xFE00 => DimseStatus::Cancel,
            0xFF00 | 0xFF01 => DimseStatus::Pending(code),
            _ => DimseStatus::Failure(code),
        }
    }

    pub fn code(&self) -> u16 {
        match *self {
            DimseStatus::Success => 0x0000,
            DimseStatus::Cancel => 0xFE00,
            DimseStatus::Pending(code) | DimseStatus::Failure(code) | DimseStatus::Warning(code) => code,
        }
    }

    /// Status meaning for the codes a Storage SCP may return
    pub fn description(&self) -> &'static str {
        match self.code() {
            0x0000 => "Success",
            0x0001 => "Warning: requested optional attributes are not supported",
            0x0107 => "Warning: attribute list error",
            0x0116 => "Warning: attribute value out of range",
            0xB000 => "Warning: coercion of data elements",
            0xB006 => "Warning: elements discarded",
            0xB007 => "Warning: data set does not match SOP class",
            0x0110 => "Failure: processing failure",
            0x0111 => "Failure: duplicate SOP instance",
            0x0117 => "Failure: invalid object instance",
            0x0122 => "Failure: refused, SOP class not supported",
            0x0124 => "Failure: refused, not authorized",
            0x0210 => "Failure: duplicate invocation",
            0x0211 => "Failure: unrecognised operation",
            0x0212 => "Failure: mistyped argument",
            0x0213 => "Failure: resource limitation",
            0xA700..=0xA7FF => "Refused: out of resources",
            0xA900..=0xA9FF => "Error: data set does not match SOP class",
            0xC000..=0xCFFF => "Error: cannot understand",
            0xFE00 => "Cancel",
            0xFF00 | 0xFF01 => "Pending",
            _ => match self {
                DimseStatus::Warning(_) => "Warning",
                _ => "Failure",
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DimseStatus::Success)
    }

    /// Success or Warning: the object was stored
    pub fn is_stored(&self) -> bool {
        matches!(self, DimseStatus::Success | DimseStatus::Warning(_))
    }
}

impl fmt::Display for DimseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} ({})", self.code(), self.description())
    }
}

/// Status returned by a C-STORE, with the peer's optional error comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub status: DimseStatus,
    pub comment: Option<String>,
}

impl Status {
    pub fn new(code: u16, comment: Option<String>) -> Self {
        Self {
            status: DimseStatus::from_code(code),
            comment,
        }
    }

    pub fn code(&self) -> u16 {
        self.status.code()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.comment {
            Some(comment) => write!(f, "{} [{}]", self.status, comment),
            None => write!(f, "{}", self.status),
        }
    }
}

/// Priority levels for C-STORE operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority
    Low,
    /// Medium priority (default)
    #[default]
    Medium,
    /// High priority
    High,
}

impl Priority {
    pub fn code(self) -> u16 {
        match self {
            Priority::Medium => 0x0000,
            Priority::High => 0x0001,
            Priority::Low => 0x0002,
        }
    }
}
