//! Transfer syntax resolution
//!
//! Maps the file meta TransferSyntaxUID onto the byte order and VR mode used
//! to read the data set. Only the three uncompressed syntaxes are supported;
//! what happens with any other UID is decided by [`TransferSyntaxPolicy`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{DimseError, Result};

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrMode {
    Implicit,
    Explicit,
}

/// The transfer syntaxes this SCU can read and transmit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferSyntax {
    ImplicitVrLittleEndian,
    ExplicitVrLittleEndian,
    ExplicitVrBigEndian,
}

/// What to do with a transfer syntax UID that is not one of the supported three
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferSyntaxPolicy {
    /// Reject the file with `UnsupportedTransferSyntax`
    #[default]
    Strict,
    /// Read it as explicit VR big endian
    FallbackBigEndian,
}

impl TransferSyntax {
    /// Local preference order used when proposing presentation contexts
    pub const ALL: [TransferSyntax; 3] = [
        TransferSyntax::ImplicitVrLittleEndian,
        TransferSyntax::ExplicitVrLittleEndian,
        TransferSyntax::ExplicitVrBigEndian,
    ];

    pub fn uid(self) -> &'static str {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => IMPLICIT_VR_LITTLE_ENDIAN,
            TransferSyntax::ExplicitVrLittleEndian => EXPLICIT_VR_LITTLE_ENDIAN,
            TransferSyntax::ExplicitVrBigEndian => EXPLICIT_VR_BIG_ENDIAN,
        }
    }

    pub fn byte_order(self) -> ByteOrder {
        match self {
            TransferSyntax::ExplicitVrBigEndian => ByteOrder::Big,
            _ => ByteOrder::Little,
        }
    }

    pub fn vr_mode(self) -> VrMode {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => VrMode::Implicit,
            _ => VrMode::Explicit,
        }
    }

    /// Look up one of the supported syntaxes by UID, ignoring UID padding
    pub fn from_uid(uid: &str) -> Option<Self> {
        match trim_uid(uid) {
            IMPLICIT_VR_LITTLE_ENDIAN => Some(TransferSyntax::ImplicitVrLittleEndian),
            EXPLICIT_VR_LITTLE_ENDIAN => Some(TransferSyntax::ExplicitVrLittleEndian),
            EXPLICIT_VR_BIG_ENDIAN => Some(TransferSyntax::ExplicitVrBigEndian),
            _ => None,
        }
    }

    /// Resolve the declared transfer syntax of a file under the given policy
    pub fn resolve(uid: &str, policy: TransferSyntaxPolicy) -> Result<Self> {
        if let Some(ts) = Self::from_uid(uid) {
            return Ok(ts);
        }
        match policy {
            TransferSyntaxPolicy::Strict => Err(DimseError::UnsupportedTransferSyntax(
                trim_uid(uid).to_string(),
            )),
            TransferSyntaxPolicy::FallbackBigEndian => {
                warn!(
                    "Unrecognised transfer syntax '{}', reading as explicit VR big endian",
                    trim_uid(uid)
                );
                Ok(TransferSyntax::ExplicitVrBigEndian)
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => "Implicit VR Little Endian",
            TransferSyntax::ExplicitVrLittleEndian => "Explicit VR Little Endian",
            TransferSyntax::ExplicitVrBigEndian => "Explicit VR Big Endian",
        }
    }
}

impl fmt::Display for TransferSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Strip the trailing NUL or space padding DICOM adds to odd-length UIDs
pub fn trim_uid(uid: &str) -> &str {
    uid.trim_end_matches(['\0', ' '])
}
