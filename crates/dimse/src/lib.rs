//! DIMSE (DICOM Message Service Element) implementation
//!
//! This crate provides a Storage Service Class User (SCU): it reads a DICOM
//! Part 10 file, corrects ambiguous value representations, negotiates an
//! association over the DICOM Upper Layer protocol and sends the object with
//! a C-STORE request.
//!
//! # Features
//! - Transfer syntax resolution for the three uncompressed syntaxes
//! - Ambiguous VR correction (PS3.5 Annex A)
//! - A-ASSOCIATE / P-DATA / A-RELEASE / A-ABORT over a `tokio_util` codec
//! - C-STORE with fragmentation bounded by the peer's maximum PDU length

pub mod association;
pub mod command;
pub mod config;
pub mod correct;
pub mod dataset;
pub mod error;
pub mod pdu;
pub mod scu;
pub mod transfer_syntax;
pub mod types;
pub mod vr;

// Re-export commonly used types
pub use association::{Association, AssociationParameters, AssociationState, NegotiatedContext};
pub use config::{DimseConfig, RemoteNode};
pub use correct::correct_ambiguous_vr;
pub use dataset::{DataElement, DataSet, Tag, Value};
pub use error::{DimseError, Result};
pub use scu::{DimseScu, StoreOptions};
pub use transfer_syntax::{ByteOrder, TransferSyntax, TransferSyntaxPolicy, VrMode};
pub use types::{DimseStatus, Status};
pub use vr::{Ambiguity, Vr};
pub use dicom_core::VR;

/// Implementation Class UID sent in A-ASSOCIATE-RQ and written to file meta
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.186096620479741211067182216319720675578";

/// Implementation Version Name sent in A-ASSOCIATE-RQ
pub const IMPLEMENTATION_VERSION_NAME: &str = concat!("STORESCU_", env!("CARGO_PKG_VERSION"));
