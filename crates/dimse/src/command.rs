//! DIMSE command sets for C-STORE
//!
//! Command sets are group 0000 elements, always encoded implicit VR little
//! endian and led by CommandGroupLength (0000,0000).

use std::collections::BTreeMap;

use crate::dataset::Tag;
use crate::transfer_syntax::trim_uid;
use crate::types::{Priority, Status};
use crate::{DimseError, Result};

const GROUP_LENGTH: u16 = 0x0000;
const AFFECTED_SOP_CLASS_UID: u16 = 0x0002;
const COMMAND_FIELD: u16 = 0x0100;
const MESSAGE_ID: u16 = 0x0110;
const MESSAGE_ID_BEING_RESPONDED_TO: u16 = 0x0120;
const PRIORITY: u16 = 0x0700;
const COMMAND_DATA_SET_TYPE: u16 = 0x0800;
const STATUS: u16 = 0x0900;
const ERROR_COMMENT: u16 = 0x0902;
const AFFECTED_SOP_INSTANCE_UID: u16 = 0x1000;

pub const C_STORE_RQ: u16 = 0x0001;
pub const C_STORE_RSP: u16 = 0x8001;

/// CommandDataSetType when a data set follows
pub const DATA_SET_PRESENT: u16 = 0x0000;
/// CommandDataSetType when no data set follows
pub const NO_DATA_SET: u16 = 0x0101;

/// Raw group 0000 elements keyed by element number
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSet {
    fields: BTreeMap<u16, Vec<u8>>,
}

impl CommandSet {
    pub fn put_u16(&mut self, element: u16, value: u16) {
        self.fields.insert(element, value.to_le_bytes().to_vec());
    }

    /// UIDs are NUL padded, other text space padded
    pub fn put_str(&mut self, element: u16, value: &str, pad: u8) {
        let mut bytes = value.as_bytes().to_vec();
        if bytes.len() % 2 == 1 {
            bytes.push(pad);
        }
        self.fields.insert(element, bytes);
    }

    pub fn get_u16(&self, element: u16) -> Option<u16> {
        self.fields
            .get(&element)
            .filter(|v| v.len() >= 2)
            .map(|v| u16::from_le_bytes([v[0], v[1]]))
    }

    pub fn get_str(&self, element: u16) -> Option<String> {
        self.fields
            .get(&element)
            .map(|v| trim_uid(String::from_utf8_lossy(v).trim_start()).to_string())
    }

    fn require_u16(&self, element: u16) -> Result<u16> {
        self.get_u16(element)
            .ok_or_else(|| DimseError::protocol(format!("command set lacks {}", Tag(0x0000, element))))
    }

    pub fn command_field(&self) -> Result<u16> {
        self.require_u16(COMMAND_FIELD)
    }

    /// Whether a data set follows this command
    pub fn has_data_set(&self) -> bool {
        self.get_u16(COMMAND_DATA_SET_TYPE)
            .is_some_and(|t| t != NO_DATA_SET)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (element, value) in self.fields.iter().filter(|(e, _)| **e != GROUP_LENGTH) {
            body.extend_from_slice(&0x0000u16.to_le_bytes());
            body.extend_from_slice(&element.to_le_bytes());
            body.extend_from_slice(&(value.len() as u32).to_le_bytes());
            body.extend_from_slice(value);
        }
        let mut out = Vec::with_capacity(body.len() + 12);
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00]);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        let mut set = CommandSet::default();
        while !bytes.is_empty() {
            if bytes.len() < 8 {
                return Err(DimseError::protocol("truncated command element header"));
            }
            let group = u16::from_le_bytes([bytes[0], bytes[1]]);
            let element = u16::from_le_bytes([bytes[2], bytes[3]]);
            let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
            bytes = &bytes[8..];
            if bytes.len() < len {
                return Err(DimseError::protocol(format!(
                    "command element {} truncated",
                    Tag(group, element)
                )));
            }
            if group != 0x0000 {
                return Err(DimseError::protocol(format!(
                    "element {} outside the command group",
                    Tag(group, element)
                )));
            }
            set.fields.insert(element, bytes[..len].to_vec());
            bytes = &bytes[len..];
        }
        Ok(set)
    }
}

/// C-STORE-RQ command
#[derive(Debug, Clone, PartialEq)]
pub struct CStoreRq {
    pub message_id: u16,
    pub affected_sop_class_uid: String,
    pub affected_sop_instance_uid: String,
    pub priority: Priority,
}

impl CStoreRq {
    pub fn to_command_set(&self) -> CommandSet {
        let mut set = CommandSet::default();
        set.put_str(AFFECTED_SOP_CLASS_UID, &self.affected_sop_class_uid, 0x00);
        set.put_u16(COMMAND_FIELD, C_STORE_RQ);
        set.put_u16(MESSAGE_ID, self.message_id);
        set.put_u16(PRIORITY, self.priority.code());
        set.put_u16(COMMAND_DATA_SET_TYPE, DATA_SET_PRESENT);
        set.put_str(AFFECTED_SOP_INSTANCE_UID, &self.affected_sop_instance_uid, 0x00);
        set
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_command_set().encode()
    }

    pub fn from_command_set(set: &CommandSet) -> Result<Self> {
        let field = set.command_field()?;
        if field != C_STORE_RQ {
            return Err(DimseError::protocol(format!(
                "expected C-STORE-RQ, got command field 0x{:04X}",
                field
            )));
        }
        Ok(Self {
            message_id: set.require_u16(MESSAGE_ID)?,
            affected_sop_class_uid: set.get_str(AFFECTED_SOP_CLASS_UID).unwrap_or_default(),
            affected_sop_instance_uid: set.get_str(AFFECTED_SOP_INSTANCE_UID).unwrap_or_default(),
            priority: match set.get_u16(PRIORITY) {
                Some(0x0001) => Priority::High,
                Some(0x0002) => Priority::Low,
                _ => Priority::Medium,
            },
        })
    }
}

/// C-STORE-RSP command
#[derive(Debug, Clone, PartialEq)]
pub struct CStoreRsp {
    pub message_id_being_responded_to: u16,
    pub affected_sop_class_uid: Option<String>,
    pub affected_sop_instance_uid: Option<String>,
    pub status: Status,
}

impl CStoreRsp {
    pub fn to_command_set(&self) -> CommandSet {
        let mut set = CommandSet::default();
        if let Some(uid) = &self.affected_sop_class_uid {
            set.put_str(AFFECTED_SOP_CLASS_UID, uid, 0x00);
        }
        set.put_u16(COMMAND_FIELD, C_STORE_RSP);
        set.put_u16(MESSAGE_ID_BEING_RESPONDED_TO, self.message_id_being_responded_to);
        set.put_u16(COMMAND_DATA_SET_TYPE, NO_DATA_SET);
        set.put_u16(STATUS, self.status.code());
        if let Some(comment) = &self.status.comment {
            set.put_str(ERROR_COMMENT, comment, b' ');
        }
        if let Some(uid) = &self.affected_sop_instance_uid {
            set.put_str(AFFECTED_SOP_INSTANCE_UID, uid, 0x00);
        }
        set
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_command_set().encode()
    }

    pub fn from_command_set(set: &CommandSet) -> Result<Self> {
        let field = set.command_field()?;
        if field != C_STORE_RSP {
            return Err(DimseError::protocol(format!(
                "expected C-STORE-RSP, got command field 0x{:04X}",
                field
            )));
        }
        let comment = set.get_str(ERROR_COMMENT).filter(|c| !c.is_empty());
        Ok(Self {
            message_id_being_responded_to: set.require_u16(MESSAGE_ID_BEING_RESPONDED_TO)?,
            affected_sop_class_uid: set.get_str(AFFECTED_SOP_CLASS_UID),
            affected_sop_instance_uid: set.get_str(AFFECTED_SOP_INSTANCE_UID),
            status: Status::new(set.require_u16(STATUS)?, comment),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_command_set(&CommandSet::decode(bytes)?)
    }
}
