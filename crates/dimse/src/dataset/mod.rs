//! In-memory DICOM data sets
//!
//! A [`DataSet`] is the flat element list of a Part 10 file plus its file
//! meta information. Element values are kept as the raw bytes read from the
//! file until something (the VR corrector) decodes them.

mod dictionary;
mod read;
mod write;

pub use dicom_core::Tag;
pub use dicom_dictionary_std::tags;
pub use dictionary::{describe, implicit_vr};
pub use write::encode_elements;

use dicom_object::meta::{FileMetaTable, FileMetaTableBuilder};

use crate::transfer_syntax::{trim_uid, ByteOrder, TransferSyntax};
use crate::vr::Vr;
use crate::{DimseError, Result, IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

/// Element value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Raw value bytes in the byte order of the owning data set
    Bytes(Vec<u8>),
    /// Decoded unsigned short values
    U16(Vec<u16>),
    /// Sequence items
    Sequence(Vec<Item>),
}

/// One item of a sequence
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item {
    pub elements: Vec<DataElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataElement {
    pub tag: Tag,
    pub vr: Vr,
    pub value: Value,
    /// Dictionary keyword, or a generic label for private and unknown tags
    pub description: String,
}

impl DataElement {
    pub fn new(tag: Tag, vr: impl Into<Vr>, value: Value) -> Self {
        Self {
            tag,
            vr: vr.into(),
            value,
            description: describe(tag),
        }
    }

    /// Value as text with DICOM padding removed, for string VRs
    pub fn to_str(&self) -> Option<String> {
        match &self.value {
            Value::Bytes(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                Some(trim_uid(text.trim_start()).to_string())
            }
            _ => None,
        }
    }
}

/// File meta information for an object written by this crate
pub fn file_meta(sop_class_uid: &str, sop_instance_uid: &str, transfer_syntax: TransferSyntax) -> Result<FileMetaTable> {
    FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(trim_uid(sop_class_uid))
        .media_storage_sop_instance_uid(trim_uid(sop_instance_uid))
        .transfer_syntax(transfer_syntax.uid())
        .implementation_class_uid(IMPLEMENTATION_CLASS_UID)
        .implementation_version_name(IMPLEMENTATION_VERSION_NAME)
        .build()
        .map_err(|e| DimseError::config(format!("cannot build file meta information: {}", e)))
}

/// A composite object: file meta plus the main data set
#[derive(Debug, Clone)]
pub struct DataSet {
    pub meta: FileMetaTable,
    /// Encoding the raw values in `elements` were read with
    transfer_syntax: TransferSyntax,
    elements: Vec<DataElement>,
}

impl DataSet {
    pub fn new(meta: FileMetaTable, transfer_syntax: TransferSyntax) -> Self {
        Self {
            meta,
            transfer_syntax,
            elements: Vec::new(),
        }
    }

    pub fn transfer_syntax(&self) -> TransferSyntax {
        self.transfer_syntax
    }

    /// Byte order of raw element values
    pub fn byte_order(&self) -> ByteOrder {
        self.transfer_syntax.byte_order()
    }

    /// Insert an element, replacing any element with the same tag
    pub fn put(&mut self, element: DataElement) {
        match self.elements.binary_search_by_key(&element.tag, |e| e.tag) {
            Ok(pos) => self.elements[pos] = element,
            Err(pos) => self.elements.insert(pos, element),
        }
    }

    pub fn get(&self, tag: Tag) -> Option<&DataElement> {
        self.elements
            .binary_search_by_key(&tag, |e| e.tag)
            .ok()
            .map(|pos| &self.elements[pos])
    }

    pub fn elements(&self) -> &[DataElement] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut [DataElement] {
        &mut self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// SOP Class UID of the object, falling back to the file meta
    pub fn sop_class_uid(&self) -> Option<String> {
        self.get(tags::SOP_CLASS_UID)
            .and_then(DataElement::to_str)
            .or_else(|| Some(trim_uid(&self.meta.media_storage_sop_class_uid).to_string()))
            .filter(|s| !s.is_empty())
    }

    /// SOP Instance UID of the object, falling back to the file meta
    pub fn sop_instance_uid(&self) -> Option<String> {
        self.get(tags::SOP_INSTANCE_UID)
            .and_then(DataElement::to_str)
            .or_else(|| Some(trim_uid(&self.meta.media_storage_sop_instance_uid).to_string()))
            .filter(|s| !s.is_empty())
    }
}

impl<'a> IntoIterator for &'a DataSet {
    type Item = &'a DataElement;
    type IntoIter = std::slice::Iter<'a, DataElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}
