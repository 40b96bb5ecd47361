//! Part 10 file reader

use std::path::Path;

use tracing::debug;

use dicom_core::VR;
use dicom_object::meta::FileMetaTable;

use super::{implicit_vr, DataElement, DataSet, Item, Tag, Value};
use crate::transfer_syntax::{trim_uid, ByteOrder, TransferSyntax, TransferSyntaxPolicy, VrMode};
use crate::vr::Vr;
use crate::{DimseError, Result};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

const ITEM: Tag = Tag(0xFFFE, 0xE000);
const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);

type ParseResult<T> = std::result::Result<T, String>;

impl DataSet {
    /// Read a Part 10 file from disk.
    ///
    /// I/O failures are reported as `FileUnreadable` and decoding failures as
    /// `NotDicom`; the declared transfer syntax is resolved under `policy`.
    pub async fn open(path: impl AsRef<Path>, policy: TransferSyntaxPolicy) -> Result<DataSet> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| DimseError::FileUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());

        Self::from_part10(&bytes, policy).map_err(|e| match e {
            DimseError::NotDicom { reason, .. } => DimseError::NotDicom {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Decode a Part 10 byte stream held in memory
    pub fn from_part10(bytes: &[u8], policy: TransferSyntaxPolicy) -> Result<DataSet> {
        let not_dicom = |reason: String| DimseError::NotDicom {
            path: Default::default(),
            reason,
        };

        if bytes.len() < PREAMBLE_LEN + MAGIC.len() || &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] != MAGIC {
            return Err(not_dicom("missing DICM prefix".to_string()));
        }

        // FileMetaTable reads the magic code itself and stops at the end of group 0002
        let mut rest = &bytes[PREAMBLE_LEN..];
        let meta = FileMetaTable::from_reader(&mut rest)
            .map_err(|e| not_dicom(format!("invalid file meta information: {}", e)))?;
        let body_start = bytes.len() - rest.len();

        let transfer_syntax = TransferSyntax::resolve(&meta.transfer_syntax, policy)?;
        debug!(
            "Transfer syntax {} resolved to {:?}/{:?}",
            trim_uid(&meta.transfer_syntax),
            transfer_syntax.byte_order(),
            transfer_syntax.vr_mode()
        );

        let mut reader = Reader::new(
            bytes,
            body_start,
            transfer_syntax.byte_order(),
            transfer_syntax.vr_mode(),
        );
        let mut dataset = DataSet::new(meta, transfer_syntax);
        while reader.remaining() > 0 {
            let element = reader.read_element().map_err(not_dicom)?;
            dataset.put(element);
        }
        Ok(dataset)
    }
}

struct Header {
    tag: Tag,
    vr: Option<Vr>,
    len: u32,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
    mode: VrMode,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], pos: usize, order: ByteOrder, mode: VrMode) -> Self {
        Self {
            buf,
            pos,
            order,
            mode,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> ParseResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(format!(
                "unexpected end of data at offset {} (wanted {} bytes, {} left)",
                self.pos,
                n,
                self.remaining()
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u16(&mut self) -> ParseResult<u16> {
        let raw = self.take(2)?;
        let b = [raw[0], raw[1]];
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        })
    }

    fn read_u32(&mut self) -> ParseResult<u32> {
        let raw = self.take(4)?;
        let b = [raw[0], raw[1], raw[2], raw[3]];
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        })
    }

    fn read_header(&mut self) -> ParseResult<Header> {
        let tag = Tag(self.read_u16()?, self.read_u16()?);
        if tag.group() == 0xFFFE {
            let len = self.read_u32()?;
            return Ok(Header { tag, vr: None, len });
        }
        match self.mode {
            VrMode::Explicit => {
                let raw = self.take(2)?;
                let vr = Vr::from_bytes([raw[0], raw[1]]).ok_or_else(|| {
                    format!(
                        "unknown VR '{}' for element {}",
                        String::from_utf8_lossy(raw),
                        tag
                    )
                })?;
                let len = if vr.has_long_length() {
                    self.take(2)?;
                    self.read_u32()?
                } else {
                    u32::from(self.read_u16()?)
                };
                Ok(Header {
                    tag,
                    vr: Some(vr),
                    len,
                })
            }
            VrMode::Implicit => {
                let len = self.read_u32()?;
                Ok(Header {
                    tag,
                    vr: Some(implicit_vr(tag)),
                    len,
                })
            }
        }
    }

    fn read_element(&mut self) -> ParseResult<DataElement> {
        let header = self.read_header()?;
        let vr = header
            .vr
            .ok_or_else(|| format!("unexpected delimiter {} outside a sequence", header.tag))?;
        self.read_value(header.tag, vr, header.len)
    }

    fn read_value(&mut self, tag: Tag, vr: Vr, len: u32) -> ParseResult<DataElement> {
        if vr == VR::SQ {
            let items = self.read_sequence(len)?;
            return Ok(DataElement::new(tag, VR::SQ, Value::Sequence(items)));
        }
        if len == UNDEFINED_LENGTH {
            if vr == VR::UN {
                // Undefined-length UN holds a sequence encoded implicit VR little endian
                let mut inner = Reader::new(self.buf, self.pos, ByteOrder::Little, VrMode::Implicit);
                let items = inner.read_sequence(len)?;
                self.pos = inner.pos;
                return Ok(DataElement::new(tag, VR::SQ, Value::Sequence(items)));
            }
            return Err(format!(
                "element {} has undefined length (encapsulated data is not supported)",
                tag
            ));
        }
        let bytes = self.take(len as usize)?.to_vec();
        Ok(DataElement::new(tag, vr, Value::Bytes(bytes)))
    }

    fn read_sequence(&mut self, len: u32) -> ParseResult<Vec<Item>> {
        let mut items = Vec::new();
        let end = (len != UNDEFINED_LENGTH).then(|| self.pos + len as usize);
        loop {
            if let Some(end) = end {
                if self.pos >= end {
                    break;
                }
            }
            let header = self.read_header()?;
            match header.tag {
                ITEM => items.push(self.read_item(header.len)?),
                SEQUENCE_DELIMITATION if end.is_none() => break,
                other => return Err(format!("expected item tag, found {}", other)),
            }
        }
        Ok(items)
    }

    fn read_item(&mut self, len: u32) -> ParseResult<Item> {
        let mut item = Item::default();
        if len == UNDEFINED_LENGTH {
            loop {
                let header = self.read_header()?;
                if header.tag == ITEM_DELIMITATION {
                    break;
                }
                let vr = header
                    .vr
                    .ok_or_else(|| format!("unexpected delimiter {} inside item", header.tag))?;
                item.elements.push(self.read_value(header.tag, vr, header.len)?);
            }
        } else {
            let end = self.pos + len as usize;
            while self.pos < end {
                item.elements.push(self.read_element()?);
            }
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::Ambiguity;
    use dicom_dictionary_std::tags;
    use dicom_object::meta::FileMetaTableBuilder;

    fn part10(ts_uid: &str, body: &[u8]) -> Vec<u8> {
        let meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
            .media_storage_sop_instance_uid("1.2.3.4")
            .transfer_syntax(ts_uid)
            .build()
            .unwrap();
        let mut out = vec![0u8; PREAMBLE_LEN];
        out.extend_from_slice(MAGIC);
        meta.write(&mut out).unwrap();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_rejects_missing_prefix() {
        let err = DataSet::from_part10(&[0u8; 200], TransferSyntaxPolicy::Strict).unwrap_err();
        assert!(matches!(err, DimseError::NotDicom { .. }));
    }

    #[test]
    fn test_implicit_little_endian_body() {
        let body = [
            // (0028,0106) Smallest Image Pixel Value, 2 bytes
            0x28, 0x00, 0x06, 0x01, 0x02, 0x00, 0x00, 0x00, 0x05, 0x00,
        ];
        let ds = DataSet::from_part10(&part10("1.2.840.10008.1.2", &body), TransferSyntaxPolicy::Strict)
            .unwrap();
        assert_eq!(ds.byte_order(), ByteOrder::Little);
        let elem = ds.get(tags::SMALLEST_IMAGE_PIXEL_VALUE).unwrap();
        assert_eq!(elem.vr, Vr::Ambiguous(Ambiguity::UsOrSs));
        assert_eq!(elem.value, Value::Bytes(vec![0x05, 0x00]));
        assert_eq!(elem.description, "SmallestImagePixelValue");
    }

    #[test]
    fn test_explicit_big_endian_body() {
        // (0028,0100) Bits Allocated US 16
        let body = [0x00, 0x28, 0x01, 0x00, b'U', b'S', 0x00, 0x02, 0x00, 0x10];
        let ds = DataSet::from_part10(&part10("1.2.840.10008.1.2.2", &body), TransferSyntaxPolicy::Strict)
            .unwrap();
        assert_eq!(ds.byte_order(), ByteOrder::Big);
        let elem = ds.get(tags::BITS_ALLOCATED).unwrap();
        assert_eq!(elem.tag, Tag(0x0028, 0x0100));
        assert_eq!(elem.vr, VR::US);
        assert_eq!(elem.value, Value::Bytes(vec![0x00, 0x10]));
        assert_eq!(elem.description, "BitsAllocated");
    }

    #[test]
    fn test_undefined_length_sequence() {
        let mut body = vec![
            // (0008,1140) SQ, undefined length
            0x08, 0x00, 0x40, 0x11, b'S', b'Q', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
            // item, undefined length
            0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF,
            // (0008,1150) UI "1.2"
            0x08, 0x00, 0x50, 0x11, b'U', b'I', 0x04, 0x00, b'1', b'.', b'2', 0x00,
        ];
        // item delimiter, sequence delimiter
        body.extend_from_slice(&[0xFE, 0xFF, 0x0D, 0xE0, 0, 0, 0, 0]);
        body.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0, 0, 0, 0]);

        let ds = DataSet::from_part10(&part10("1.2.840.10008.1.2.1", &body), TransferSyntaxPolicy::Strict)
            .unwrap();
        match &ds.get(Tag(0x0008, 0x1140)).unwrap().value {
            Value::Sequence(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].elements[0].to_str().as_deref(), Some("1.2"));
            }
            other => panic!("expected sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_syntax_is_not_a_parse_error() {
        let err = DataSet::from_part10(&part10("1.2.840.10008.1.2.4.50", &[]), TransferSyntaxPolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, DimseError::UnsupportedTransferSyntax(_)));
    }

    #[test]
    fn test_meta_without_transfer_syntax_is_not_dicom() {
        let mut bytes = vec![0u8; PREAMBLE_LEN];
        bytes.extend_from_slice(MAGIC);
        // group length 0, then the data set starts
        bytes.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, b'U', b'L', 0x04, 0x00, 0, 0, 0, 0]);
        bytes.extend_from_slice(&[0x10, 0x00, 0x10, 0x00, b'P', b'N', 0x04, 0x00, b'D', b'O', b'E', b' ']);
        let err = DataSet::from_part10(&bytes, TransferSyntaxPolicy::Strict).unwrap_err();
        assert!(matches!(err, DimseError::NotDicom { .. }));
    }

    #[test]
    fn test_truncated_element() {
        let body = [0x10, 0x00, 0x10, 0x00, b'P', b'N', 0x10, 0x00, b'D', b'O'];
        let err = DataSet::from_part10(&part10("1.2.840.10008.1.2.1", &body), TransferSyntaxPolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, DimseError::NotDicom { .. }));
    }
}
