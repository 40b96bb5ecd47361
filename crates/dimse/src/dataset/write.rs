//! Data set encoder
//!
//! Re-encodes elements in one of the supported transfer syntaxes. Raw values
//! are byte-swapped word by word when the target byte order differs from the
//! order they were read in.

use std::path::Path;

use dicom_core::VR;
use dicom_object::meta::FileMetaTableBuilder;

use super::{DataElement, DataSet, Tag, Value};
use crate::transfer_syntax::{trim_uid, ByteOrder, TransferSyntax, VrMode};
use crate::vr::Vr;
use crate::{DimseError, Result};

const ITEM: Tag = Tag(0xFFFE, 0xE000);

impl DataSet {
    /// Encode the main data set (no preamble, no file meta) in `target`
    pub fn encode(&self, target: TransferSyntax) -> Result<Vec<u8>> {
        encode_elements(self.elements(), self.byte_order(), target)
    }

    /// Encode as a complete Part 10 stream in the data set's own transfer syntax
    pub fn to_part10(&self) -> Result<Vec<u8>> {
        let ts = self.transfer_syntax();
        let mut builder = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(trim_uid(&self.meta.media_storage_sop_class_uid))
            .media_storage_sop_instance_uid(trim_uid(&self.meta.media_storage_sop_instance_uid))
            .transfer_syntax(ts.uid())
            .implementation_class_uid(trim_uid(&self.meta.implementation_class_uid));
        if let Some(name) = &self.meta.implementation_version_name {
            builder = builder.implementation_version_name(name.trim_end());
        }
        let meta = builder
            .build()
            .map_err(|e| DimseError::config(format!("cannot build file meta information: {}", e)))?;

        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        meta.write(&mut out)
            .map_err(|e| DimseError::config(format!("cannot write file meta information: {}", e)))?;
        out.extend_from_slice(&self.encode(ts)?);
        Ok(out)
    }

    pub async fn write_part10(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_part10()?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

/// Encode a list of elements read in `source` byte order into `target`
pub fn encode_elements(elements: &[DataElement], source: ByteOrder, target: TransferSyntax) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for element in elements {
        // Group lengths other than command and meta are retired and would be stale here
        if element.tag.element() == 0x0000 && element.tag.group() > 0x0002 {
            continue;
        }
        write_element(&mut out, element, source, target)?;
    }
    Ok(out)
}

fn put_u16(out: &mut Vec<u8>, v: u16, order: ByteOrder) {
    match order {
        ByteOrder::Little => out.extend_from_slice(&v.to_le_bytes()),
        ByteOrder::Big => out.extend_from_slice(&v.to_be_bytes()),
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32, order: ByteOrder) {
    match order {
        ByteOrder::Little => out.extend_from_slice(&v.to_le_bytes()),
        ByteOrder::Big => out.extend_from_slice(&v.to_be_bytes()),
    }
}

fn put_tag(out: &mut Vec<u8>, tag: Tag, order: ByteOrder) {
    put_u16(out, tag.group(), order);
    put_u16(out, tag.element(), order);
}

fn write_element(out: &mut Vec<u8>, element: &DataElement, source: ByteOrder, target: TransferSyntax) -> Result<()> {
    let order = target.byte_order();
    let (vr, value) = match &element.value {
        Value::Sequence(items) => {
            let mut body = Vec::new();
            for item in items {
                let mut item_body = Vec::new();
                for child in &item.elements {
                    write_element(&mut item_body, child, source, target)?;
                }
                put_tag(&mut body, ITEM, order);
                put_u32(&mut body, item_body.len() as u32, order);
                body.extend_from_slice(&item_body);
            }
            (Vr::Exact(VR::SQ), body)
        }
        Value::U16(values) => {
            let mut body = Vec::with_capacity(values.len() * 2);
            for v in values {
                put_u16(&mut body, *v, order);
            }
            (element.vr, body)
        }
        Value::Bytes(bytes) => {
            let mut body = bytes.clone();
            if source != order {
                if let Some(width) = element.vr.word_size() {
                    if body.len() % width != 0 {
                        return Err(DimseError::malformed(
                            element.tag,
                            format!("length {} is not a multiple of {}", body.len(), width),
                        ));
                    }
                    body.chunks_exact_mut(width).for_each(|word| word.reverse());
                }
            }
            if body.len() % 2 == 1 {
                body.push(element.vr.padding());
            }
            (element.vr, body)
        }
    };

    put_tag(out, element.tag, order);
    match target.vr_mode() {
        VrMode::Implicit => put_u32(out, value.len() as u32, order),
        VrMode::Explicit => {
            out.extend_from_slice(&vr.wire_code());
            if vr.has_long_length() {
                out.extend_from_slice(&[0, 0]);
                put_u32(out, value.len() as u32, order);
            } else {
                let len = u16::try_from(value.len()).map_err(|_| {
                    DimseError::malformed(element.tag, format!("value too long for {}", vr))
                })?;
                put_u16(out, len, order);
            }
        }
    }
    out.extend_from_slice(&value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{file_meta, tags};
    use crate::transfer_syntax::TransferSyntaxPolicy;

    fn element(tag: Tag, vr: VR, bytes: &[u8]) -> DataElement {
        DataElement::new(tag, vr, Value::Bytes(bytes.to_vec()))
    }

    #[test]
    fn test_implicit_encoding() {
        let bytes = encode_elements(
            &[element(Tag(0x0028, 0x0010), VR::US, &[0x00, 0x02])],
            ByteOrder::Little,
            TransferSyntax::ImplicitVrLittleEndian,
        )
        .unwrap();
        assert_eq!(bytes, vec![0x28, 0x00, 0x10, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_swaps_words_across_byte_orders() {
        let bytes = encode_elements(
            &[element(Tag(0x0028, 0x0010), VR::US, &[0x00, 0x02])],
            ByteOrder::Little,
            TransferSyntax::ExplicitVrBigEndian,
        )
        .unwrap();
        assert_eq!(bytes, vec![0x00, 0x28, 0x00, 0x10, b'U', b'S', 0x00, 0x02, 0x02, 0x00]);
    }

    #[test]
    fn test_decoded_values_follow_target_order() {
        let e = DataElement::new(Tag(0x0028, 0x0106), VR::US, Value::U16(vec![5]));
        let le = encode_elements(&[e.clone()], ByteOrder::Big, TransferSyntax::ExplicitVrLittleEndian).unwrap();
        assert_eq!(&le[8..], &[0x05, 0x00]);
        let be = encode_elements(&[e], ByteOrder::Little, TransferSyntax::ExplicitVrBigEndian).unwrap();
        assert_eq!(&be[8..], &[0x00, 0x05]);
    }

    #[test]
    fn test_text_padding_and_long_length() {
        let bytes = encode_elements(
            &[element(Tag(0x0010, 0x0010), VR::PN, b"DOE")],
            ByteOrder::Little,
            TransferSyntax::ExplicitVrLittleEndian,
        )
        .unwrap();
        assert_eq!(&bytes[6..8], &[0x04, 0x00]);
        assert_eq!(&bytes[8..], b"DOE ");

        let bytes = encode_elements(
            &[element(Tag(0x7FE0, 0x0010), VR::OW, &[1, 2, 3, 4])],
            ByteOrder::Little,
            TransferSyntax::ExplicitVrLittleEndian,
        )
        .unwrap();
        assert_eq!(&bytes[4..12], &[b'O', b'W', 0, 0, 4, 0, 0, 0]);
    }

    #[test]
    fn test_part10_reads_back() {
        let meta = file_meta("1.2.840.10008.5.1.4.1.1.2", "1.2.3.4", TransferSyntax::ImplicitVrLittleEndian).unwrap();
        let mut ds = DataSet::new(meta, TransferSyntax::ImplicitVrLittleEndian);
        ds.put(element(tags::SOP_INSTANCE_UID, VR::UI, b"1.2.3.4\0"));
        ds.put(element(tags::SMALLEST_IMAGE_PIXEL_VALUE, VR::US, &[0x05, 0x00]));

        let bytes = ds.to_part10().unwrap();
        assert_eq!(&bytes[128..132], b"DICM");
        let back = DataSet::from_part10(&bytes, TransferSyntaxPolicy::Strict).unwrap();
        assert_eq!(back.transfer_syntax(), TransferSyntax::ImplicitVrLittleEndian);
        assert_eq!(back.sop_instance_uid().as_deref(), Some("1.2.3.4"));
        assert_eq!(
            trim_uid(&back.meta.media_storage_sop_class_uid),
            "1.2.840.10008.5.1.4.1.1.2"
        );
        assert_eq!(
            back.get(tags::SMALLEST_IMAGE_PIXEL_VALUE).unwrap().value,
            Value::Bytes(vec![0x05, 0x00])
        );
    }

    #[test]
    fn test_part10_meta_follows_body_syntax() {
        // meta declares implicit LE but the elements were read big endian
        let meta = file_meta("1.2.840.10008.5.1.4.1.1.2", "1.2.3.4", TransferSyntax::ImplicitVrLittleEndian).unwrap();
        let mut ds = DataSet::new(meta, TransferSyntax::ExplicitVrBigEndian);
        ds.put(element(tags::ROWS, VR::US, &[0x00, 0x02]));

        let back = DataSet::from_part10(&ds.to_part10().unwrap(), TransferSyntaxPolicy::Strict).unwrap();
        assert_eq!(back.transfer_syntax(), TransferSyntax::ExplicitVrBigEndian);
        assert_eq!(back.get(tags::ROWS).unwrap().value, Value::Bytes(vec![0x00, 0x02]));
    }
}
