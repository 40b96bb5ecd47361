//! Ambiguous VR correction (PS3.5 Annex A)
//!
//! Elements read without an explicit VR may carry a dictionary placeholder
//! such as `US or SS`. Before transmission each placeholder with an entry in
//! the correction table is rewritten to a concrete VR, converting the value
//! where the concrete VR needs it.

use tracing::debug;

use crate::dataset::{DataElement, DataSet, Value};
use crate::transfer_syntax::ByteOrder;
use dicom_core::VR;

use crate::vr::{Ambiguity, Vr};
use crate::{DimseError, Result};

type Convert = fn(&DataElement, ByteOrder) -> Result<Value>;

/// Concrete VR and value conversion for one ambiguous kind
#[derive(Clone, Copy)]
pub struct Correction {
    pub to: Vr,
    convert: Convert,
}

/// Correction table
pub fn correction_for(ambiguity: Ambiguity) -> Option<Correction> {
    match ambiguity {
        Ambiguity::UsOrSs => Some(Correction {
            to: Vr::Exact(VR::US),
            convert: decode_unsigned,
        }),
        Ambiguity::ObOrOw => Some(Correction {
            to: Vr::Exact(VR::OW),
            convert: keep_bytes,
        }),
        Ambiguity::UsOrSsOrOw => None,
    }
}

fn decode_unsigned(element: &DataElement, order: ByteOrder) -> Result<Value> {
    let bytes = match &element.value {
        Value::Bytes(bytes) => bytes,
        Value::U16(values) => return Ok(Value::U16(values.clone())),
        Value::Sequence(_) => {
            return Err(DimseError::malformed(element.tag, "sequence where US was expected"))
        }
    };
    if bytes.len() % 2 != 0 {
        return Err(DimseError::malformed(
            element.tag,
            format!("{} bytes cannot hold 16-bit values", bytes.len()),
        ));
    }
    let values = bytes
        .chunks_exact(2)
        .map(|w| match order {
            ByteOrder::Little => u16::from_le_bytes([w[0], w[1]]),
            ByteOrder::Big => u16::from_be_bytes([w[0], w[1]]),
        })
        .collect();
    Ok(Value::U16(values))
}

fn keep_bytes(element: &DataElement, _order: ByteOrder) -> Result<Value> {
    Ok(element.value.clone())
}

/// Rewrite every correctable ambiguous element of the data set in place.
///
/// Returns the number of elements changed. Running it again on a corrected
/// data set changes nothing.
pub fn correct_ambiguous_vr(dataset: &mut DataSet) -> Result<usize> {
    let order = dataset.byte_order();
    correct_elements(dataset.elements_mut(), order)
}

fn correct_elements(elements: &mut [DataElement], order: ByteOrder) -> Result<usize> {
    let mut changed = 0;
    for element in elements.iter_mut() {
        if let Value::Sequence(items) = &mut element.value {
            for item in items.iter_mut() {
                changed += correct_elements(&mut item.elements, order)?;
            }
            continue;
        }
        let Some(correction) = element.vr.ambiguity().and_then(correction_for) else {
            continue;
        };
        debug!(
            "Setting undefined VR of {} ({:04x}, {:04x}) to '{}'",
            element.description,
            element.tag.group(),
            element.tag.element(),
            correction.to
        );
        element.value = (correction.convert)(element, order)?;
        element.vr = correction.to;
        changed += 1;
    }
    Ok(changed)
}
