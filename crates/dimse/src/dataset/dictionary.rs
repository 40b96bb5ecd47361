//! Attribute lookups backed by the standard data dictionary

use dicom_core::dictionary::DataDictionaryEntry;
use dicom_core::{DataDictionary, Tag, VR};
use dicom_dictionary_std::StandardDataDictionary;

use crate::vr::Vr;

static DICTIONARY: StandardDataDictionary = StandardDataDictionary;

fn is_private(tag: Tag) -> bool {
    tag.group() % 2 == 1
}

fn is_private_creator(tag: Tag) -> bool {
    (0x0010..=0x00FF).contains(&tag.element())
}

/// VR of an implicitly encoded element.
///
/// Context-dependent dictionary VRs come back as [`Vr::Ambiguous`] so that
/// the corrector can settle them before transmission.
pub fn implicit_vr(tag: Tag) -> Vr {
    if tag.element() == 0x0000 {
        return Vr::Exact(VR::UL);
    }
    if is_private(tag) {
        return Vr::Exact(if is_private_creator(tag) { VR::LO } else { VR::UN });
    }
    DICTIONARY
        .by_tag(tag)
        .map(|entry| Vr::from(entry.vr()))
        .unwrap_or(Vr::Exact(VR::UN))
}

/// Attribute keyword, e.g. `SmallestImagePixelValue`
pub fn describe(tag: Tag) -> String {
    if tag.element() == 0x0000 {
        return "GroupLength".to_string();
    }
    if is_private(tag) {
        return if is_private_creator(tag) {
            "PrivateCreator".to_string()
        } else {
            "PrivateTagData".to_string()
        };
    }
    DICTIONARY
        .by_tag(tag)
        .map(|e| e.alias().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
