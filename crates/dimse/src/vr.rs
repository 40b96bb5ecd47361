//! Value representations of elements held in a [`DataSet`](crate::DataSet)
//!
//! Concrete VRs are `dicom_core`'s. On top of those, an element read without
//! an explicit VR may carry one of the context-dependent placeholders the
//! dictionary yields (PS3.5 Annex A) until the corrector settles it.

use std::fmt;

use dicom_core::dictionary::VirtualVr;
use dicom_core::VR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vr {
    Exact(VR),
    Ambiguous(Ambiguity),
}

/// Context-dependent VRs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ambiguity {
    /// `US or SS`, resolved by Pixel Representation
    UsOrSs,
    /// `OB or OW`, resolved by transfer syntax and Bits Allocated
    ObOrOw,
    /// `US or SS or OW`, LUT data
    UsOrSsOrOw,
}

impl Ambiguity {
    pub fn code(self) -> &'static str {
        match self {
            Ambiguity::UsOrSs => "US or SS",
            Ambiguity::ObOrOw => "OB or OW",
            Ambiguity::UsOrSsOrOw => "US or SS or OW",
        }
    }
}

impl From<VR> for Vr {
    fn from(vr: VR) -> Self {
        Vr::Exact(vr)
    }
}

impl From<VirtualVr> for Vr {
    fn from(vr: VirtualVr) -> Self {
        match vr {
            VirtualVr::Exact(vr) => Vr::Exact(vr),
            VirtualVr::Xs => Vr::Ambiguous(Ambiguity::UsOrSs),
            VirtualVr::Ox | VirtualVr::Px => Vr::Ambiguous(Ambiguity::ObOrOw),
            _ => Vr::Ambiguous(Ambiguity::UsOrSsOrOw),
        }
    }
}

impl PartialEq<VR> for Vr {
    fn eq(&self, other: &VR) -> bool {
        *self == Vr::Exact(*other)
    }
}

impl Vr {
    /// Parse the two-byte code written in explicit VR encodings
    pub fn from_bytes(code: [u8; 2]) -> Option<Self> {
        VR::from_binary(code).map(Vr::Exact)
    }

    /// Human readable code, e.g. `US` or `US or SS`
    pub fn code(self) -> &'static str {
        match self {
            Vr::Exact(vr) => vr.to_string(),
            Vr::Ambiguous(a) => a.code(),
        }
    }

    pub fn ambiguity(self) -> Option<Ambiguity> {
        match self {
            Vr::Ambiguous(a) => Some(a),
            Vr::Exact(_) => None,
        }
    }

    /// The VR written on the wire in explicit VR encodings.
    ///
    /// Placeholders left in the data set fall back to the word-oriented VR
    /// the standard prescribes for them when no other context is available.
    pub fn concrete(self) -> VR {
        match self {
            Vr::Exact(vr) => vr,
            Vr::Ambiguous(Ambiguity::UsOrSs) => VR::US,
            Vr::Ambiguous(Ambiguity::ObOrOw) | Vr::Ambiguous(Ambiguity::UsOrSsOrOw) => VR::OW,
        }
    }

    pub fn wire_code(self) -> [u8; 2] {
        self.concrete().to_bytes()
    }

    /// Explicit VR elements with a 2-byte reserved field and a 32-bit length
    pub fn has_long_length(self) -> bool {
        matches!(
            self.concrete(),
            VR::OB
                | VR::OD
                | VR::OF
                | VR::OL
                | VR::OV
                | VR::OW
                | VR::SQ
                | VR::UC
                | VR::UN
                | VR::UR
                | VR::UT
                | VR::SV
                | VR::UV
        )
    }

    /// Width of the binary words that change with byte order, if any
    pub fn word_size(self) -> Option<usize> {
        match self {
            Vr::Ambiguous(_) => Some(2),
            Vr::Exact(VR::US | VR::SS | VR::OW | VR::AT) => Some(2),
            Vr::Exact(VR::UL | VR::SL | VR::FL | VR::OF | VR::OL) => Some(4),
            Vr::Exact(VR::FD | VR::OD | VR::SV | VR::UV | VR::OV) => Some(8),
            Vr::Exact(_) => None,
        }
    }

    /// Padding byte used to reach an even value length
    pub fn padding(self) -> u8 {
        match self {
            Vr::Exact(VR::UI | VR::OB | VR::UN) => 0x00,
            vr if vr.word_size().is_some() => 0x00,
            _ => b' ',
        }
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
