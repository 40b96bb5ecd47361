//! DICOM Upper Layer protocol data units (PS3.8 section 9.3)
//!
//! Every PDU starts with a 6 byte header: PDU type, one reserved byte and
//! the body length as a big-endian u32. Each PDU type is a variant of
//! [`Pdu`] with its own body encoder and decoder; framing on a byte stream
//! is handled by [`PduCodec`].

mod codec;

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use codec::PduCodec;

use crate::{DimseError, Result};

/// DICOM application context name
pub const APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

/// Size of the fixed PDU header
pub const PDU_HEADER_LEN: usize = 6;

/// Overhead of one PDV item inside a P-DATA-TF body (length, context id, control header)
pub const PDV_HEADER_LEN: usize = 6;

const PDU_ASSOCIATE_RQ: u8 = 0x01;
const PDU_ASSOCIATE_AC: u8 = 0x02;
const PDU_ASSOCIATE_RJ: u8 = 0x03;
const PDU_P_DATA_TF: u8 = 0x04;
const PDU_RELEASE_RQ: u8 = 0x05;
const PDU_RELEASE_RP: u8 = 0x06;
const PDU_ABORT: u8 = 0x07;

const ITEM_APPLICATION_CONTEXT: u8 = 0x10;
const ITEM_PRESENTATION_CONTEXT_RQ: u8 = 0x20;
const ITEM_PRESENTATION_CONTEXT_AC: u8 = 0x21;
const ITEM_ABSTRACT_SYNTAX: u8 = 0x30;
const ITEM_TRANSFER_SYNTAX: u8 = 0x40;
const ITEM_USER_INFORMATION: u8 = 0x50;
const ITEM_MAX_LENGTH: u8 = 0x51;
const ITEM_IMPLEMENTATION_CLASS_UID: u8 = 0x52;
const ITEM_IMPLEMENTATION_VERSION_NAME: u8 = 0x55;

#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    AssociateRq(AssociateRq),
    AssociateAc(AssociateAc),
    AssociateRj(RejectReason),
    PData(Vec<Pdv>),
    ReleaseRq,
    ReleaseRp,
    Abort(AbortReason),
}

/// A-ASSOCIATE-RQ
#[derive(Debug, Clone, PartialEq)]
pub struct AssociateRq {
    pub protocol_version: u16,
    pub called_ae_title: String,
    pub calling_ae_title: String,
    pub application_context: String,
    pub presentation_contexts: Vec<ProposedContext>,
    pub user_information: UserInformation,
}

/// A-ASSOCIATE-AC
#[derive(Debug, Clone, PartialEq)]
pub struct AssociateAc {
    pub protocol_version: u16,
    pub called_ae_title: String,
    pub calling_ae_title: String,
    pub application_context: String,
    pub presentation_contexts: Vec<ContextResult>,
    pub user_information: UserInformation,
}

/// Presentation context item of an A-ASSOCIATE-RQ
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedContext {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntaxes: Vec<String>,
}

/// Presentation context item of an A-ASSOCIATE-AC
#[derive(Debug, Clone, PartialEq)]
pub struct ContextResult {
    pub id: u8,
    pub result: ContextResultReason,
    pub transfer_syntax: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextResultReason {
    Acceptance,
    UserRejection,
    NoReason,
    AbstractSyntaxNotSupported,
    TransferSyntaxesNotSupported,
}

impl ContextResultReason {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Acceptance,
            1 => Self::UserRejection,
            2 => Self::NoReason,
            3 => Self::AbstractSyntaxNotSupported,
            4 => Self::TransferSyntaxesNotSupported,
            other => {
                return Err(DimseError::protocol(format!(
                    "invalid presentation context result {}",
                    other
                )))
            }
        })
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Acceptance => 0,
            Self::UserRejection => 1,
            Self::NoReason => 2,
            Self::AbstractSyntaxNotSupported => 3,
            Self::TransferSyntaxesNotSupported => 4,
        }
    }
}

impl fmt::Display for ContextResultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Acceptance => "acceptance",
            Self::UserRejection => "user rejection",
            Self::NoReason => "no reason (provider rejection)",
            Self::AbstractSyntaxNotSupported => "abstract syntax not supported",
            Self::TransferSyntaxesNotSupported => "transfer syntaxes not supported",
        })
    }
}

/// User information item (only the sub-items this SCU understands)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserInformation {
    /// Maximum P-DATA-TF body length the sender can receive, 0 for unlimited
    pub max_length: u32,
    pub implementation_class_uid: Option<String>,
    pub implementation_version_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectResult {
    Permanent,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectSource {
    ServiceUser,
    ServiceProviderAcse,
    ServiceProviderPresentation,
}

/// A-ASSOCIATE-RJ parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectReason {
    pub result: RejectResult,
    pub source: RejectSource,
    pub reason: u8,
}

impl RejectReason {
    pub fn describe_reason(&self) -> &'static str {
        match (self.source, self.reason) {
            (RejectSource::ServiceUser, 1) => "no reason given",
            (RejectSource::ServiceUser, 2) => "application context name not supported",
            (RejectSource::ServiceUser, 3) => "calling AE title not recognised",
            (RejectSource::ServiceUser, 7) => "called AE title not recognised",
            (RejectSource::ServiceProviderAcse, 1) => "no reason given",
            (RejectSource::ServiceProviderAcse, 2) => "protocol version not supported",
            (RejectSource::ServiceProviderPresentation, 1) => "temporary congestion",
            (RejectSource::ServiceProviderPresentation, 2) => "local limit exceeded",
            _ => "reserved",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self.result {
            RejectResult::Permanent => "rejected-permanent",
            RejectResult::Transient => "rejected-transient",
        };
        let source = match self.source {
            RejectSource::ServiceUser => "service-user",
            RejectSource::ServiceProviderAcse => "service-provider (ACSE)",
            RejectSource::ServiceProviderPresentation => "service-provider (presentation)",
        };
        write!(
            f,
            "result: {}, source: {}, reason: {} ({})",
            result,
            source,
            self.reason,
            self.describe_reason()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortSource {
    ServiceUser,
    ServiceProvider,
}

/// A-ABORT parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortReason {
    pub source: AbortSource,
    pub reason: u8,
}

impl AbortReason {
    pub const USER: AbortReason = AbortReason {
        source: AbortSource::ServiceUser,
        reason: 0,
    };

    pub const UNEXPECTED_PDU: AbortReason = AbortReason {
        source: AbortSource::ServiceProvider,
        reason: 2,
    };
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            AbortSource::ServiceUser => write!(f, "aborted by service user"),
            AbortSource::ServiceProvider => {
                let reason = match self.reason {
                    0 => "reason not specified",
                    1 => "unrecognised PDU",
                    2 => "unexpected PDU",
                    4 => "unrecognised PDU parameter",
                    5 => "unexpected PDU parameter",
                    6 => "invalid PDU parameter value",
                    _ => "reserved",
                };
                write!(f, "aborted by service provider: {}", reason)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdvType {
    Command,
    Data,
}

/// One presentation data value item of a P-DATA-TF
#[derive(Debug, Clone, PartialEq)]
pub struct Pdv {
    pub context_id: u8,
    pub value_type: PdvType,
    pub is_last: bool,
    pub data: Bytes,
}

impl Pdv {
    fn control_header(&self) -> u8 {
        let mut mch = 0u8;
        if self.value_type == PdvType::Command {
            mch |= 0x01;
        }
        if self.is_last {
            mch |= 0x02;
        }
        mch
    }
}

impl Pdu {
    fn pdu_type(&self) -> u8 {
        match self {
            Pdu::AssociateRq(_) => PDU_ASSOCIATE_RQ,
            Pdu::AssociateAc(_) => PDU_ASSOCIATE_AC,
            Pdu::AssociateRj(_) => PDU_ASSOCIATE_RJ,
            Pdu::PData(_) => PDU_P_DATA_TF,
            Pdu::ReleaseRq => PDU_RELEASE_RQ,
            Pdu::ReleaseRp => PDU_RELEASE_RP,
            Pdu::Abort(_) => PDU_ABORT,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Pdu::AssociateRq(_) => "A-ASSOCIATE-RQ",
            Pdu::AssociateAc(_) => "A-ASSOCIATE-AC",
            Pdu::AssociateRj(_) => "A-ASSOCIATE-RJ",
            Pdu::PData(_) => "P-DATA-TF",
            Pdu::ReleaseRq => "A-RELEASE-RQ",
            Pdu::ReleaseRp => "A-RELEASE-RP",
            Pdu::Abort(_) => "A-ABORT",
        }
    }

    /// Write header and body
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::new();
        match self {
            Pdu::AssociateRq(rq) => encode_associate_rq(rq, &mut body)?,
            Pdu::AssociateAc(ac) => encode_associate_ac(ac, &mut body)?,
            Pdu::AssociateRj(rj) => {
                body.put_u8(0);
                body.put_u8(match rj.result {
                    RejectResult::Permanent => 1,
                    RejectResult::Transient => 2,
                });
                body.put_u8(match rj.source {
                    RejectSource::ServiceUser => 1,
                    RejectSource::ServiceProviderAcse => 2,
                    RejectSource::ServiceProviderPresentation => 3,
                });
                body.put_u8(rj.reason);
            }
            Pdu::PData(pdvs) => {
                for pdv in pdvs {
                    body.put_u32((pdv.data.len() + 2) as u32);
                    body.put_u8(pdv.context_id);
                    body.put_u8(pdv.control_header());
                    body.put_slice(&pdv.data);
                }
            }
            Pdu::ReleaseRq | Pdu::ReleaseRp => body.put_u32(0),
            Pdu::Abort(abort) => {
                body.put_u16(0);
                body.put_u8(match abort.source {
                    AbortSource::ServiceUser => 0,
                    AbortSource::ServiceProvider => 2,
                });
                body.put_u8(abort.reason);
            }
        }
        dst.reserve(PDU_HEADER_LEN + body.len());
        dst.put_u8(self.pdu_type());
        dst.put_u8(0);
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }

    /// Decode a body whose header has already been consumed
    pub fn decode(pdu_type: u8, mut body: Bytes) -> Result<Pdu> {
        match pdu_type {
            PDU_ASSOCIATE_RQ => decode_associate_rq(&mut body).map(Pdu::AssociateRq),
            PDU_ASSOCIATE_AC => decode_associate_ac(&mut body).map(Pdu::AssociateAc),
            PDU_ASSOCIATE_RJ => {
                ensure(&body, 4, "A-ASSOCIATE-RJ")?;
                body.advance(1);
                let result = match body.get_u8() {
                    1 => RejectResult::Permanent,
                    2 => RejectResult::Transient,
                    other => return Err(DimseError::protocol(format!("invalid reject result {}", other))),
                };
                let source = match body.get_u8() {
                    1 => RejectSource::ServiceUser,
                    2 => RejectSource::ServiceProviderAcse,
                    3 => RejectSource::ServiceProviderPresentation,
                    other => return Err(DimseError::protocol(format!("invalid reject source {}", other))),
                };
                let reason = body.get_u8();
                Ok(Pdu::AssociateRj(RejectReason {
                    result,
                    source,
                    reason,
                }))
            }
            PDU_P_DATA_TF => {
                let mut pdvs = Vec::new();
                while body.has_remaining() {
                    ensure(&body, 4, "PDV item length")?;
                    let len = body.get_u32() as usize;
                    if len < 2 {
                        return Err(DimseError::protocol(format!("PDV item length {} too short", len)));
                    }
                    ensure(&body, len, "PDV item")?;
                    let context_id = body.get_u8();
                    let mch = body.get_u8();
                    let data = body.split_to(len - 2);
                    pdvs.push(Pdv {
                        context_id,
                        value_type: if mch & 0x01 != 0 {
                            PdvType::Command
                        } else {
                            PdvType::Data
                        },
                        is_last: mch & 0x02 != 0,
                        data,
                    });
                }
                Ok(Pdu::PData(pdvs))
            }
            PDU_RELEASE_RQ => Ok(Pdu::ReleaseRq),
            PDU_RELEASE_RP => Ok(Pdu::ReleaseRp),
            PDU_ABORT => {
                ensure(&body, 4, "A-ABORT")?;
                body.advance(2);
                let source = match body.get_u8() {
                    2 => AbortSource::ServiceProvider,
                    _ => AbortSource::ServiceUser,
                };
                let reason = body.get_u8();
                Ok(Pdu::Abort(AbortReason { source, reason }))
            }
            other => Err(DimseError::protocol(format!("unrecognised PDU type 0x{:02x}", other))),
        }
    }
}

fn ensure(buf: &impl Buf, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(DimseError::protocol(format!(
            "{} truncated: need {} bytes, have {}",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Space-pad or truncate an AE title to the 16 byte field
fn ae_title_field(title: &str) -> [u8; 16] {
    let mut field = [b' '; 16];
    for (dst, src) in field.iter_mut().zip(title.bytes()) {
        *dst = src;
    }
    field
}

fn read_ae_title(body: &mut Bytes) -> String {
    let raw = body.split_to(16);
    String::from_utf8_lossy(&raw).trim().to_string()
}

fn put_item(dst: &mut BytesMut, item_type: u8, content: &[u8]) -> Result<()> {
    let len = u16::try_from(content.len())
        .map_err(|_| DimseError::protocol(format!("item 0x{:02x} too long", item_type)))?;
    dst.put_u8(item_type);
    dst.put_u8(0);
    dst.put_u16(len);
    dst.put_slice(content);
    Ok(())
}

fn encode_header_fields(
    dst: &mut BytesMut,
    protocol_version: u16,
    called: &str,
    calling: &str,
    application_context: &str,
) -> Result<()> {
    dst.put_u16(protocol_version);
    dst.put_u16(0);
    dst.put_slice(&ae_title_field(called));
    dst.put_slice(&ae_title_field(calling));
    dst.put_bytes(0, 32);
    put_item(dst, ITEM_APPLICATION_CONTEXT, application_context.as_bytes())
}

fn encode_user_information(dst: &mut BytesMut, info: &UserInformation) -> Result<()> {
    let mut sub = BytesMut::new();
    put_item(&mut sub, ITEM_MAX_LENGTH, &info.max_length.to_be_bytes())?;
    if let Some(uid) = &info.implementation_class_uid {
        put_item(&mut sub, ITEM_IMPLEMENTATION_CLASS_UID, uid.as_bytes())?;
    }
    if let Some(name) = &info.implementation_version_name {
        put_item(&mut sub, ITEM_IMPLEMENTATION_VERSION_NAME, name.as_bytes())?;
    }
    put_item(dst, ITEM_USER_INFORMATION, &sub)
}

fn encode_associate_rq(rq: &AssociateRq, dst: &mut BytesMut) -> Result<()> {
    encode_header_fields(
        dst,
        rq.protocol_version,
        &rq.called_ae_title,
        &rq.calling_ae_title,
        &rq.application_context,
    )?;
    for pc in &rq.presentation_contexts {
        let mut content = BytesMut::new();
        content.put_u8(pc.id);
        content.put_bytes(0, 3);
        put_item(&mut content, ITEM_ABSTRACT_SYNTAX, pc.abstract_syntax.as_bytes())?;
        for ts in &pc.transfer_syntaxes {
            put_item(&mut content, ITEM_TRANSFER_SYNTAX, ts.as_bytes())?;
        }
        put_item(dst, ITEM_PRESENTATION_CONTEXT_RQ, &content)?;
    }
    encode_user_information(dst, &rq.user_information)
}

fn encode_associate_ac(ac: &AssociateAc, dst: &mut BytesMut) -> Result<()> {
    encode_header_fields(
        dst,
        ac.protocol_version,
        &ac.called_ae_title,
        &ac.calling_ae_title,
        &ac.application_context,
    )?;
    for pc in &ac.presentation_contexts {
        let mut content = BytesMut::new();
        content.put_u8(pc.id);
        content.put_u8(0);
        content.put_u8(pc.result.to_u8());
        content.put_u8(0);
        put_item(&mut content, ITEM_TRANSFER_SYNTAX, pc.transfer_syntax.as_bytes())?;
        put_item(dst, ITEM_PRESENTATION_CONTEXT_AC, &content)?;
    }
    encode_user_information(dst, &ac.user_information)
}

/// Split the body into (item type, item content) pairs
fn read_items(body: &mut Bytes) -> Result<Vec<(u8, Bytes)>> {
    let mut items = Vec::new();
    while body.has_remaining() {
        ensure(body, 4, "item header")?;
        let item_type = body.get_u8();
        body.advance(1);
        let len = body.get_u16() as usize;
        ensure(body, len, "item")?;
        items.push((item_type, body.split_to(len)));
    }
    Ok(items)
}

fn uid_string(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

fn decode_user_information(mut content: Bytes) -> Result<UserInformation> {
    let mut info = UserInformation::default();
    for (sub_type, mut value) in read_items(&mut content)? {
        match sub_type {
            ITEM_MAX_LENGTH => {
                ensure(&value, 4, "maximum length sub-item")?;
                info.max_length = value.get_u32();
            }
            ITEM_IMPLEMENTATION_CLASS_UID => info.implementation_class_uid = Some(uid_string(&value)),
            ITEM_IMPLEMENTATION_VERSION_NAME => {
                info.implementation_version_name = Some(uid_string(&value))
            }
            // Negotiation sub-items this SCU does not use
            _ => {}
        }
    }
    Ok(info)
}

struct Fixed {
    protocol_version: u16,
    called_ae_title: String,
    calling_ae_title: String,
}

fn decode_fixed_fields(body: &mut Bytes, what: &str) -> Result<Fixed> {
    ensure(body, 68, what)?;
    let protocol_version = body.get_u16();
    body.advance(2);
    let called_ae_title = read_ae_title(body);
    let calling_ae_title = read_ae_title(body);
    body.advance(32);
    Ok(Fixed {
        protocol_version,
        called_ae_title,
        calling_ae_title,
    })
}

fn decode_associate_rq(body: &mut Bytes) -> Result<AssociateRq> {
    let fixed = decode_fixed_fields(body, "A-ASSOCIATE-RQ")?;
    let mut rq = AssociateRq {
        protocol_version: fixed.protocol_version,
        called_ae_title: fixed.called_ae_title,
        calling_ae_title: fixed.calling_ae_title,
        application_context: String::new(),
        presentation_contexts: Vec::new(),
        user_information: UserInformation::default(),
    };
    for (item_type, mut content) in read_items(body)? {
        match item_type {
            ITEM_APPLICATION_CONTEXT => rq.application_context = uid_string(&content),
            ITEM_PRESENTATION_CONTEXT_RQ => {
                ensure(&content, 4, "presentation context")?;
                let id = content.get_u8();
                content.advance(3);
                let mut pc = ProposedContext {
                    id,
                    abstract_syntax: String::new(),
                    transfer_syntaxes: Vec::new(),
                };
                for (sub_type, value) in read_items(&mut content)? {
                    match sub_type {
                        ITEM_ABSTRACT_SYNTAX => pc.abstract_syntax = uid_string(&value),
                        ITEM_TRANSFER_SYNTAX => pc.transfer_syntaxes.push(uid_string(&value)),
                        _ => {}
                    }
                }
                rq.presentation_contexts.push(pc);
            }
            ITEM_USER_INFORMATION => rq.user_information = decode_user_information(content)?,
            _ => {}
        }
    }
    Ok(rq)
}

fn decode_associate_ac(body: &mut Bytes) -> Result<AssociateAc> {
    let fixed = decode_fixed_fields(body, "A-ASSOCIATE-AC")?;
    let mut ac = AssociateAc {
        protocol_version: fixed.protocol_version,
        called_ae_title: fixed.called_ae_title,
        calling_ae_title: fixed.calling_ae_title,
        application_context: String::new(),
        presentation_contexts: Vec::new(),
        user_information: UserInformation::default(),
    };
    for (item_type, mut content) in read_items(body)? {
        match item_type {
            ITEM_APPLICATION_CONTEXT => ac.application_context = uid_string(&content),
            ITEM_PRESENTATION_CONTEXT_AC => {
                ensure(&content, 4, "presentation context")?;
                let id = content.get_u8();
                content.advance(1);
                let result = ContextResultReason::from_u8(content.get_u8())?;
                content.advance(1);
                let transfer_syntax = read_items(&mut content)?
                    .into_iter()
                    .find(|(t, _)| *t == ITEM_TRANSFER_SYNTAX)
                    .map(|(_, v)| uid_string(&v))
                    .unwrap_or_default();
                ac.presentation_contexts.push(ContextResult {
                    id,
                    result,
                    transfer_syntax,
                });
            }
            ITEM_USER_INFORMATION => ac.user_information = decode_user_information(content)?,
            _ => {}
        }
    }
    Ok(ac)
}
