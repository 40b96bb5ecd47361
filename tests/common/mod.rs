//! In-process Storage SCP and fixture files for end-to-end tests

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dimse::command::{CStoreRq, CStoreRsp, CommandSet};
use dimse::dataset::{file_meta, tags};
use dimse::pdu::{
    AssociateAc, ContextResult, ContextResultReason, Pdu, PduCodec, Pdv, PdvType, RejectReason, RejectResult,
    RejectSource, UserInformation, APPLICATION_CONTEXT_NAME,
};
use dimse::{DataElement, DataSet, Status, TransferSyntax, Value, VR};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
pub const SOP_INSTANCE: &str = "1.2.826.0.1.3680043.2.1125.1.1";

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Accept the first proposed context with `transfer_syntax`, answer every C-STORE with `status`
    Accept { transfer_syntax: TransferSyntax, status: u16 },
    /// Send A-ASSOCIATE-RJ (permanent, service user, called AE not recognised)
    Reject,
    /// Accept, then close the connection without reading anything
    DropAfterAccept,
}

/// What the SCP observed on its one association
#[derive(Debug, Default)]
pub struct Recorded {
    pub associate_rq: Option<dimse::pdu::AssociateRq>,
    pub stores: Vec<(CStoreRq, Vec<u8>)>,
    pub released: bool,
    pub aborted: bool,
}

/// Listen on 127.0.0.1:0 and serve a single association
pub async fn spawn_scp(behaviour: Behaviour) -> (u16, JoinHandle<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(Framed::new(stream, PduCodec::default()), behaviour).await
    });
    (port, handle)
}

async fn serve(mut framed: Framed<tokio::net::TcpStream, PduCodec>, behaviour: Behaviour) -> Recorded {
    let mut recorded = Recorded::default();
    let rq = match framed.next().await {
        Some(Ok(Pdu::AssociateRq(rq))) => rq,
        other => panic!("expected A-ASSOCIATE-RQ, got {:?}", other),
    };
    recorded.associate_rq = Some(rq.clone());

    let (transfer_syntax, status) = match behaviour {
        Behaviour::Reject => {
            framed
                .send(Pdu::AssociateRj(RejectReason {
                    result: RejectResult::Permanent,
                    source: RejectSource::ServiceUser,
                    reason: 7,
                }))
                .await
                .unwrap();
            return recorded;
        }
        Behaviour::DropAfterAccept => (TransferSyntax::ImplicitVrLittleEndian, 0),
        Behaviour::Accept { transfer_syntax, status } => (transfer_syntax, status),
    };

    let context_id = rq.presentation_contexts[0].id;
    framed
        .send(Pdu::AssociateAc(AssociateAc {
            protocol_version: 1,
            called_ae_title: rq.called_ae_title.clone(),
            calling_ae_title: rq.calling_ae_title.clone(),
            application_context: APPLICATION_CONTEXT_NAME.into(),
            presentation_contexts: vec![ContextResult {
                id: context_id,
                result: ContextResultReason::Acceptance,
                transfer_syntax: transfer_syntax.uid().into(),
            }],
            user_information: UserInformation {
                max_length: 16384,
                ..Default::default()
            },
        }))
        .await
        .unwrap();
    if let Behaviour::DropAfterAccept = behaviour {
        return recorded;
    }

    let mut command = Vec::new();
    let mut data = Vec::new();
    while let Some(Ok(pdu)) = framed.next().await {
        match pdu {
            Pdu::PData(pdvs) => {
                for pdv in pdvs {
                    match pdv.value_type {
                        PdvType::Command => command.extend_from_slice(&pdv.data),
                        PdvType::Data => data.extend_from_slice(&pdv.data),
                    }
                    if pdv.value_type == PdvType::Data && pdv.is_last {
                        let set = CommandSet::decode(&command).unwrap();
                        let request = CStoreRq::from_command_set(&set).unwrap();
                        let rsp = CStoreRsp {
                            message_id_being_responded_to: request.message_id,
                            affected_sop_class_uid: Some(request.affected_sop_class_uid.clone()),
                            affected_sop_instance_uid: Some(request.affected_sop_instance_uid.clone()),
                            status: Status::new(status, None),
                        };
                        recorded.stores.push((request, std::mem::take(&mut data)));
                        command.clear();
                        framed
                            .send(Pdu::PData(vec![Pdv {
                                context_id,
                                value_type: PdvType::Command,
                                is_last: true,
                                data: Bytes::from(rsp.encode()),
                            }]))
                            .await
                            .unwrap();
                    }
                }
            }
            Pdu::ReleaseRq => {
                recorded.released = true;
                framed.send(Pdu::ReleaseRp).await.unwrap();
                break;
            }
            Pdu::Abort(_) => {
                recorded.aborted = true;
                break;
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    recorded
}

/// A small CT object whose SmallestImagePixelValue reads back as `US or SS`
pub fn ct_object(transfer_syntax: TransferSyntax) -> DataSet {
    let meta = file_meta(CT_IMAGE_STORAGE, SOP_INSTANCE, transfer_syntax).unwrap();
    let mut ds = DataSet::new(meta, transfer_syntax);
    let le = transfer_syntax != TransferSyntax::ExplicitVrBigEndian;
    let us = |v: u16| if le { v.to_le_bytes().to_vec() } else { v.to_be_bytes().to_vec() };

    ds.put(DataElement::new(tags::SOP_CLASS_UID, VR::UI, Value::Bytes(CT_IMAGE_STORAGE.as_bytes().to_vec())));
    ds.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, Value::Bytes(SOP_INSTANCE.as_bytes().to_vec())));
    ds.put(DataElement::new(tags::PATIENT_NAME, VR::PN, Value::Bytes(b"DOE^JOHN".to_vec())));
    ds.put(DataElement::new(tags::ROWS, VR::US, Value::Bytes(us(2))));
    ds.put(DataElement::new(tags::COLUMNS, VR::US, Value::Bytes(us(2))));
    ds.put(DataElement::new(tags::SMALLEST_IMAGE_PIXEL_VALUE, VR::US, Value::Bytes(us(5))));
    ds.put(DataElement::new(tags::PIXEL_DATA, VR::OW, Value::Bytes(vec![0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00])));
    ds
}

pub fn write_fixture(dir: &Path, ds: &DataSet) -> PathBuf {
    let path = dir.join("ct.dcm");
    std::fs::write(&path, ds.to_part10().unwrap()).unwrap();
    path
}

/// Log sink shared between the subscriber and the assertions
#[derive(Clone, Default)]
pub struct Capture(pub Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
