//! Service Class User (SCU) implementation for outbound C-STORE

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::association::{Association, AssociationParameters};
use crate::command::{CStoreRq, CStoreRsp, CommandSet};
use crate::config::{DimseConfig, RemoteNode};
use crate::correct::correct_ambiguous_vr;
use crate::dataset::{tags, DataSet};
use crate::pdu::{Pdu, Pdv, PdvType};
use crate::types::{Priority, Status};
use crate::{DimseError, Result};

/// CT Image Storage, proposed when the object names no SOP Class
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

/// Per-request settings of a C-STORE
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub priority: Priority,
    /// Bound on the wait for the C-STORE-RSP
    pub dimse_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Medium,
            dimse_timeout: DimseConfig::default().dimse_timeout(),
        }
    }
}

/// A complete DIMSE message as received
struct Message {
    command: CommandSet,
    data: Option<Vec<u8>>,
}

/// Split `bytes` into PDV payloads of at most `max` bytes; empty input is one empty fragment
fn fragments(bytes: &Bytes, max: usize) -> Vec<Bytes> {
    if bytes.is_empty() {
        return vec![Bytes::new()];
    }
    (0..bytes.len())
        .step_by(max)
        .map(|start| bytes.slice(start..(start + max).min(bytes.len())))
        .collect()
}

impl<S> Association<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send one C-STORE-RQ carrying `dataset` and wait for its C-STORE-RSP.
    ///
    /// The data set is encoded in the transfer syntax the peer accepted for
    /// its SOP Class. Any DIMSE status is returned as `Ok`; errors mean no
    /// response was obtained.
    pub async fn send_c_store(
        &mut self,
        dataset: &DataSet,
        options: &StoreOptions,
        cancel: &CancellationToken,
    ) -> Result<Status> {
        let sop_class = dataset
            .sop_class_uid()
            .unwrap_or_else(|| CT_IMAGE_STORAGE.to_string());
        let sop_instance = dataset
            .sop_instance_uid()
            .ok_or_else(|| DimseError::malformed(tags::SOP_INSTANCE_UID, "object has no SOP Instance UID"))?;
        let context = self
            .context_for(&sop_class)
            .cloned()
            .ok_or_else(|| DimseError::protocol(format!("no accepted presentation context for {}", sop_class)))?;

        let data = Bytes::from(dataset.encode(context.transfer_syntax)?);
        let request = CStoreRq {
            message_id: self.next_message_id(),
            affected_sop_class_uid: sop_class,
            affected_sop_instance_uid: sop_instance,
            priority: options.priority,
        };
        debug!(
            "C-STORE-RQ message {} on context {} ({}, {} data bytes)",
            request.message_id,
            context.id,
            context.transfer_syntax,
            data.len()
        );

        self.send_message(context.id, Bytes::from(request.encode()), Some(data), cancel)
            .await?;

        let message = self.receive_message(options.dimse_timeout, cancel).await?;
        if let Some(data) = &message.data {
            debug!("Ignoring {} byte data set sent with C-STORE-RSP", data.len());
        }
        let response = CStoreRsp::from_command_set(&message.command)?;
        if response.message_id_being_responded_to != request.message_id {
            return Err(DimseError::protocol(format!(
                "C-STORE-RSP answers message {}, expected {}",
                response.message_id_being_responded_to, request.message_id
            )));
        }
        Ok(response.status)
    }

    /// Fragment and send a command and its optional data set
    async fn send_message(
        &mut self,
        context_id: u8,
        command: Bytes,
        data: Option<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let max = self.max_pdv_data_len();
        let mut parts = vec![(PdvType::Command, command)];
        if let Some(data) = data {
            parts.push((PdvType::Data, data));
        }
        for (value_type, bytes) in parts {
            let chunks = fragments(&bytes, max);
            let count = chunks.len();
            for (i, chunk) in chunks.into_iter().enumerate() {
                // Only between whole PDUs
                if cancel.is_cancelled() {
                    return Err(DimseError::Cancelled);
                }
                self.send_pdu(Pdu::PData(vec![Pdv {
                    context_id,
                    value_type,
                    is_last: i + 1 == count,
                    data: chunk,
                }]))
                .await?;
            }
        }
        Ok(())
    }

    async fn receive_message(&mut self, wait: Duration, cancel: &CancellationToken) -> Result<Message> {
        let deadline = Instant::now() + wait;
        let mut command = Vec::new();
        let mut command_done = false;
        let mut data: Option<Vec<u8>> = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let pdu = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DimseError::Cancelled),
                pdu = self.receive_pdu(remaining, "C-STORE-RSP") => pdu?,
            };
            let pdvs = match pdu {
                Pdu::PData(pdvs) => pdvs,
                Pdu::Abort(reason) => return Err(DimseError::TransferInterrupted(reason.to_string())),
                other => {
                    return Err(DimseError::protocol(format!(
                        "unexpected {} while waiting for C-STORE-RSP",
                        other.name()
                    )))
                }
            };
            for pdv in pdvs {
                match pdv.value_type {
                    PdvType::Command if !command_done => {
                        command.extend_from_slice(&pdv.data);
                        command_done = pdv.is_last;
                    }
                    PdvType::Command => {
                        return Err(DimseError::protocol("command fragment after the last one"));
                    }
                    PdvType::Data if !command_done => {
                        return Err(DimseError::protocol("data fragment before command"));
                    }
                    PdvType::Data => {
                        let buf = data.get_or_insert_with(Vec::new);
                        buf.extend_from_slice(&pdv.data);
                        if pdv.is_last && command_done {
                            let command = CommandSet::decode(&command)?;
                            return Ok(Message { command, data });
                        }
                    }
                }
            }
            if command_done && data.is_none() {
                let set = CommandSet::decode(&command)?;
                if !set.has_data_set() {
                    return Ok(Message {
                        command: set,
                        data: None,
                    });
                }
            }
        }
    }
}

/// DIMSE Service Class User
pub struct DimseScu {
    config: DimseConfig,
}

impl DimseScu {
    /// Create a new SCU with the given configuration
    pub fn new(config: DimseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DimseConfig {
        &self.config
    }

    /// Read, correct and store one Part 10 file.
    ///
    /// The file is read and corrected before any connection is opened, so
    /// local errors never reach the network.
    pub async fn store_file(&self, node: &RemoteNode, path: &Path, cancel: &CancellationToken) -> Result<Status> {
        node.validate()?;

        debug!("Checking input files");
        let mut dataset = DataSet::open(path, self.config.transfer_syntax_policy).await?;
        debug!(
            "{} encoded as {}, {} top-level elements",
            path.display(),
            dataset.transfer_syntax(),
            dataset.len()
        );
        let corrected = correct_ambiguous_vr(&mut dataset)?;
        debug!("Corrected {} ambiguous element(s)", corrected);

        let assoc = self.associate(node, &dataset).await?;
        info!("Sending file: {}", path.display());
        self.store_on(assoc, &dataset, cancel).await
    }

    /// Negotiate one presentation context for the data set's SOP Class
    pub async fn associate(
        &self,
        node: &RemoteNode,
        dataset: &DataSet,
    ) -> Result<Association<tokio::net::TcpStream>> {
        if dataset.sop_instance_uid().is_none() {
            return Err(DimseError::malformed(
                tags::SOP_INSTANCE_UID,
                "object has no SOP Instance UID",
            ));
        }
        let params = self.association_parameters(node, dataset)?;
        info!(
            "Requesting association {} -> {}@{}",
            params.calling_ae_title,
            node.ae_title,
            node.address()
        );
        params
            .request(node, self.get_connection_timeout(node), self.config.acse_timeout())
            .await
    }

    pub fn association_parameters(&self, node: &RemoteNode, dataset: &DataSet) -> Result<AssociationParameters> {
        let abstract_syntax = match dataset.sop_class_uid() {
            Some(uid) => uid,
            None => {
                warn!("Object names no SOP Class UID, proposing CT Image Storage");
                CT_IMAGE_STORAGE.to_string()
            }
        };
        Ok(
            AssociationParameters::new(&self.config.calling_aet, &node.ae_title, self.config.max_pdu)
                .with_context(abstract_syntax, self.config.transfer_syntaxes()?),
        )
    }

    /// Run the C-STORE on an established association, then tear it down
    pub async fn store_on<S>(
        &self,
        mut assoc: Association<S>,
        dataset: &DataSet,
        cancel: &CancellationToken,
    ) -> Result<Status>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let options = StoreOptions {
            priority: Priority::Medium,
            dimse_timeout: self.config.dimse_timeout(),
        };
        let result = assoc.send_c_store(dataset, &options, cancel).await;
        let healthy = match &result {
            Ok(status) => {
                info!("Sent, peer returned status {}", status);
                true
            }
            Err(e) => e.leaves_transport_usable(),
        };
        assoc.teardown(healthy).await;
        result
    }

    /// Get connection timeout for a node (uses node-specific or global setting)
    fn get_connection_timeout(&self, node: &RemoteNode) -> Duration {
        node.connect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.connect_timeout())
    }
}
