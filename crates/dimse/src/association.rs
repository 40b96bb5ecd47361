//! Association negotiation and teardown (PS3.8 section 7)
//!
//! An [`Association`] owns its transport for its whole life. It is created
//! only by a successful negotiation, so holding one means the association is
//! established. [`Association::teardown`] consumes it: the release or abort
//! runs and the transport is closed exactly once.
//!
//! ```text
//! Idle -> Requesting -> Established -> Releasing -> Closed
//!                   \-> Rejected      \-> Aborting -> Closed
//!                    \-> Aborted
//! ```

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::config::RemoteNode;
use crate::pdu::{
    AbortReason, AssociateAc, AssociateRq, ContextResultReason, Pdu, PduCodec, ProposedContext,
    UserInformation, APPLICATION_CONTEXT_NAME, PDV_HEADER_LEN,
};
use crate::transfer_syntax::TransferSyntax;
use crate::{DimseError, Result};

/// Protocol version field of A-ASSOCIATE-RQ
const PROTOCOL_VERSION: u16 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    Idle,
    Requesting,
    Established,
    Rejected,
    Aborted,
    Releasing,
    Aborting,
    Closed,
}

/// One proposed presentation context
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationContext {
    pub abstract_syntax: String,
    /// In order of preference
    pub transfer_syntaxes: Vec<TransferSyntax>,
}

/// Everything sent in the A-ASSOCIATE-RQ
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationParameters {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub presentation_contexts: Vec<PresentationContext>,
    /// Maximum P-DATA-TF body this side accepts
    pub max_pdu_length: u32,
    pub implementation_class_uid: String,
    pub implementation_version_name: String,
}

/// A presentation context the peer accepted
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedContext {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntax: TransferSyntax,
}

impl AssociationParameters {
    pub fn new(
        calling_ae_title: impl Into<String>,
        called_ae_title: impl Into<String>,
        max_pdu_length: u32,
    ) -> Self {
        Self {
            calling_ae_title: calling_ae_title.into(),
            called_ae_title: called_ae_title.into(),
            presentation_contexts: Vec::new(),
            max_pdu_length,
            implementation_class_uid: crate::IMPLEMENTATION_CLASS_UID.to_string(),
            implementation_version_name: crate::IMPLEMENTATION_VERSION_NAME.to_string(),
        }
    }

    pub fn with_context(mut self, abstract_syntax: impl Into<String>, transfer_syntaxes: Vec<TransferSyntax>) -> Self {
        self.presentation_contexts.push(PresentationContext {
            abstract_syntax: abstract_syntax.into(),
            transfer_syntaxes,
        });
        self
    }

    /// Presentation context ids are odd, starting at 1
    fn context_id(index: usize) -> u8 {
        (index * 2 + 1) as u8
    }

    pub fn to_request(&self) -> AssociateRq {
        AssociateRq {
            protocol_version: PROTOCOL_VERSION,
            called_ae_title: self.called_ae_title.clone(),
            calling_ae_title: self.calling_ae_title.clone(),
            application_context: APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: self
                .presentation_contexts
                .iter()
                .enumerate()
                .map(|(i, pc)| ProposedContext {
                    id: Self::context_id(i),
                    abstract_syntax: pc.abstract_syntax.clone(),
                    transfer_syntaxes: pc.transfer_syntaxes.iter().map(|ts| ts.uid().to_string()).collect(),
                })
                .collect(),
            user_information: UserInformation {
                max_length: self.max_pdu_length,
                implementation_class_uid: Some(self.implementation_class_uid.clone()),
                implementation_version_name: Some(self.implementation_version_name.clone()),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.presentation_contexts.is_empty() || self.presentation_contexts.len() > 128 {
            return Err(DimseError::config("between 1 and 128 presentation contexts must be proposed"));
        }
        if let Some(pc) = self.presentation_contexts.iter().find(|pc| pc.transfer_syntaxes.is_empty()) {
            return Err(DimseError::config(format!(
                "presentation context for {} proposes no transfer syntax",
                pc.abstract_syntax
            )));
        }
        Ok(())
    }

    /// Connect to the node over TCP and negotiate
    pub async fn request(
        &self,
        node: &RemoteNode,
        connect_timeout: Duration,
        acse_timeout: Duration,
    ) -> Result<Association<TcpStream>> {
        let peer = node.address();
        debug!("Connecting to {} ({})", node.ae_title, peer);
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&peer)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(DimseError::AssociationFailed {
                    peer,
                    reason: format!("connection failed: {}", e),
                })
            }
            Err(_) => {
                return Err(DimseError::AssociationFailed {
                    peer,
                    reason: format!("connection timed out after {:?}", connect_timeout),
                })
            }
        };
        // Small command PDUs go out without Nagle delay
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        Association::negotiate(stream, self, peer, acse_timeout).await
    }
}

/// An established association
pub struct Association<S> {
    framed: Framed<S, PduCodec>,
    state: AssociationState,
    peer: String,
    contexts: Vec<NegotiatedContext>,
    /// Peer's maximum P-DATA-TF body, 0 for unlimited
    peer_max_pdu: u32,
    local_max_pdu: u32,
    acse_timeout: Duration,
    last_message_id: u16,
}

impl<S> Association<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the A-ASSOCIATE exchange over an already connected transport
    pub async fn negotiate(
        stream: S,
        params: &AssociationParameters,
        peer: impl Into<String>,
        acse_timeout: Duration,
    ) -> Result<Self> {
        params.validate()?;
        let mut assoc = Association {
            framed: Framed::new(stream, PduCodec::default()),
            state: AssociationState::Idle,
            peer: peer.into(),
            contexts: Vec::new(),
            peer_max_pdu: 0,
            local_max_pdu: params.max_pdu_length,
            acse_timeout,
            last_message_id: 0,
        };

        let rq = params.to_request();
        debug!(
            "Requesting association {} -> {} with {} presentation context(s)",
            rq.calling_ae_title,
            rq.called_ae_title,
            rq.presentation_contexts.len()
        );
        assoc.state = AssociationState::Requesting;
        if let Err(e) = assoc.framed.send(Pdu::AssociateRq(rq)).await {
            assoc.state = AssociationState::Aborted;
            return Err(assoc.failed(format!("sending A-ASSOCIATE-RQ: {}", e)));
        }

        let reply = match tokio::time::timeout(acse_timeout, assoc.framed.next()).await {
            Ok(Some(Ok(pdu))) => pdu,
            Ok(Some(Err(e))) => {
                assoc.abort_quietly(AbortReason::UNEXPECTED_PDU).await;
                return Err(assoc.failed(e.to_string()));
            }
            Ok(None) => {
                assoc.state = AssociationState::Aborted;
                return Err(assoc.failed("connection closed by peer"));
            }
            Err(_) => {
                assoc.abort_quietly(AbortReason::USER).await;
                return Err(assoc.failed(format!("no response within {:?}", acse_timeout)));
            }
        };

        match reply {
            Pdu::AssociateAc(ac) => {
                assoc.accept(params, ac).await?;
                Ok(assoc)
            }
            Pdu::AssociateRj(reason) => {
                assoc.state = AssociationState::Rejected;
                Err(DimseError::AssociationRejected(reason))
            }
            Pdu::Abort(reason) => {
                assoc.state = AssociationState::Aborted;
                Err(assoc.failed(reason.to_string()))
            }
            other => {
                assoc.abort_quietly(AbortReason::UNEXPECTED_PDU).await;
                Err(assoc.failed(format!("unexpected {} while requesting", other.name())))
            }
        }
    }

    async fn accept(&mut self, params: &AssociationParameters, ac: AssociateAc) -> Result<()> {
        let proposed = params.to_request().presentation_contexts;
        for result in &ac.presentation_contexts {
            let Some(pc) = proposed.iter().find(|pc| pc.id == result.id) else {
                warn!("Peer answered unknown presentation context {}", result.id);
                continue;
            };
            if result.result != ContextResultReason::Acceptance {
                info!(
                    "Presentation context {} ({}) rejected: {}",
                    result.id, pc.abstract_syntax, result.result
                );
                continue;
            }
            let accepted = TransferSyntax::from_uid(&result.transfer_syntax)
                .filter(|ts| pc.transfer_syntaxes.iter().any(|uid| uid == ts.uid()));
            match accepted {
                Some(transfer_syntax) => {
                    debug!(
                        "Presentation context {} accepted with {}",
                        result.id, transfer_syntax
                    );
                    self.contexts.push(NegotiatedContext {
                        id: result.id,
                        abstract_syntax: pc.abstract_syntax.clone(),
                        transfer_syntax,
                    });
                }
                None => warn!(
                    "Presentation context {} accepted with unproposed transfer syntax '{}'",
                    result.id, result.transfer_syntax
                ),
            }
        }

        if self.contexts.is_empty() {
            self.abort_quietly(AbortReason::USER).await;
            return Err(self.failed("no presentation context was accepted"));
        }

        self.peer_max_pdu = ac.user_information.max_length;
        self.state = AssociationState::Established;
        info!(
            "Association accepted by {} (peer max PDU {})",
            ac.called_ae_title,
            self.peer_max_pdu
        );
        Ok(())
    }

    fn failed(&self, reason: impl Into<String>) -> DimseError {
        DimseError::AssociationFailed {
            peer: self.peer.clone(),
            reason: reason.into(),
        }
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn contexts(&self) -> &[NegotiatedContext] {
        &self.contexts
    }

    /// First accepted context for the abstract syntax
    pub fn context_for(&self, abstract_syntax: &str) -> Option<&NegotiatedContext> {
        self.contexts.iter().find(|pc| pc.abstract_syntax == abstract_syntax)
    }

    pub fn peer_max_pdu(&self) -> u32 {
        self.peer_max_pdu
    }

    /// Largest PDV payload that fits one P-DATA-TF for this peer
    pub fn max_pdv_data_len(&self) -> usize {
        let limit = if self.peer_max_pdu == 0 {
            self.local_max_pdu
        } else {
            self.peer_max_pdu
        };
        (limit as usize).saturating_sub(PDV_HEADER_LEN).max(1)
    }

    pub fn next_message_id(&mut self) -> u16 {
        self.last_message_id = self.last_message_id.wrapping_add(1).max(1);
        self.last_message_id
    }

    pub(crate) async fn send_pdu(&mut self, pdu: Pdu) -> Result<()> {
        self.framed
            .send(pdu)
            .await
            .map_err(|e| DimseError::TransferInterrupted(format!("sending to {}: {}", self.peer, e)))
    }

    /// Wait for the next PDU from the peer
    pub(crate) async fn receive_pdu(&mut self, wait: Duration, what: &str) -> Result<Pdu> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Ok(Some(Ok(pdu))) => Ok(pdu),
            Ok(Some(Err(DimseError::Network(e)))) => Err(DimseError::TransferInterrupted(format!(
                "receiving from {}: {}",
                self.peer, e
            ))),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Err(DimseError::TransferInterrupted(format!(
                "connection closed by {} while waiting for {}",
                self.peer, what
            ))),
            Err(_) => Err(DimseError::Timeout(format!("{} from {}", what, self.peer))),
        }
    }

    /// Graceful release: A-RELEASE-RQ then wait for A-RELEASE-RP
    pub async fn release(&mut self) -> Result<()> {
        self.state = AssociationState::Releasing;
        self.send_pdu(Pdu::ReleaseRq).await?;
        loop {
            match self.receive_pdu(self.acse_timeout, "A-RELEASE-RP").await? {
                Pdu::ReleaseRp => return Ok(()),
                // Late data for an exchange that has already ended
                Pdu::PData(_) => debug!("Discarding P-DATA-TF received while releasing"),
                Pdu::Abort(reason) => {
                    return Err(DimseError::TransferInterrupted(reason.to_string()));
                }
                other => {
                    return Err(DimseError::protocol(format!(
                        "unexpected {} while releasing",
                        other.name()
                    )))
                }
            }
        }
    }

    /// Send A-ABORT, ignoring transport errors
    pub async fn abort_quietly(&mut self, reason: AbortReason) {
        self.state = AssociationState::Aborting;
        if let Err(e) = self.framed.send(Pdu::Abort(reason)).await {
            debug!("Could not send A-ABORT to {}: {}", self.peer, e);
        }
        self.state = AssociationState::Aborted;
    }

    /// Release when `healthy`, otherwise abort, then close the transport
    pub async fn teardown(mut self, healthy: bool) {
        if healthy {
            match self.release().await {
                Ok(()) => info!("Released association with {}", self.peer),
                Err(e) => {
                    warn!("Release failed ({}), aborting association", e);
                    self.abort_quietly(AbortReason::USER).await;
                }
            }
        } else {
            warn!("Aborting association with {}", self.peer);
            self.abort_quietly(AbortReason::USER).await;
        }
        if let Err(e) = SinkExt::<Pdu>::close(&mut self.framed).await {
            debug!("Error closing transport to {}: {}", self.peer, e);
        }
        self.state = AssociationState::Closed;
    }
}

impl<S> Drop for Association<S> {
    fn drop(&mut self) {
        if matches!(self.state, AssociationState::Established | AssociationState::Releasing) {
            warn!("Association with {} dropped without release or abort", self.peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{ContextResult, RejectReason, RejectResult, RejectSource};
    use tokio::io::DuplexStream;

    const CT: &str = "1.2.840.10008.5.1.4.1.1.2";

    fn params() -> AssociationParameters {
        AssociationParameters::new("STORESCU", "ANY-SCP", 16384).with_context(CT, TransferSyntax::ALL.to_vec())
    }

    /// Peer side: read the RQ, answer with `reply`
    async fn answer(peer: DuplexStream, reply: impl FnOnce(AssociateRq) -> Pdu) -> Framed<DuplexStream, PduCodec> {
        let mut framed = Framed::new(peer, PduCodec::default());
        let rq = match framed.next().await.unwrap().unwrap() {
            Pdu::AssociateRq(rq) => rq,
            other => panic!("expected A-ASSOCIATE-RQ, got {:?}", other),
        };
        framed.send(reply(rq)).await.unwrap();
        framed
    }

    fn accept_with(ts: &'static str) -> impl FnOnce(AssociateRq) -> Pdu {
        move |rq| {
            Pdu::AssociateAc(AssociateAc {
                protocol_version: 1,
                called_ae_title: rq.called_ae_title.clone(),
                calling_ae_title: rq.calling_ae_title.clone(),
                application_context: APPLICATION_CONTEXT_NAME.into(),
                presentation_contexts: vec![ContextResult {
                    id: rq.presentation_contexts[0].id,
                    result: ContextResultReason::Acceptance,
                    transfer_syntax: ts.into(),
                }],
                user_information: UserInformation {
                    max_length: 4096,
                    ..Default::default()
                },
            })
        }
    }

    #[test]
    fn test_request_proposes_preference_order() {
        let rq = params().to_request();
        assert_eq!(rq.protocol_version, 1);
        assert_eq!(rq.application_context, APPLICATION_CONTEXT_NAME);
        assert_eq!(rq.presentation_contexts.len(), 1);
        assert_eq!(rq.presentation_contexts[0].id, 1);
        assert_eq!(
            rq.presentation_contexts[0].transfer_syntaxes,
            vec!["1.2.840.10008.1.2", "1.2.840.10008.1.2.1", "1.2.840.10008.1.2.2"]
        );
        assert_eq!(rq.user_information.max_length, 16384);
    }

    #[tokio::test]
    async fn test_accepts_implicit_little_endian() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(answer(remote, accept_with("1.2.840.10008.1.2")));

        let assoc = Association::negotiate(local, &params(), "mock", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(assoc.state(), AssociationState::Established);
        let pc = assoc.context_for(CT).unwrap();
        assert_eq!(pc.id, 1);
        assert_eq!(pc.transfer_syntax, TransferSyntax::ImplicitVrLittleEndian);
        assert_eq!(assoc.peer_max_pdu(), 4096);
        assert_eq!(assoc.max_pdv_data_len(), 4090);

        let mut peer = peer.await.unwrap();
        let releasing = tokio::spawn(assoc.teardown(true));
        assert_eq!(peer.next().await.unwrap().unwrap(), Pdu::ReleaseRq);
        peer.send(Pdu::ReleaseRp).await.unwrap();
        releasing.await.unwrap();
        assert!(peer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_rejection_is_surfaced() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let rj = RejectReason {
            result: RejectResult::Permanent,
            source: RejectSource::ServiceUser,
            reason: 7,
        };
        let peer = tokio::spawn(answer(remote, move |_| Pdu::AssociateRj(rj)));

        match Association::negotiate(local, &params(), "mock", Duration::from_secs(5)).await {
            Err(DimseError::AssociationRejected(reason)) => assert_eq!(reason, rj),
            Err(e) => panic!("expected rejection, got {}", e),
            Ok(_) => panic!("expected rejection"),
        }
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn test_no_accepted_context_aborts() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(answer(remote, |rq| {
            let mut ac = match accept_with("1.2.840.10008.1.2")(rq) {
                Pdu::AssociateAc(ac) => ac,
                _ => unreachable!(),
            };
            ac.presentation_contexts[0].result = ContextResultReason::AbstractSyntaxNotSupported;
            Pdu::AssociateAc(ac)
        }));

        let err = Association::negotiate(local, &params(), "mock", Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DimseError::AssociationFailed { .. }));
        let mut peer = peer.await.unwrap();
        assert!(matches!(peer.next().await.unwrap().unwrap(), Pdu::Abort(_)));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (local, _remote) = tokio::io::duplex(64 * 1024);
        let err = Association::negotiate(local, &params(), "mock", Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        match err {
            DimseError::AssociationFailed { peer, reason } => {
                assert_eq!(peer, "mock");
                assert!(reason.contains("no response"));
            }
            other => panic!("expected AssociationFailed, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let node = RemoteNode::new("ANY-SCP", "127.0.0.1", port);
        let err = params()
            .request(&node, Duration::from_secs(2), Duration::from_secs(2))
            .await
            .err()
            .unwrap();
        assert!(err.is_negotiation());
    }

    #[tokio::test]
    async fn test_unhealthy_teardown_aborts() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(answer(remote, accept_with("1.2.840.10008.1.2.1")));
        let assoc = Association::negotiate(local, &params(), "mock", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            assoc.contexts()[0].transfer_syntax,
            TransferSyntax::ExplicitVrLittleEndian
        );
        assoc.teardown(false).await;

        let mut peer = peer.await.unwrap();
        assert_eq!(peer.next().await.unwrap().unwrap(), Pdu::Abort(AbortReason::USER));
        assert!(peer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_long_calling_ae_title_sent_truncated() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(answer(remote, |rq| {
            assert_eq!(rq.calling_ae_title, "ABCDEFGHIJKLMNOP");
            accept_with("1.2.840.10008.1.2")(rq)
        }));
        let long = AssociationParameters::new("ABCDEFGHIJKLMNOPQ", "ANY-SCP", 16384)
            .with_context(CT, TransferSyntax::ALL.to_vec());

        let assoc = Association::negotiate(local, &long, "mock", Duration::from_secs(5))
            .await
            .unwrap();
        let mut peer = peer.await.unwrap();
        assoc.teardown(false).await;
        assert_eq!(peer.next().await.unwrap().unwrap(), Pdu::Abort(AbortReason::USER));
    }

    #[tokio::test]
    async fn test_unexpected_release_reply_aborts() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(answer(remote, accept_with("1.2.840.10008.1.2")));
        let assoc = Association::negotiate(local, &params(), "mock", Duration::from_secs(5))
            .await
            .unwrap();

        let mut peer = peer.await.unwrap();
        let releasing = tokio::spawn(assoc.teardown(true));
        assert_eq!(peer.next().await.unwrap().unwrap(), Pdu::ReleaseRq);
        peer.send(Pdu::AssociateRj(RejectReason {
            result: RejectResult::Permanent,
            source: RejectSource::ServiceUser,
            reason: 1,
        }))
        .await
        .unwrap();
        assert_eq!(peer.next().await.unwrap().unwrap(), Pdu::Abort(AbortReason::USER));
        releasing.await.unwrap();
        assert!(peer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_silent_release_aborts() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(answer(remote, accept_with("1.2.840.10008.1.2")));
        let assoc = Association::negotiate(local, &params(), "mock", Duration::from_millis(200))
            .await
            .unwrap();

        let mut peer = peer.await.unwrap();
        let releasing = tokio::spawn(assoc.teardown(true));
        assert_eq!(peer.next().await.unwrap().unwrap(), Pdu::ReleaseRq);
        assert_eq!(peer.next().await.unwrap().unwrap(), Pdu::Abort(AbortReason::USER));
        releasing.await.unwrap();
    }
}
