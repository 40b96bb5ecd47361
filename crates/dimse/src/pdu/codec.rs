use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::{Pdu, PDU_HEADER_LEN};
use crate::{DimseError, Result};

/// Frames PDUs on a byte stream
#[derive(Debug, Clone)]
pub struct PduCodec {
    /// Largest PDU body accepted from the peer
    max_body_len: usize,
}

impl PduCodec {
    pub fn new(max_body_len: u32) -> Self {
        Self {
            max_body_len: max_body_len as usize,
        }
    }
}

impl Default for PduCodec {
    fn default() -> Self {
        // Association negotiation PDUs may exceed the negotiated P-DATA limit
        Self::new(4 * 1024 * 1024)
    }
}

impl Decoder for PduCodec {
    type Item = Pdu;
    type Error = DimseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Pdu>> {
        if src.len() < PDU_HEADER_LEN {
            return Ok(None);
        }
        let pdu_type = src[0];
        let body_len = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;
        if body_len > self.max_body_len {
            return Err(DimseError::protocol(format!(
                "PDU length {} exceeds limit {}",
                body_len, self.max_body_len
            )));
        }
        let frame_len = PDU_HEADER_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        let frame = src.split_to(frame_len).freeze();
        Pdu::decode(pdu_type, frame.slice(PDU_HEADER_LEN..)).map(Some)
    }
}

impl Encoder<Pdu> for PduCodec {
    type Error = DimseError;

    fn encode(&mut self, item: Pdu, dst: &mut BytesMut) -> Result<()> {
        item.encode(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{AbortReason, Pdv, PdvType};
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    #[test]
    fn test_partial_frame_waits() {
        let mut encoded = BytesMut::new();
        Pdu::ReleaseRq.encode(&mut encoded).unwrap();
        assert_eq!(&encoded[..], &[0x05, 0, 0, 0, 0, 4, 0, 0, 0, 0]);

        let mut codec = PduCodec::default();
        let mut buf = BytesMut::from(&encoded[..7]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&encoded[7..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Pdu::ReleaseRq));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_pdu_rejected() {
        let mut codec = PduCodec::new(16);
        let mut buf = BytesMut::from(&[0x04, 0, 0, 0, 1, 0][..]);
        assert!(matches!(codec.decode(&mut buf), Err(DimseError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_framed_over_duplex() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = Framed::new(a, PduCodec::default());
        let mut right = Framed::new(b, PduCodec::default());

        let data = Pdu::PData(vec![Pdv {
            context_id: 1,
            value_type: PdvType::Data,
            is_last: false,
            data: Bytes::from(vec![0xAB; 200]),
        }]);
        let sent = data.clone();
        let writer = tokio::spawn(async move {
            left.send(sent).await.unwrap();
            left.send(Pdu::Abort(AbortReason::USER)).await.unwrap();
            left
        });

        assert_eq!(right.next().await.unwrap().unwrap(), data);
        assert_eq!(right.next().await.unwrap().unwrap(), Pdu::Abort(AbortReason::USER));
        drop(writer.await.unwrap());
        assert!(right.next().await.is_none());
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mut encoded = BytesMut::new();
        Pdu::Abort(AbortReason::UNEXPECTED_PDU).encode(&mut encoded).unwrap();
        let mock = tokio_test::io::Builder::new()
            .read(&encoded[..3])
            .read(&encoded[3..8])
            .read(&encoded[8..])
            .build();
        let mut framed = Framed::new(mock, PduCodec::default());
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Pdu::Abort(AbortReason::UNEXPECTED_PDU)
        );
        assert!(framed.next().await.is_none());
    }
}
