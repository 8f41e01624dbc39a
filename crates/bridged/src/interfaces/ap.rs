//! AP interface (id 1): the other end of the HDLC link. Writing means
//! framing a message and handing it to the HDLC writer addressed as
//! Greybus/control `0x03`, matching the literal control byte the original
//! firmware's `gb_message_hdlc_send` used.
//!
//! A single HDLC channel carries every cport's traffic multiplexed, so each
//! frame is prefixed with a 2-byte little-endian cport id ahead of the
//! standard Greybus header — the AP-side transport framing this bridge
//! supplies on top of the wire format `proto` defines.

use std::sync::Arc;

use proto::{HeaderError, Message, OperationHeader};

use crate::hdlc::{HdlcAddress, HdlcWriter, GREYBUS_CONTROL};

#[derive(Debug, thiserror::Error)]
pub enum ApFrameError {
    #[error("AP frame too short for a cport prefix: {0} bytes")]
    Truncated(usize),
    #[error(transparent)]
    Header(#[from] HeaderError),
}

pub struct Ap<W> {
    writer: Arc<HdlcWriter<W>>,
}

impl<W: tokio::io::AsyncWrite + Unpin> Ap<W> {
    pub fn new(writer: Arc<HdlcWriter<W>>) -> Self {
        Self { writer }
    }

    /// Serializes and frames `msg` for `ap_cport`, sending it to the host
    /// over the serial link. No serde on the wire: header and payload are
    /// packed manually by [`proto::Message::encode`].
    pub async fn write(&self, ap_cport: u16, msg: &Message) -> std::io::Result<usize> {
        let mut body = Vec::with_capacity(2 + proto::HEADER_SIZE + msg.payload.len());
        body.extend_from_slice(&ap_cport.to_le_bytes());
        body.extend_from_slice(&msg.encode());
        self.writer.send_block(&body, HdlcAddress::Greybus, GREYBUS_CONTROL).await
    }
}

/// Decodes one AP-bound HDLC frame's payload into its cport tag and message.
pub fn decode_ap_frame(payload: &[u8]) -> Result<(u16, Message), ApFrameError> {
    if payload.len() < 2 {
        return Err(ApFrameError::Truncated(payload.len()));
    }
    let cport = u16::from_le_bytes([payload[0], payload[1]]);
    let rest = &payload[2..];
    let header = OperationHeader::decode(rest)?;
    let msg = Message::from_parts(header, rest[proto::HEADER_SIZE..].to_vec())
        .map_err(|_| HeaderError::SizeTooSmall(header.size))?;
    Ok((cport, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_cport_and_message() {
        let msg = Message::request(vec![1, 2, 3], 0x05, false).unwrap();
        let mut payload = 7u16.to_le_bytes().to_vec();
        payload.extend_from_slice(&msg.encode());
        let (cport, decoded) = decode_ap_frame(&payload).unwrap();
        assert_eq!(cport, 7);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn truncated_frame_rejected() {
        assert!(decode_ap_frame(&[0]).is_err());
    }
}
