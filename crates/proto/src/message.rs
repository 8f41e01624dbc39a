//! Greybus messages: a header plus an owned payload, and the monotonic
//! operation-id allocator used to correlate requests with responses.

use std::sync::atomic::{AtomicU16, Ordering};

use crate::header::{HeaderError, OperationHeader, HEADER_SIZE};

/// Largest payload a [`Message`] may carry; bounded by `size` being a `u16`.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - HEADER_SIZE;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_LEN} byte limit")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Header(#[from] HeaderError),
}

/// A single Greybus operation message: header plus payload, owned.
///
/// There is no explicit "dealloc" step as there was in the firmware this
/// crate is modeled on — dropping a `Message` frees it. The protocol
/// invariant the firmware enforced by convention (the holder of a `Message`
/// forwards or discards it exactly once) is preserved here by ordinary move
/// semantics: taking a `Message` out of a channel or a function argument by
/// value *is* the ownership transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: OperationHeader,
    pub payload: Vec<u8>,
}

impl Message {
    /// Builds a request message. `id` is freshly allocated unless
    /// `one_shot` is set, in which case it is always 0.
    pub fn request(payload: Vec<u8>, msg_type: u8, one_shot: bool) -> Result<Self, MessageError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(MessageError::PayloadTooLarge(payload.len()));
        }
        let id = if one_shot { 0 } else { next_operation_id() };
        let header = OperationHeader::new((HEADER_SIZE + payload.len()) as u16, id, msg_type, 0);
        Ok(Self { header, payload })
    }

    /// Builds a response message. `msg_type` receives the response flag;
    /// `request_id` echoes the id of the request being answered.
    pub fn response(
        payload: Vec<u8>,
        msg_type: u8,
        request_id: u16,
        status: u8,
    ) -> Result<Self, MessageError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(MessageError::PayloadTooLarge(payload.len()));
        }
        let header = OperationHeader::new(
            (HEADER_SIZE + payload.len()) as u16,
            request_id,
            msg_type | crate::header::TYPE_RESPONSE_FLAG,
            status,
        );
        Ok(Self { header, payload })
    }

    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    /// Serializes header then payload into one contiguous buffer, the form
    /// both the HDLC link and node TCP sockets carry on the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a message from a header already parsed off the wire plus the
    /// exact payload bytes that followed it.
    pub fn from_parts(header: OperationHeader, payload: Vec<u8>) -> Result<Self, MessageError> {
        let expected = header.payload_len()? as usize;
        if payload.len() != expected {
            return Err(MessageError::Header(HeaderError::SizeTooSmall(header.size)));
        }
        Ok(Self { header, payload })
    }
}

static OPERATION_ID_COUNTER: AtomicU16 = AtomicU16::new(1);

/// Allocates the next non-zero operation id, wrapping `65535 -> 1` (0 is
/// reserved to mean "one-shot, no response expected").
pub fn next_operation_id() -> u16 {
    loop {
        let prev = OPERATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        if prev == 0 {
            // Someone is racing us right after a wrap reset; retry.
            continue;
        }
        if prev == u16::MAX {
            OPERATION_ID_COUNTER.store(1, Ordering::Relaxed);
        }
        return prev;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_request_has_id_zero() {
        let msg = Message::request(vec![1, 2, 3], 0x05, true).unwrap();
        assert_eq!(msg.header.id, 0);
        assert!(!msg.is_response());
    }

    #[test]
    fn response_sets_flag_and_echoes_id() {
        let req = Message::request(vec![], 0x02, false).unwrap();
        let resp = Message::response(vec![9], 0x02, req.header.id, 0).unwrap();
        assert!(resp.is_response());
        assert_eq!(resp.header.id, req.header.id);
        assert_eq!(resp.header.request_type(), 0x02);
    }

    #[test]
    fn header_size_matches_payload() {
        let msg = Message::request(vec![0u8; 10], 0x01, false).unwrap();
        assert_eq!(msg.header.size as usize, HEADER_SIZE + 10);
    }

    #[test]
    fn payload_too_large_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            Message::request(payload, 0x01, false),
            Err(MessageError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn encode_decode_round_trip() {
        let msg = Message::request(vec![1, 2, 3, 4], 0x09, false).unwrap();
        let bytes = msg.encode();
        let header = OperationHeader::decode(&bytes).unwrap();
        let decoded = Message::from_parts(header, bytes[HEADER_SIZE..].to_vec()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn operation_ids_are_never_zero_and_distinct_until_wrap() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let id = next_operation_id();
            assert_ne!(id, 0);
            assert!(seen.insert(id), "operation id {id} repeated before a wrap cycle");
        }
    }
}
