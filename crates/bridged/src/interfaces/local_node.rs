//! Control protocol handler for cport 0, hosted locally by the bridge rather
//! than forwarded to any remote node. Grounded in
//! `examples/original_source/src/local_node.c`; the manifest bytes below are
//! carried forward verbatim from that file (a BeaglePlay CC1352 manifest —
//! a real deployment would substitute its own).

use proto::{Message, MessageError};

use crate::error::GB_OP_SUCCESS;

pub const CONTROL_PROTOCOL_CPORT: u16 = 0;

const CPORT_SHUTDOWN_REQUEST: u8 = 0x00;
const VERSION_REQUEST: u8 = 0x01;
const GET_MANIFEST_SIZE_REQUEST: u8 = 0x02;
const GET_MANIFEST_REQUEST: u8 = 0x03;
const CONNECTED_REQUEST: u8 = 0x04;
const DISCONNECTING_REQUEST: u8 = 0x05;
const DISCONNECTED_REQUEST: u8 = 0x06;
const TIMESYNC_ENABLE_REQUEST: u8 = 0x07;
const TIMESYNC_DISABLE_REQUEST: u8 = 0x08;
const TIMESYNC_AUTHORITATIVE_REQUEST: u8 = 0x09;
const INTF_HIBERNATE_ABORT_REQUEST: u8 = 0x0a;

const MANIFEST: [u8; 60] = [
    0x3c, 0x00, 0x00, 0x01, 0x08, 0x00, 0x01, 0x00, 0x01, 0x02, 0x00, 0x00, 0x18, 0x00, 0x02, 0x00,
    0x11, 0x01, 0x42, 0x65, 0x61, 0x67, 0x6c, 0x65, 0x50, 0x6c, 0x61, 0x79, 0x20, 0x43, 0x43, 0x31,
    0x33, 0x35, 0x32, 0x00, 0x18, 0x00, 0x02, 0x00, 0x11, 0x02, 0x42, 0x65, 0x61, 0x67, 0x6c, 0x65,
    0x50, 0x6c, 0x61, 0x79, 0x20, 0x43, 0x43, 0x31, 0x33, 0x35, 0x32, 0x00,
];

/// Handles a Control-protocol message addressed to cport 0. Returns `None`
/// for unrecognized types, matching the original's "log and drop" default
/// case (no response is sent for requests this bridge doesn't understand).
pub fn handle(msg: &Message) -> Option<Result<Message, MessageError>> {
    let payload: Vec<u8> = match msg.header.request_type() {
        CPORT_SHUTDOWN_REQUEST => vec![],
        VERSION_REQUEST => vec![0, 1],
        GET_MANIFEST_SIZE_REQUEST => (MANIFEST.len() as u16).to_le_bytes().to_vec(),
        GET_MANIFEST_REQUEST => MANIFEST.to_vec(),
        CONNECTED_REQUEST
        | DISCONNECTING_REQUEST
        | DISCONNECTED_REQUEST
        | TIMESYNC_ENABLE_REQUEST
        | TIMESYNC_DISABLE_REQUEST
        | TIMESYNC_AUTHORITATIVE_REQUEST
        | INTF_HIBERNATE_ABORT_REQUEST => vec![],
        unknown => {
            tracing::warn!(request_type = format!("{unknown:#x}"), "unimplemented control protocol request");
            return None;
        }
    };

    Some(Message::response(payload, msg.header.request_type(), msg.header.id, GB_OP_SUCCESS))
}
