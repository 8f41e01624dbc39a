//! Per-module error enums, composed into [`BridgeError`] at the binary
//! boundary, mirroring the teacher's `AgentError`/`HandlerError` composition.

use crate::{hdlc::HdlcError, interfaces::node::NodeError, registry::RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Hdlc(#[from] HdlcError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Message(#[from] proto::MessageError),
    #[error("config error: {0}")]
    Config(String),
}

/// Greybus response status byte values this bridge actually produces. The
/// remaining taxonomy entries (`UNKNOWN_CPORT`, `BAD_MESSAGE`, ...) are
/// encoded the same way but via module-local constants next to the code
/// that raises them, since each only makes sense in its own dispatch table.
pub const GB_OP_SUCCESS: u8 = 0x00;
pub const GB_OP_UNKNOWN_ERROR: u8 = 0x01;
pub const GB_OP_NO_MEMORY: u8 = 0x02;
pub const GB_OP_INTERRUPTED: u8 = 0x03;
pub const GB_OP_RETRY: u8 = 0x04;
pub const GB_OP_NONEXISTENT: u8 = 0x05;
pub const GB_OP_INVALID: u8 = 0x06;
pub const GB_OP_NOT_READY: u8 = 0x08;
