//! Wire-format types shared by the bridge's HDLC link and its TCP
//! connections to peripheral nodes: the Greybus operation header, the owned
//! [`Message`] envelope built on top of it, and the SVC dialect's payload
//! structs and opcodes.

pub mod header;
pub mod message;
pub mod svc;

pub use header::{HeaderError, OperationHeader, HEADER_SIZE, TYPE_RESPONSE_FLAG};
pub use message::{next_operation_id, Message, MessageError, MAX_PAYLOAD_LEN};
