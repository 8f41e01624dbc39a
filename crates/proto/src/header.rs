//! Greybus operation header: the 8-byte little-endian layout shared by every
//! message that crosses the HDLC link or a node TCP socket.

/// Size of an encoded [`OperationHeader`] in bytes.
pub const HEADER_SIZE: usize = 8;

/// High bit of `type` marking a message as a response to a prior request.
pub const TYPE_RESPONSE_FLAG: u8 = 0x80;

/// The fixed 8-byte Greybus operation header.
///
/// Wire layout (little-endian): `size: u16, id: u16, type: u8, status: u8,
/// pad: u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationHeader {
    pub size: u16,
    pub id: u16,
    pub msg_type: u8,
    pub status: u8,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header truncated: need {HEADER_SIZE} bytes, got {0}")]
    Truncated(usize),
    #[error("header size field {0} is smaller than the header itself")]
    SizeTooSmall(u16),
}

impl OperationHeader {
    pub fn new(size: u16, id: u16, msg_type: u8, status: u8) -> Self {
        Self { size, id, msg_type, status }
    }

    /// True if the response flag is set on `type`.
    pub fn is_response(&self) -> bool {
        self.msg_type & TYPE_RESPONSE_FLAG != 0
    }

    /// `type` with the response flag cleared, i.e. the request opcode this
    /// header's type corresponds to.
    pub fn request_type(&self) -> u8 {
        self.msg_type & !TYPE_RESPONSE_FLAG
    }

    /// Number of payload bytes this header declares, i.e. `size - 8`.
    pub fn payload_len(&self) -> Result<u16, HeaderError> {
        self.size
            .checked_sub(HEADER_SIZE as u16)
            .ok_or(HeaderError::SizeTooSmall(self.size))
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.size.to_le_bytes());
        buf[2..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4] = self.msg_type;
        buf[5] = self.status;
        // pad is always zero on the wire
        buf[6..8].copy_from_slice(&0u16.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_SIZE {
            return Err(HeaderError::Truncated(buf.len()));
        }
        Ok(Self {
            size: u16::from_le_bytes([buf[0], buf[1]]),
            id: u16::from_le_bytes([buf[2], buf[3]]),
            msg_type: buf[4],
            status: buf[5],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let h = OperationHeader::new(12, 7, 0x05, 0);
        assert_eq!(OperationHeader::decode(&h.encode()).unwrap(), h);
    }

    #[test]
    fn response_flag() {
        let req = OperationHeader::new(8, 1, 0x02, 0);
        let resp = OperationHeader::new(8, 1, 0x02 | TYPE_RESPONSE_FLAG, 0);
        assert!(!req.is_response());
        assert!(resp.is_response());
        assert_eq!(resp.request_type(), 0x02);
    }

    #[test]
    fn truncated_decode() {
        assert_eq!(OperationHeader::decode(&[0u8; 4]), Err(HeaderError::Truncated(4)));
    }

    #[test]
    fn payload_len_underflow() {
        let h = OperationHeader::new(4, 0, 0, 0);
        assert!(matches!(h.payload_len(), Err(HeaderError::SizeTooSmall(4))));
    }
}
