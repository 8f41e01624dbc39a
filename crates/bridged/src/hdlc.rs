//! HDLC framing: byte-stuffing, CRC-16 (PPP/CCITT variant) and the three
//! logical channels multiplexed over the serial link.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crc::{Algorithm, Crc, CRC_16_IBM_SDLC};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

const FLAG: u8 = 0x7E;
const ESC: u8 = 0x7D;
const ESC_XOR: u8 = 0x20;

const HDLC_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC as &Algorithm<u16>);

fn fcs16(bytes: &[u8]) -> u16 {
    HDLC_CRC.checksum(bytes)
}

/// The logical channel a frame belongs to, carried in HDLC's address byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HdlcAddress {
    Greybus = 0x01,
    DebugLog = 0x02,
    Management = 0x03,
}

impl TryFrom<u8> for HdlcAddress {
    type Error = HdlcError;

    fn try_from(v: u8) -> Result<Self, HdlcError> {
        match v {
            0x01 => Ok(HdlcAddress::Greybus),
            0x02 => Ok(HdlcAddress::DebugLog),
            0x03 => Ok(HdlcAddress::Management),
            other => Err(HdlcError::UnknownAddress(other)),
        }
    }
}

/// Control byte the Greybus channel always sends with.
pub const GREYBUS_CONTROL: u8 = 0x03;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HdlcError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    #[error("frame checksum mismatch: expected {expected:04x}, got {actual:04x}")]
    InvalidFcs { expected: u16, actual: u16 },
    #[error("unknown HDLC address byte {0:#x}")]
    UnknownAddress(u8),
}

fn stuff(src: &[u8], out: &mut Vec<u8>) {
    for &b in src {
        match b {
            FLAG | ESC => {
                out.push(ESC);
                out.push(b ^ ESC_XOR);
            }
            other => out.push(other),
        }
    }
}

/// One fully decoded, checksum-verified HDLC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub addr: HdlcAddress,
    pub control: u8,
    pub payload: Vec<u8>,
}

/// Byte-at-a-time frame decoder. Fed raw bytes as they arrive off the serial
/// port; yields a [`DecodedFrame`] (or an error, which also bumps the drop
/// counter) each time a closing flag completes a non-empty frame. This is the
/// inline state machine a background reader task drives — it never blocks.
pub struct FrameDecoder {
    buf: Vec<u8>,
    escaped: bool,
    drops: Arc<AtomicU64>,
}

impl FrameDecoder {
    pub fn new(drops: Arc<AtomicU64>) -> Self {
        Self { buf: Vec::new(), escaped: false, drops }
    }

    /// Feeds one raw byte. Returns `Some` exactly when a frame boundary is
    /// reached; consecutive flag bytes (an empty frame) are silently
    /// swallowed, matching the common HDLC convention that `FLAG FLAG` is not
    /// a zero-length frame but idle-line filler.
    pub fn push_byte(&mut self, b: u8) -> Option<Result<DecodedFrame, HdlcError>> {
        if b == FLAG {
            self.escaped = false;
            if self.buf.is_empty() {
                return None;
            }
            let frame_bytes = std::mem::take(&mut self.buf);
            return Some(self.parse_frame(&frame_bytes));
        }
        if self.escaped {
            self.buf.push(b ^ ESC_XOR);
            self.escaped = false;
        } else if b == ESC {
            self.escaped = true;
        } else {
            self.buf.push(b);
        }
        None
    }

    fn parse_frame(&self, bytes: &[u8]) -> Result<DecodedFrame, HdlcError> {
        if bytes.len() < 4 {
            self.drops.fetch_add(1, Ordering::Relaxed);
            return Err(HdlcError::Truncated(bytes.len()));
        }
        let (body, fcs_bytes) = bytes.split_at(bytes.len() - 2);
        let expected = fcs16(body);
        let actual = u16::from_le_bytes([fcs_bytes[0], fcs_bytes[1]]);
        if expected != actual {
            self.drops.fetch_add(1, Ordering::Relaxed);
            return Err(HdlcError::InvalidFcs { expected, actual });
        }
        let addr = match HdlcAddress::try_from(body[0]) {
            Ok(addr) => addr,
            Err(e) => {
                self.drops.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        Ok(DecodedFrame { addr, control: body[1], payload: body[2..].to_vec() })
    }

    pub fn dropped_frames(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

/// Owns the serial sink and serializes frame writes behind a mutex so the
/// scheduler task and any other writer (the SVC interface sending an
/// unsolicited event, say) never interleave bytes of two frames.
pub struct HdlcWriter<W> {
    sink: Mutex<W>,
}

impl<W: AsyncWrite + Unpin> HdlcWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink: Mutex::new(sink) }
    }

    /// Frames `payload` under `addr`/`control` and writes it whole. Awaiting
    /// the internal mutex plus the underlying write is this bridge's stand-in
    /// for the firmware's blocking `hdlc_block_send_sync`: the caller still
    /// experiences backpressure, just cooperatively.
    pub async fn send_block(
        &self,
        payload: &[u8],
        addr: HdlcAddress,
        control: u8,
    ) -> std::io::Result<usize> {
        let mut body = Vec::with_capacity(2 + payload.len());
        body.push(addr as u8);
        body.push(control);
        body.extend_from_slice(payload);
        let fcs = fcs16(&body);
        body.extend_from_slice(&fcs.to_le_bytes());

        let mut framed = Vec::with_capacity(body.len() * 2 + 2);
        framed.push(FLAG);
        stuff(&body, &mut framed);
        framed.push(FLAG);

        let mut sink = self.sink.lock().await;
        sink.write_all(&framed).await?;
        sink.flush().await?;
        Ok(framed.len())
    }
}
