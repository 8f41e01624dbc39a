//! Wire payloads and opcodes for the SVC (Supervisory Controller) dialect of
//! Greybus. Opcode values are an internal, self-consistent assignment for
//! this bridge and its host counterpart — the spec does not mandate byte-
//! exact compatibility with any particular upstream Greybus numbering, only
//! that requests and their responses share the same opcode with the
//! response flag set (see [`crate::header`]).

use std::net::Ipv6Addr;

/// SVC operation opcode (request side; a response carries the same value
/// with [`crate::header::TYPE_RESPONSE_FLAG`] set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SvcType {
    ProtocolVersion = 0x01,
    Hello = 0x02,
    IntfDeviceId = 0x03,
    RouteCreate = 0x04,
    RouteDestroy = 0x05,
    Ping = 0x06,
    ConnCreate = 0x07,
    ConnDestroy = 0x08,
    DmePeerGet = 0x09,
    DmePeerSet = 0x0a,
    IntfSetPwrm = 0x0b,
    IntfVsysEnable = 0x0c,
    IntfVsysDisable = 0x0d,
    IntfRefclkEnable = 0x0e,
    IntfRefclkDisable = 0x0f,
    IntfUniproEnable = 0x10,
    IntfUniproDisable = 0x11,
    IntfActivate = 0x12,
    IntfResume = 0x13,
    PwrmonRailCountGet = 0x14,
    ModuleInserted = 0x15,
    ModuleRemoved = 0x16,
}

impl TryFrom<u8> for SvcType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        use SvcType::*;
        Ok(match v {
            0x01 => ProtocolVersion,
            0x02 => Hello,
            0x03 => IntfDeviceId,
            0x04 => RouteCreate,
            0x05 => RouteDestroy,
            0x06 => Ping,
            0x07 => ConnCreate,
            0x08 => ConnDestroy,
            0x09 => DmePeerGet,
            0x0a => DmePeerSet,
            0x0b => IntfSetPwrm,
            0x0c => IntfVsysEnable,
            0x0d => IntfVsysDisable,
            0x0e => IntfRefclkEnable,
            0x0f => IntfRefclkDisable,
            0x10 => IntfUniproEnable,
            0x11 => IntfUniproDisable,
            0x12 => IntfActivate,
            0x13 => IntfResume,
            0x14 => PwrmonRailCountGet,
            0x15 => ModuleInserted,
            0x16 => ModuleRemoved,
            other => return Err(other),
        })
    }
}

/// Generic Greybus header status codes (distinct from the per-payload
/// `result_code` fields some SVC responses carry).
pub const GB_SVC_OP_SUCCESS: u8 = 0x00;
pub const GB_SVC_OP_UNKNOWN_ERROR: u8 = 0x01;

/// UniPro power mode value meaning "hibernate" in `intf_set_pwrm` requests.
pub const UNIPRO_HIBERNATE_MODE: u8 = 0x07;

pub const PWR_OK: u8 = 0x00;
pub const PWR_LOCAL: u8 = 0x01;

pub const VSYS_OK: u8 = 0x00;
pub const REFCLK_OK: u8 = 0x00;
pub const UNIPRO_OK: u8 = 0x00;
pub const INTF_TYPE_GREYBUS: u8 = 0x01;

pub const ENDO_ID: u16 = 0x4755;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SvcPayloadError {
    #[error("payload of {0} bytes is too short for this message")]
    Truncated(usize),
}

fn require(buf: &[u8], n: usize) -> Result<(), SvcPayloadError> {
    if buf.len() < n {
        Err(SvcPayloadError::Truncated(buf.len()))
    } else {
        Ok(())
    }
}

/// `SVC_TYPE_PROTOCOL_VERSION` request/response payload: `{major, minor}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPayload {
    pub major: u8,
    pub minor: u8,
}

impl VersionPayload {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.major, self.minor]
    }

    pub fn decode(buf: &[u8]) -> Result<Self, SvcPayloadError> {
        require(buf, 2)?;
        Ok(Self { major: buf[0], minor: buf[1] })
    }
}

/// `SVC_TYPE_HELLO` request payload: `{endo_id, interface_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloRequest {
    pub endo_id: u16,
    pub interface_id: u8,
}

impl HelloRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3);
        buf.extend_from_slice(&self.endo_id.to_le_bytes());
        buf.push(self.interface_id);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, SvcPayloadError> {
        require(buf, 3)?;
        Ok(Self {
            endo_id: u16::from_le_bytes([buf[0], buf[1]]),
            interface_id: buf[2],
        })
    }
}

/// `SVC_TYPE_MODULE_INSERTED` request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleInsertedRequest {
    pub primary_intf_id: u8,
    pub intf_count: u8,
    pub flags: u16,
}

impl ModuleInsertedRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        buf.push(self.primary_intf_id);
        buf.push(self.intf_count);
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, SvcPayloadError> {
        require(buf, 4)?;
        Ok(Self {
            primary_intf_id: buf[0],
            intf_count: buf[1],
            flags: u16::from_le_bytes([buf[2], buf[3]]),
        })
    }
}

/// `SVC_TYPE_MODULE_REMOVED` request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleRemovedRequest {
    pub primary_intf_id: u8,
}

impl ModuleRemovedRequest {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.primary_intf_id]
    }

    pub fn decode(buf: &[u8]) -> Result<Self, SvcPayloadError> {
        require(buf, 1)?;
        Ok(Self { primary_intf_id: buf[0] })
    }
}

/// `SVC_TYPE_CONN_CREATE`/`SVC_TYPE_CONN_DESTROY` request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnRequest {
    pub intf1_id: u8,
    pub cport1_id: u16,
    pub intf2_id: u8,
    pub cport2_id: u16,
}

impl ConnRequest {
    pub fn decode(buf: &[u8]) -> Result<Self, SvcPayloadError> {
        require(buf, 6)?;
        Ok(Self {
            intf1_id: buf[0],
            cport1_id: u16::from_le_bytes([buf[1], buf[2]]),
            intf2_id: buf[3],
            cport2_id: u16::from_le_bytes([buf[4], buf[5]]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6);
        buf.push(self.intf1_id);
        buf.extend_from_slice(&self.cport1_id.to_le_bytes());
        buf.push(self.intf2_id);
        buf.extend_from_slice(&self.cport2_id.to_le_bytes());
        buf
    }
}

/// `SVC_TYPE_DME_PEER_GET` response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmePeerGetResponse {
    pub result_code: u16,
    pub attr_value: u32,
}

impl DmePeerGetResponse {
    pub const STOCK: Self = Self { result_code: 0, attr_value: 0x0126 };

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6);
        buf.extend_from_slice(&self.result_code.to_le_bytes());
        buf.extend_from_slice(&self.attr_value.to_le_bytes());
        buf
    }
}

/// `SVC_TYPE_DME_PEER_SET` response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmePeerSetResponse {
    pub result_code: u16,
}

impl DmePeerSetResponse {
    pub const STOCK: Self = Self { result_code: 0 };

    pub fn encode(&self) -> Vec<u8> {
        self.result_code.to_le_bytes().to_vec()
    }
}

/// `SVC_TYPE_INTF_SET_PWRM` request payload. Only the two mode fields this
/// bridge inspects are parsed out; the rest of the wire layout is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntfSetPwrmRequest {
    pub intf_id: u8,
    pub tx_mode: u8,
    pub rx_mode: u8,
}

impl IntfSetPwrmRequest {
    /// Offsets within the full request chosen to match a plausible UniPro
    /// power-mode descriptor layout: `intf_id, hs_series, tx_mode, ...,
    /// rx_mode, ...`.
    pub fn decode(buf: &[u8]) -> Result<Self, SvcPayloadError> {
        require(buf, 8)?;
        Ok(Self { intf_id: buf[0], tx_mode: buf[2], rx_mode: buf[7] })
    }
}

/// `SVC_TYPE_INTF_SET_PWRM` response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntfSetPwrmResponse {
    pub result_code: u8,
}

impl IntfSetPwrmResponse {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.result_code]
    }
}

/// Stock single-byte `result_code` response shared by
/// `INTF_VSYS_{ENABLE,DISABLE}`, `INTF_REFCLK_{ENABLE,DISABLE}`, and
/// `INTF_UNIPRO_{ENABLE,DISABLE}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCodeResponse {
    pub result_code: u8,
}

impl ResultCodeResponse {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.result_code]
    }
}

/// `SVC_TYPE_INTF_ACTIVATE` response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntfActivateResponse {
    pub status: u8,
    pub intf_type: u8,
}

impl IntfActivateResponse {
    pub const STOCK: Self = Self { status: GB_SVC_OP_SUCCESS, intf_type: INTF_TYPE_GREYBUS };

    pub fn encode(&self) -> Vec<u8> {
        vec![self.status, self.intf_type]
    }
}

/// `SVC_TYPE_INTF_RESUME` response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntfResumeResponse {
    pub status: u8,
}

impl IntfResumeResponse {
    pub const STOCK: Self = Self { status: INTF_TYPE_GREYBUS };

    pub fn encode(&self) -> Vec<u8> {
        vec![self.status]
    }
}

/// `SVC_TYPE_PWRMON_RAIL_COUNT_GET` response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwrmonRailCountResponse {
    pub rail_count: u8,
}

impl PwrmonRailCountResponse {
    pub const STOCK: Self = Self { rail_count: 0 };

    pub fn encode(&self) -> Vec<u8> {
        vec![self.rail_count]
    }
}

/// Parses a comma-separated list of IPv6 literal addresses, as used both for
/// the static node configuration string and for aggregating mDNS answers.
pub fn parse_ipv6_list(s: &str) -> Vec<Ipv6Addr> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trip() {
        let v = VersionPayload { major: 2, minor: 0 };
        assert_eq!(VersionPayload::decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn hello_round_trip() {
        let h = HelloRequest { endo_id: ENDO_ID, interface_id: 1 };
        assert_eq!(HelloRequest::decode(&h.encode()).unwrap(), h);
    }

    #[test]
    fn pwrm_hibernate_detection() {
        let mut buf = vec![0u8; 8];
        buf[0] = 5; // intf_id
        buf[2] = UNIPRO_HIBERNATE_MODE; // tx_mode
        buf[7] = UNIPRO_HIBERNATE_MODE; // rx_mode
        let req = IntfSetPwrmRequest::decode(&buf).unwrap();
        assert_eq!(req.tx_mode, UNIPRO_HIBERNATE_MODE);
        assert_eq!(req.rx_mode, UNIPRO_HIBERNATE_MODE);
    }

    #[test]
    fn parse_ipv6_list_skips_blanks() {
        let addrs = parse_ipv6_list("fe80::1, , fe80::2");
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn svc_type_round_trip() {
        assert_eq!(SvcType::try_from(0x07).unwrap(), SvcType::ConnCreate);
        assert!(SvcType::try_from(0xff).is_err());
    }
}
