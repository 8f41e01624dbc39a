//! SVC (Supervisory Controller) interface (id 0): the version/hello
//! handshake state machine and the rest of the SVC protocol dispatch,
//! grounded in `examples/original_source/src/svc.c`.

use std::sync::Arc;

use proto::svc::{
    ConnRequest, DmePeerGetResponse, DmePeerSetResponse, HelloRequest, IntfActivateResponse,
    IntfResumeResponse, IntfSetPwrmRequest, IntfSetPwrmResponse, ModuleInsertedRequest,
    ModuleRemovedRequest, PwrmonRailCountResponse, ResultCodeResponse, SvcType, VersionPayload,
    ENDO_ID, PWR_LOCAL, PWR_OK, REFCLK_OK, UNIPRO_OK, VSYS_OK,
};
use proto::Message;
use tokio::sync::{mpsc, Mutex};

use crate::error::{GB_OP_SUCCESS, GB_OP_UNKNOWN_ERROR};
use crate::interfaces::node::NodeManager;
use crate::interfaces::AP_INF_ID;
use crate::registry::{Registry, RegistryError};

pub const SVC_INF_ID: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SvcState {
    Init,
    WaitVersionResp,
    WaitHelloResp,
    Ready,
}

/// The SVC interface. Outbound messages (the version/hello handshake,
/// responses to AP requests, module-inserted/removed events) are pushed onto
/// an internal FIFO standing in for the firmware's `k_fifo`; the scheduler
/// drains it the same way it drains a remote node's socket.
pub struct Svc {
    state: Mutex<SvcState>,
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    registry: Arc<Registry>,
    nodes: Arc<NodeManager>,
}

impl Svc {
    pub fn new(registry: Arc<Registry>, nodes: Arc<NodeManager>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { state: Mutex::new(SvcState::Init), tx, rx: Mutex::new(rx), registry, nodes }
    }

    pub async fn is_ready(&self) -> bool {
        matches!(*self.state.lock().await, SvcState::Ready)
    }

    /// Non-blocking read, matching the scheduler's "never blocks" contract.
    pub async fn read(&self) -> Option<Message> {
        self.rx.lock().await.try_recv().ok()
    }

    fn enqueue(&self, msg: Message) {
        // The receiver is only ever dropped along with `self`, so this can't
        // fail in practice; ignore the error rather than panic on shutdown
        // races.
        let _ = self.tx.send(msg);
    }

    /// Sends the initial `PROTOCOL_VERSION` request. Called once at start-up.
    pub async fn start(&self) {
        self.send_version().await;
    }

    async fn send_version(&self) {
        let payload = VersionPayload { major: 0, minor: 1 }.encode();
        let msg = Message::request(payload, SvcType::ProtocolVersion as u8, false).unwrap();
        *self.state.lock().await = SvcState::WaitVersionResp;
        self.enqueue(msg);
    }

    async fn send_hello(&self, interface_id: u8) {
        let payload = HelloRequest { endo_id: ENDO_ID, interface_id }.encode();
        let msg = Message::request(payload, SvcType::Hello as u8, false).unwrap();
        *self.state.lock().await = SvcState::WaitHelloResp;
        self.enqueue(msg);
    }

    pub async fn send_module_inserted(&self, primary_intf_id: u8, intf_count: u8, flags: u16) {
        let payload = ModuleInsertedRequest { primary_intf_id, intf_count, flags }.encode();
        self.enqueue(Message::request(payload, SvcType::ModuleInserted as u8, false).unwrap());
    }

    pub async fn send_module_removed(&self, primary_intf_id: u8) {
        let payload = ModuleRemovedRequest { primary_intf_id }.encode();
        self.enqueue(Message::request(payload, SvcType::ModuleRemoved as u8, false).unwrap());
    }

    /// Handles one incoming message addressed to the SVC cport. A reply, if
    /// any, is pushed onto the outbound FIFO rather than returned directly,
    /// matching the other interfaces' write-then-drain shape.
    pub async fn write(&self, msg: &Message) {
        if msg.is_response() {
            self.handle_response(msg).await;
        } else {
            self.handle_request(msg).await;
        }
    }

    async fn handle_response(&self, msg: &Message) {
        let Ok(svc_type) = SvcType::try_from(msg.header.request_type()) else {
            tracing::warn!(id = msg.header.id, "SVC response with unrecognized opcode");
            return;
        };
        match svc_type {
            SvcType::ProtocolVersion => {
                self.send_hello(AP_INF_ID).await;
            }
            SvcType::Hello => {
                *self.state.lock().await = SvcState::Ready;
            }
            SvcType::ModuleInserted | SvcType::ModuleRemoved => {
                tracing::debug!(id = msg.header.id, "module hotplug event acknowledged");
            }
            other => {
                tracing::warn!(?other, "unexpected SVC response");
            }
        }
    }

    async fn handle_request(&self, msg: &Message) {
        let Ok(svc_type) = SvcType::try_from(msg.header.request_type()) else {
            tracing::warn!(
                request_type = format!("{:#x}", msg.header.request_type()),
                "unrecognized SVC request"
            );
            return;
        };

        let reply = match svc_type {
            SvcType::IntfDeviceId | SvcType::RouteCreate | SvcType::RouteDestroy | SvcType::Ping => {
                Some((vec![], GB_OP_SUCCESS))
            }
            SvcType::ConnCreate => {
                let Ok(req) = ConnRequest::decode(&msg.payload) else {
                    return;
                };
                let status = match self.create_connection(req).await {
                    Ok(()) => GB_OP_SUCCESS,
                    Err(_) => GB_OP_UNKNOWN_ERROR,
                };
                Some((vec![], status))
            }
            SvcType::ConnDestroy => {
                let Ok(req) = ConnRequest::decode(&msg.payload) else {
                    return;
                };
                self.destroy_connection(req).await;
                Some((vec![], GB_OP_SUCCESS))
            }
            SvcType::DmePeerGet => Some((DmePeerGetResponse::STOCK.encode(), GB_OP_SUCCESS)),
            SvcType::DmePeerSet => Some((DmePeerSetResponse::STOCK.encode(), GB_OP_SUCCESS)),
            SvcType::IntfSetPwrm => {
                let Ok(req) = IntfSetPwrmRequest::decode(&msg.payload) else {
                    return;
                };
                let result_code = if req.tx_mode == proto::svc::UNIPRO_HIBERNATE_MODE
                    && req.rx_mode == proto::svc::UNIPRO_HIBERNATE_MODE
                {
                    PWR_OK
                } else {
                    PWR_LOCAL
                };
                Some((IntfSetPwrmResponse { result_code }.encode(), GB_OP_SUCCESS))
            }
            SvcType::IntfVsysEnable | SvcType::IntfVsysDisable => {
                Some((ResultCodeResponse { result_code: VSYS_OK }.encode(), GB_OP_SUCCESS))
            }
            SvcType::IntfRefclkEnable | SvcType::IntfRefclkDisable => {
                Some((ResultCodeResponse { result_code: REFCLK_OK }.encode(), GB_OP_SUCCESS))
            }
            SvcType::IntfUniproEnable | SvcType::IntfUniproDisable => {
                Some((ResultCodeResponse { result_code: UNIPRO_OK }.encode(), GB_OP_SUCCESS))
            }
            SvcType::IntfActivate => Some((IntfActivateResponse::STOCK.encode(), GB_OP_SUCCESS)),
            SvcType::IntfResume => Some((IntfResumeResponse::STOCK.encode(), GB_OP_SUCCESS)),
            SvcType::PwrmonRailCountGet => {
                Some((PwrmonRailCountResponse::STOCK.encode(), GB_OP_SUCCESS))
            }
            SvcType::ProtocolVersion | SvcType::Hello => {
                tracing::warn!(?svc_type, "SVC only originates version negotiation; ignoring stray request");
                None
            }
            SvcType::ModuleInserted | SvcType::ModuleRemoved => None,
        };

        if let Some((payload, status)) = reply {
            let resp =
                Message::response(payload, msg.header.request_type(), msg.header.id, status).unwrap();
            self.enqueue(resp);
        }
    }

    /// Rejects creating a second connection to SVC cport 0 while SVC is
    /// already ready, per `svc_inf_create_connection` in the original.
    ///
    /// Beyond the registry bookkeeping, this invokes `create_connection` on
    /// both sides of the pair: the AP interface has no per-cport state of
    /// its own, so that call is trivial, but a `RemoteNode` peer opens the
    /// backing TCP socket here. If the peer side fails, nothing is
    /// registered; if the registry insert then fails (duplicate pair), the
    /// peer socket that was just opened is torn down again.
    async fn create_connection(&self, req: ConnRequest) -> Result<(), RegistryError> {
        let touches_svc_cport0 = (req.intf1_id == SVC_INF_ID && req.cport1_id == 0)
            || (req.intf2_id == SVC_INF_ID && req.cport2_id == 0);

        if touches_svc_cport0 {
            let existing = self.registry.connection_exists_for_peer_cport(SVC_INF_ID, 0).await;
            if existing.is_some() && self.is_ready().await {
                return Err(RegistryError::ConnectionAlreadyExists {
                    ap_intf: req.intf1_id,
                    ap_cport: req.cport1_id,
                    peer_intf: req.intf2_id,
                    peer_cport: req.cport2_id,
                });
            }
        }

        let (ap_intf, ap_cport, peer_intf, peer_cport) = if req.intf1_id == AP_INF_ID {
            (req.intf1_id, req.cport1_id, req.intf2_id, req.cport2_id)
        } else {
            (req.intf2_id, req.cport2_id, req.intf1_id, req.cport1_id)
        };

        if let Some(node) = self.nodes.find(peer_intf).await {
            if node.create_connection(peer_cport).await.is_err() {
                return Err(RegistryError::PeerConnectFailed(peer_intf, peer_cport));
            }
        }

        if let Err(e) = self.registry.create_connection(ap_intf, ap_cport, peer_intf, peer_cport).await {
            if let Some(node) = self.nodes.find(peer_intf).await {
                node.destroy_connection(peer_cport).await;
            }
            return Err(e);
        }

        Ok(())
    }

    async fn destroy_connection(&self, req: ConnRequest) {
        let (ap_intf, ap_cport, peer_intf, peer_cport) = if req.intf1_id == AP_INF_ID {
            (req.intf1_id, req.cport1_id, req.intf2_id, req.cport2_id)
        } else {
            (req.intf2_id, req.cport2_id, req.intf1_id, req.cport1_id)
        };
        self.registry.destroy_connection(ap_intf, ap_cport, peer_intf, peer_cport).await;

        if let Some(node) = self.nodes.find(peer_intf).await {
            node.destroy_connection(peer_cport).await;
        }

        if peer_intf == SVC_INF_ID && peer_cport == 0 {
            *self.state.lock().await = SvcState::Init;
            let mut rx = self.rx.lock().await;
            while rx.try_recv().is_ok() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::InterfaceKind;

    async fn ready_registry() -> Arc<Registry> {
        let reg = Arc::new(Registry::new());
        reg.register(AP_INF_ID, InterfaceKind::Ap).await.unwrap();
        reg.register(SVC_INF_ID, InterfaceKind::Svc).await.unwrap();
        reg
    }

    fn empty_nodes() -> Arc<NodeManager> {
        Arc::new(NodeManager::new(4, 2))
    }

    #[tokio::test]
    async fn handshake_reaches_ready() {
        let svc = Svc::new(ready_registry().await, empty_nodes());
        svc.start().await;
        let version_req = svc.read().await.expect("version request enqueued");
        assert_eq!(version_req.header.request_type(), SvcType::ProtocolVersion as u8);

        let version_resp =
            Message::response(vec![0, 1], SvcType::ProtocolVersion as u8, version_req.header.id, 0)
                .unwrap();
        svc.write(&version_resp).await;
        assert!(!svc.is_ready().await);

        let hello_req = svc.read().await.expect("hello request enqueued");
        assert_eq!(hello_req.header.request_type(), SvcType::Hello as u8);

        let hello_resp =
            Message::response(vec![], SvcType::Hello as u8, hello_req.header.id, 0).unwrap();
        svc.write(&hello_resp).await;
        assert!(svc.is_ready().await);
    }

    #[tokio::test]
    async fn pwrm_hibernate_gives_pwr_ok() {
        let svc = Svc::new(ready_registry().await, empty_nodes());
        let mut payload = vec![0u8; 8];
        payload[2] = proto::svc::UNIPRO_HIBERNATE_MODE;
        payload[7] = proto::svc::UNIPRO_HIBERNATE_MODE;
        let req = Message::request(payload, SvcType::IntfSetPwrm as u8, false).unwrap();
        svc.write(&req).await;
        let resp = svc.read().await.unwrap();
        assert_eq!(resp.payload, vec![PWR_OK]);
    }

    #[tokio::test]
    async fn pwrm_non_hibernate_gives_pwr_local() {
        let svc = Svc::new(ready_registry().await, empty_nodes());
        let payload = vec![0u8; 8];
        let req = Message::request(payload, SvcType::IntfSetPwrm as u8, false).unwrap();
        svc.write(&req).await;
        let resp = svc.read().await.unwrap();
        assert_eq!(resp.payload, vec![PWR_LOCAL]);
    }

    #[tokio::test]
    async fn empty_success_requests() {
        let svc = Svc::new(ready_registry().await, empty_nodes());
        for t in [SvcType::IntfDeviceId, SvcType::RouteCreate, SvcType::RouteDestroy, SvcType::Ping] {
            let req = Message::request(vec![], t as u8, false).unwrap();
            svc.write(&req).await;
            let resp = svc.read().await.unwrap();
            assert!(resp.payload.is_empty());
            assert_eq!(resp.header.status, GB_OP_SUCCESS);
        }
    }

    #[tokio::test]
    async fn second_cport0_connection_rejected_once_ready() {
        let registry = ready_registry().await;
        let svc = Svc::new(registry.clone(), empty_nodes());
        registry.create_connection(AP_INF_ID, 0, SVC_INF_ID, 0).await.unwrap();
        *svc.state.lock().await = SvcState::Ready;

        let req = ConnRequest { intf1_id: AP_INF_ID, cport1_id: 0, intf2_id: SVC_INF_ID, cport2_id: 0 };
        let msg = Message::request(req.encode(), SvcType::ConnCreate as u8, false).unwrap();
        svc.write(&msg).await;
        let resp = svc.read().await.unwrap();
        assert_eq!(resp.header.status, GB_OP_UNKNOWN_ERROR);
    }

    /// CONN_CREATE to a remote node must actually open the node's TCP
    /// socket, and CONN_DESTROY must close it again.
    #[tokio::test]
    async fn conn_create_opens_node_socket_and_destroy_closes_it() {
        let registry = ready_registry().await;
        let nodes = empty_nodes();

        // Discover one node via the node manager so it gets a real id and a
        // registry entry, without involving the `Svc` under test.
        let bootstrap = Svc::new(registry.clone(), empty_nodes());
        nodes.filter(&["::1".parse().unwrap()], &registry, &bootstrap).await;
        let node = nodes.nodes().await.into_iter().next().unwrap();
        let node_id = node.id;

        let svc = Svc::new(registry.clone(), nodes);

        let cport = 7u16;
        let port = crate::interfaces::node::GB_TRANSPORT_TCPIP_BASE_PORT + cport;
        let listener = tokio::net::TcpListener::bind(("::1", port)).await.unwrap();

        let req = ConnRequest { intf1_id: AP_INF_ID, cport1_id: 3, intf2_id: node_id, cport2_id: cport };
        let msg = Message::request(req.encode(), SvcType::ConnCreate as u8, false).unwrap();
        let (_, accept_result) = tokio::join!(svc.write(&msg), listener.accept());
        accept_result.unwrap();
        let resp = svc.read().await.unwrap();
        assert_eq!(resp.header.status, GB_OP_SUCCESS);

        let destroy =
            ConnRequest { intf1_id: AP_INF_ID, cport1_id: 3, intf2_id: node_id, cport2_id: cport };
        let msg = Message::request(destroy.encode(), SvcType::ConnDestroy as u8, false).unwrap();
        svc.write(&msg).await;

        let probe = Message::request(vec![], 0x01, false).unwrap();
        assert!(node.write(cport, &probe).await.is_err());
    }
}
