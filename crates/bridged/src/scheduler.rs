//! The bridge scheduler: a single cooperative task that, every sweep, drains
//! inbound AP traffic to its peers and drains every peer's outbound traffic
//! to the AP, then yields. Never busy-spins — `yield_now` runs exactly once
//! per full sweep regardless of how much work that sweep did.

use std::sync::Arc;

use proto::Message;
use tokio::sync::mpsc;

use crate::interfaces::ap::Ap;
use crate::interfaces::local_node;
use crate::interfaces::node::NodeManager;
use crate::interfaces::svc::{Svc, SVC_INF_ID};
use crate::interfaces::AP_INF_ID;
use crate::registry::Registry;

pub struct Scheduler<W> {
    registry: Arc<Registry>,
    svc: Arc<Svc>,
    nodes: Arc<NodeManager>,
    ap: Arc<Ap<W>>,
}

impl<W: tokio::io::AsyncWrite + Unpin> Scheduler<W> {
    pub fn new(registry: Arc<Registry>, svc: Arc<Svc>, nodes: Arc<NodeManager>, ap: Arc<Ap<W>>) -> Self {
        Self { registry, svc, nodes, ap }
    }

    /// Runs forever, processing `ap_rx` (cport-tagged messages decoded off
    /// the HDLC link) and polling every peer's inbound queue each sweep.
    pub async fn run(&self, mut ap_rx: mpsc::UnboundedReceiver<(u16, Message)>) {
        loop {
            while let Ok((ap_cport, msg)) = ap_rx.try_recv() {
                self.route_from_ap(ap_cport, msg).await;
            }

            self.drain_peers_to_ap().await;

            tokio::task::yield_now().await;
        }
    }

    async fn route_from_ap(&self, ap_cport: u16, msg: Message) {
        if ap_cport == 0 {
            self.svc.write(&msg).await;
            return;
        }

        let Some(conn) = self.registry.find_by_ap_cport(AP_INF_ID, ap_cport).await else {
            tracing::warn!(ap_cport, "no connection for inbound AP message, dropping");
            return;
        };

        if conn.peer_intf == SVC_INF_ID {
            self.svc.write(&msg).await;
        } else if conn.peer_intf == AP_INF_ID {
            if let Some(Ok(resp)) = local_node::handle(&msg) {
                let _ = self.ap.write(ap_cport, &resp).await;
            }
        } else if let Some(node) = self.find_node(conn.peer_intf).await {
            if let Err(e) = node.write(conn.peer_cport, &msg).await {
                tracing::warn!(node = conn.peer_intf, cport = conn.peer_cport, error = %e, "node write failed");
            }
        } else {
            tracing::warn!(peer_intf = conn.peer_intf, "connection references unknown node");
        }
    }

    async fn drain_peers_to_ap(&self) {
        while let Some(msg) = self.svc.read().await {
            if let Some(conn) = self.registry.connection_exists_for_peer_cport(SVC_INF_ID, 0).await {
                let _ = self.ap.write(conn.ap_cport, &msg).await;
            } else {
                // No explicit connection yet (e.g. the bootstrap VERSION
                // request) still goes out on the well-known SVC cport.
                let _ = self.ap.write(crate::interfaces::AP_SVC_CPORT_ID, &msg).await;
            }
        }

        for conn in self.registry.connections_snapshot().await {
            if conn.peer_intf == SVC_INF_ID || conn.peer_intf == AP_INF_ID {
                continue;
            }
            let Some(node) = self.find_node(conn.peer_intf).await else {
                continue;
            };
            while let Some(msg) = node.read(conn.peer_cport).await {
                let _ = self.ap.write(conn.ap_cport, &msg).await;
            }
        }
    }

    async fn find_node(&self, id: u8) -> Option<Arc<crate::interfaces::node::RemoteNode>> {
        self.nodes.find(id).await
    }
}
