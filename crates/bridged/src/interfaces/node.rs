//! Remote node transport: one TCP socket per cport, connecting to
//! `[addr]:4242+cport`, plus the node-set manager that diffs discovery
//! results against the currently bridged nodes.

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::sync::Arc;

use bytes::BytesMut;
use proto::{HeaderError, Message, OperationHeader, HEADER_SIZE};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::interfaces::svc::Svc;
use crate::interfaces::InterfaceKind;
use crate::registry::Registry;

/// Connection attempts per cport before giving up, with jittered exponential
/// backoff between them — the same `tokio-retry` pattern the teacher uses
/// around its own subprocess spawns.
const CONNECT_RETRIES: usize = 3;

/// Base TCP port a node's cport 0 listens on; cport N listens on
/// `GB_TRANSPORT_TCPIP_BASE_PORT + N`.
pub const GB_TRANSPORT_TCPIP_BASE_PORT: u16 = 4242;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cport {0} is not connected")]
    UnknownCport(u16),
    #[error("cport {0} is already connected")]
    AlreadyConnected(u16),
    #[error(transparent)]
    Header(#[from] HeaderError),
}

struct NodeSocket {
    stream: TcpStream,
    reassembly: BytesMut,
}

/// A remote peripheral node reachable at a single IPv6 address, with one TCP
/// socket per bridged cport.
pub struct RemoteNode {
    pub id: u8,
    pub addr: Ipv6Addr,
    sockets: Mutex<Vec<Option<NodeSocket>>>,
}

impl RemoteNode {
    pub fn new(id: u8, addr: Ipv6Addr, cport_count: u16) -> Self {
        let mut sockets = Vec::with_capacity(cport_count as usize);
        sockets.resize_with(cport_count as usize, || None);
        Self { id, addr, sockets: Mutex::new(sockets) }
    }

    pub async fn create_connection(&self, cport: u16) -> Result<(), NodeError> {
        let mut sockets = self.sockets.lock().await;
        let slot = sockets.get_mut(cport as usize).ok_or(NodeError::UnknownCport(cport))?;
        if slot.is_some() {
            return Err(NodeError::AlreadyConnected(cport));
        }
        let addr = self.addr;
        let port = GB_TRANSPORT_TCPIP_BASE_PORT + cport;
        let backoff = ExponentialBackoff::from_millis(50).map(jitter).take(CONNECT_RETRIES);
        let stream = Retry::spawn(backoff, || TcpStream::connect((addr, port))).await?;
        *slot = Some(NodeSocket { stream, reassembly: BytesMut::new() });
        Ok(())
    }

    pub async fn destroy_connection(&self, cport: u16) {
        if let Some(slot) = self.sockets.lock().await.get_mut(cport as usize) {
            *slot = None;
        }
    }

    /// Non-blocking read with a per-socket reassembly buffer: a short read
    /// never loses bytes and never blocks the scheduler. Returns `None` both
    /// when no complete message is available yet and when the peer closed
    /// the socket (which also tears the slot down).
    pub async fn read(&self, cport: u16) -> Option<Message> {
        let mut sockets = self.sockets.lock().await;
        let slot = sockets.get_mut(cport as usize)?;
        let sock = slot.as_mut()?;

        let mut tmp = [0u8; 4096];
        loop {
            match sock.stream.try_read(&mut tmp) {
                Ok(0) => {
                    tracing::debug!(node = self.id, cport, "node socket closed by peer");
                    *slot = None;
                    return None;
                }
                Ok(n) => sock.reassembly.extend_from_slice(&tmp[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(node = self.id, cport, error = %e, "node socket read error");
                    *slot = None;
                    return None;
                }
            }
        }

        if sock.reassembly.len() < HEADER_SIZE {
            return None;
        }
        let header = OperationHeader::decode(&sock.reassembly[..HEADER_SIZE]).ok()?;
        let total = HEADER_SIZE + header.payload_len().ok()? as usize;
        if sock.reassembly.len() < total {
            return None;
        }
        let frame = sock.reassembly.split_to(total);
        Message::from_parts(header, frame[HEADER_SIZE..].to_vec()).ok()
    }

    pub async fn write(&self, cport: u16, msg: &Message) -> Result<(), NodeError> {
        let mut sockets = self.sockets.lock().await;
        let slot = sockets.get_mut(cport as usize).ok_or(NodeError::UnknownCport(cport))?;
        let sock = slot.as_mut().ok_or(NodeError::UnknownCport(cport))?;
        sock.stream.write_all(&msg.encode()).await?;
        Ok(())
    }
}

struct Slot {
    node: Arc<RemoteNode>,
}

/// Owns the set of currently bridged remote nodes and reconciles it against
/// discovery results. Node ids are assigned `2..=max_nodes+1` (0 and 1 are
/// reserved for SVC and AP).
pub struct NodeManager {
    max_nodes: u8,
    cports_per_node: u16,
    slots: Mutex<Vec<Option<Slot>>>,
}

impl NodeManager {
    pub fn new(max_nodes: u8, cports_per_node: u16) -> Self {
        let mut slots = Vec::with_capacity(max_nodes as usize);
        slots.resize_with(max_nodes as usize, || None);
        Self { max_nodes, cports_per_node, slots: Mutex::new(slots) }
    }

    pub async fn nodes(&self) -> Vec<Arc<RemoteNode>> {
        self.slots.lock().await.iter().filter_map(|s| s.as_ref().map(|s| s.node.clone())).collect()
    }

    /// Looks up a currently bridged node by interface id.
    pub async fn find(&self, id: u8) -> Option<Arc<RemoteNode>> {
        self.slots.lock().await.iter().find_map(|s| match s {
            Some(s) if s.node.id == id => Some(s.node.clone()),
            _ => None,
        })
    }

    /// Reconciles the active address set against `active`: nodes no longer
    /// present are announced removed (before being torn down), nodes newly
    /// present are created first and announced inserted afterward. Mirrors
    /// `node_filter`'s semantics from the original firmware.
    pub async fn filter(&self, active: &[Ipv6Addr], registry: &Registry, svc: &Svc) {
        let active: HashSet<Ipv6Addr> = active.iter().copied().collect();

        let mut slots = self.slots.lock().await;
        let current: HashSet<Ipv6Addr> =
            slots.iter().filter_map(|s| s.as_ref().map(|s| s.node.addr)).collect();

        let removed: Vec<Ipv6Addr> = current.difference(&active).copied().collect();
        let added: Vec<Ipv6Addr> = active.difference(&current).copied().collect();

        for addr in removed {
            if let Some(idx) = slots.iter().position(|s| matches!(s, Some(s) if s.node.addr == addr)) {
                let id = slots[idx].as_ref().unwrap().node.id;
                svc.send_module_removed(id).await;
                let _ = registry.unregister(id).await;
                slots[idx] = None;
            }
        }

        for addr in added {
            let Some(idx) = slots.iter().position(|s| s.is_none()) else {
                tracing::warn!(%addr, max_nodes = self.max_nodes, "no free node slot for discovered peer");
                continue;
            };
            let id = idx as u8 + 2;
            let node = Arc::new(RemoteNode::new(id, addr, self.cports_per_node));
            if registry.register(id, InterfaceKind::RemoteNode).await.is_err() {
                continue;
            }
            slots[idx] = Some(Slot { node });
            svc.send_module_inserted(id, 1, 0).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::AP_INF_ID;
    use crate::interfaces::svc::SVC_INF_ID;
    use crate::interfaces::InterfaceKind;

    async fn setup() -> (Arc<Registry>, Svc, NodeManager) {
        let registry = Arc::new(Registry::new());
        registry.register(AP_INF_ID, InterfaceKind::Ap).await.unwrap();
        registry.register(SVC_INF_ID, InterfaceKind::Svc).await.unwrap();
        let svc = Svc::new(registry.clone(), Arc::new(NodeManager::new(4, 2)));
        let manager = NodeManager::new(4, 2);
        (registry, svc, manager)
    }

    #[tokio::test]
    async fn filter_adds_then_announces_inserted() {
        let (registry, svc, manager) = setup().await;
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        manager.filter(&[addr], &registry, &svc).await;

        let nodes = manager.nodes().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].addr, addr);

        let announced = svc.read().await.expect("module inserted event enqueued");
        assert_eq!(
            announced.header.request_type(),
            proto::svc::SvcType::ModuleInserted as u8
        );
    }

    #[tokio::test]
    async fn filter_removes_and_announces_before_destroying() {
        let (registry, svc, manager) = setup().await;
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        manager.filter(&[addr], &registry, &svc).await;
        svc.read().await; // drain the insertion event

        manager.filter(&[], &registry, &svc).await;
        assert!(manager.nodes().await.is_empty());

        let announced = svc.read().await.expect("module removed event enqueued");
        assert_eq!(
            announced.header.request_type(),
            proto::svc::SvcType::ModuleRemoved as u8
        );
    }

    #[tokio::test]
    async fn slots_are_reused_after_removal() {
        let (registry, svc, manager) = setup().await;
        let a: Ipv6Addr = "fe80::1".parse().unwrap();
        let b: Ipv6Addr = "fe80::2".parse().unwrap();
        manager.filter(&[a], &registry, &svc).await;
        let first_id = manager.nodes().await[0].id;
        manager.filter(&[b], &registry, &svc).await;
        let second_id = manager.nodes().await[0].id;
        assert_eq!(first_id, second_id);
    }
}
