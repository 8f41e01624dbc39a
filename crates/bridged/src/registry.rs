//! Interface registry and connection table: which interfaces exist, and
//! which cport pairs are bridged between them. One mutex covers both tables
//! since connection creation/destruction must touch them atomically.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::interfaces::InterfaceKind;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("interface {0} is already registered")]
    AlreadyExists(u8),
    #[error("duplicate interface id {0}")]
    DuplicateId(u8),
    #[error("unknown interface {0}")]
    UnknownInterface(u8),
    #[error("connection {ap_intf}:{ap_cport} <-> {peer_intf}:{peer_cport} already exists")]
    ConnectionAlreadyExists { ap_intf: u8, ap_cport: u16, peer_intf: u8, peer_cport: u16 },
    #[error("peer interface {0} rejected create_connection for cport {1}")]
    PeerConnectFailed(u8, u16),
}

#[derive(Debug, Clone)]
pub struct Interface {
    pub id: u8,
    pub kind: InterfaceKind,
}

/// A bridged cport pair, stored by value (not by reference) so interfaces
/// can be looked up independently of any connection that mentions them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub ap_intf: u8,
    pub ap_cport: u16,
    pub peer_intf: u8,
    pub peer_cport: u16,
}

#[derive(Default)]
struct RegistryState {
    interfaces: HashMap<u8, Interface>,
    connections: Vec<Connection>,
}

#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self { state: Mutex::new(RegistryState::default()) }
    }

    pub async fn register(&self, id: u8, kind: InterfaceKind) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        if state.interfaces.contains_key(&id) {
            return Err(RegistryError::AlreadyExists(id));
        }
        state.interfaces.insert(id, Interface { id, kind });
        Ok(())
    }

    pub async fn unregister(&self, id: u8) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        if state.interfaces.remove(&id).is_none() {
            return Err(RegistryError::UnknownInterface(id));
        }
        state.connections.retain(|c| c.ap_intf != id && c.peer_intf != id);
        Ok(())
    }

    pub async fn lookup(&self, id: u8) -> Option<Interface> {
        self.state.lock().await.interfaces.get(&id).cloned()
    }

    /// Inserts a connection's table entry, rolling back if either interface
    /// turns out not to be registered. The per-interface `create_connection`
    /// capability dispatch (opening a remote node's socket, say) happens in
    /// the caller — see `interfaces::svc::Svc::create_connection` — since
    /// this table has no knowledge of concrete interface behavior.
    pub async fn create_connection(
        &self,
        ap_intf: u8,
        ap_cport: u16,
        peer_intf: u8,
        peer_cport: u16,
    ) -> Result<Connection, RegistryError> {
        let mut state = self.state.lock().await;
        if !state.interfaces.contains_key(&ap_intf) {
            return Err(RegistryError::UnknownInterface(ap_intf));
        }
        if !state.interfaces.contains_key(&peer_intf) {
            return Err(RegistryError::UnknownInterface(peer_intf));
        }
        let conn = Connection { ap_intf, ap_cport, peer_intf, peer_cport };
        if state.connections.iter().any(|c| *c == conn) {
            return Err(RegistryError::ConnectionAlreadyExists {
                ap_intf,
                ap_cport,
                peer_intf,
                peer_cport,
            });
        }
        state.connections.push(conn);
        Ok(conn)
    }

    pub async fn destroy_connection(
        &self,
        ap_intf: u8,
        ap_cport: u16,
        peer_intf: u8,
        peer_cport: u16,
    ) -> bool {
        let mut state = self.state.lock().await;
        let before = state.connections.len();
        state
            .connections
            .retain(|c| !(c.ap_intf == ap_intf && c.ap_cport == ap_cport && c.peer_intf == peer_intf && c.peer_cport == peer_cport));
        state.connections.len() != before
    }

    /// Snapshot of the current connection table, safe to iterate without
    /// holding the registry lock across scheduler work.
    pub async fn connections_snapshot(&self) -> Vec<Connection> {
        self.state.lock().await.connections.clone()
    }

    pub async fn find_by_ap_cport(&self, ap_intf: u8, ap_cport: u16) -> Option<Connection> {
        self.state
            .lock()
            .await
            .connections
            .iter()
            .find(|c| c.ap_intf == ap_intf && c.ap_cport == ap_cport)
            .copied()
    }

    pub async fn connection_exists_for_peer_cport(&self, peer_intf: u8, peer_cport: u16) -> Option<Connection> {
        self.state
            .lock()
            .await
            .connections
            .iter()
            .find(|c| c.peer_intf == peer_intf && c.peer_cport == peer_cport)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_register_is_rejected() {
        let reg = Registry::new();
        reg.register(1, InterfaceKind::Ap).await.unwrap();
        assert_eq!(reg.register(1, InterfaceKind::Ap).await, Err(RegistryError::AlreadyExists(1)));
    }

    #[tokio::test]
    async fn create_connection_requires_both_interfaces() {
        let reg = Registry::new();
        reg.register(1, InterfaceKind::Ap).await.unwrap();
        let err = reg.create_connection(1, 0, 2, 0).await.unwrap_err();
        assert_eq!(err, RegistryError::UnknownInterface(2));
        assert!(reg.connections_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_connection_rejected() {
        let reg = Registry::new();
        reg.register(1, InterfaceKind::Ap).await.unwrap();
        reg.register(2, InterfaceKind::RemoteNode).await.unwrap();
        reg.create_connection(1, 0, 2, 0).await.unwrap();
        assert!(reg.create_connection(1, 0, 2, 0).await.is_err());
        assert_eq!(reg.connections_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn unregister_drops_its_connections() {
        let reg = Registry::new();
        reg.register(1, InterfaceKind::Ap).await.unwrap();
        reg.register(2, InterfaceKind::RemoteNode).await.unwrap();
        reg.create_connection(1, 0, 2, 0).await.unwrap();
        reg.unregister(2).await.unwrap();
        assert!(reg.connections_snapshot().await.is_empty());
    }
}
