//! Node discovery: a one-shot static IPv6 list plus periodic mDNS browsing
//! for `_greybus._tcp.local`, grounded in
//! `examples/original_source/src/tcp_discovery.c`. The re-arm rules there
//! were written for Zephyr's callback-driven `dns_resolve_service`; this
//! port's closest analogue with `mdns-sd`'s continuous browse channel is:
//! `SearchStopped` (ALLDONE/CANCELED) re-arms the browse and applies
//! whatever addresses were accumulated, a channel disconnect (FAIL) is
//! logged without re-arming until the next scheduled tick, and any other
//! event just keeps accumulating addresses.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent};

use crate::interfaces::node::NodeManager;
use crate::interfaces::svc::Svc;
use crate::registry::Registry;

const SERVICE_TYPE: &str = "_greybus._tcp.local.";

/// Applies the static node list once at start-up.
pub async fn apply_static(addrs: &[Ipv6Addr], registry: &Registry, svc: &Svc, nodes: &NodeManager) {
    if addrs.is_empty() {
        return;
    }
    tracing::info!(count = addrs.len(), "applying static node list");
    nodes.filter(addrs, registry, svc).await;
}

/// Runs the periodic mDNS discovery loop until the browse channel closes.
pub async fn run_mdns(
    interval: Duration,
    registry: Arc<Registry>,
    svc: Arc<Svc>,
    nodes: Arc<NodeManager>,
) -> Result<(), mdns_sd::Error> {
    let daemon = ServiceDaemon::new()?;
    let mut receiver = daemon.browse(SERVICE_TYPE)?;
    let mut ticker = tokio::time::interval(interval);
    let mut discovered: HashSet<Ipv6Addr> = HashSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            event = receiver.recv_async() => {
                match event {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        for addr in info.get_addresses() {
                            if let IpAddr::V6(v6) = addr {
                                discovered.insert(*v6);
                            }
                        }
                        continue;
                    }
                    Ok(ServiceEvent::SearchStopped(_)) => {
                        // ALLDONE/CANCELED: apply what we have and re-arm.
                        nodes.filter(&discovered.iter().copied().collect::<Vec<_>>(), &registry, &svc).await;
                        receiver = daemon.browse(SERVICE_TYPE)?;
                        continue;
                    }
                    Ok(_) => continue,
                    Err(_) => {
                        // FAIL: log, do not re-arm until the next tick.
                        tracing::warn!("mDNS browse channel closed");
                        continue;
                    }
                }
            }
        }

        nodes.filter(&discovered.iter().copied().collect::<Vec<_>>(), &registry, &svc).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::svc::SVC_INF_ID;
    use crate::interfaces::{InterfaceKind, AP_INF_ID};

    #[tokio::test]
    async fn static_list_reaches_node_manager() {
        let registry = Arc::new(Registry::new());
        registry.register(AP_INF_ID, InterfaceKind::Ap).await.unwrap();
        registry.register(SVC_INF_ID, InterfaceKind::Svc).await.unwrap();
        let svc = Svc::new(registry.clone(), Arc::new(NodeManager::new(4, 2)));
        let nodes = NodeManager::new(4, 2);

        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        apply_static(&[addr], &registry, &svc, &nodes).await;

        assert_eq!(nodes.nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_static_list_is_a_no_op() {
        let registry = Arc::new(Registry::new());
        registry.register(AP_INF_ID, InterfaceKind::Ap).await.unwrap();
        registry.register(SVC_INF_ID, InterfaceKind::Svc).await.unwrap();
        let svc = Svc::new(registry.clone(), Arc::new(NodeManager::new(4, 2)));
        let nodes = NodeManager::new(4, 2);

        apply_static(&[], &registry, &svc, &nodes).await;
        assert!(nodes.nodes().await.is_empty());
    }
}
