use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use bridged::config::Config;
use bridged::discovery;
use bridged::error::BridgeError;
use bridged::hdlc::{FrameDecoder, HdlcAddress, HdlcWriter};
use bridged::interfaces::ap::{decode_ap_frame, Ap};
use bridged::interfaces::node::NodeManager;
use bridged::interfaces::svc::Svc;
use bridged::interfaces::{InterfaceKind, AP_INF_ID, SVC_INF_ID};
use bridged::registry::Registry;
use bridged::scheduler::Scheduler;
use proto::Message;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    let config = Config::load().map_err(|e| BridgeError::Config(e.to_string()))?;

    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let port = tokio_serial::new(&config.serial_port, config.baud_rate)
        .open_native_async()
        .map_err(|e| BridgeError::Config(format!("failed to open {}: {e}", config.serial_port)))?;
    let (mut serial_rx, serial_tx) = tokio::io::split(port);

    let registry = Arc::new(Registry::new());
    registry.register(AP_INF_ID, InterfaceKind::Ap).await.ok();
    registry.register(SVC_INF_ID, InterfaceKind::Svc).await.ok();

    let writer = Arc::new(HdlcWriter::new(serial_tx));
    let ap = Arc::new(Ap::new(writer));
    let nodes = Arc::new(NodeManager::new(config.max_nodes, config.cports_per_node));
    let svc = Arc::new(Svc::new(registry.clone(), nodes.clone()));

    let static_nodes = config.static_node_addrs();
    discovery::apply_static(&static_nodes, &registry, &svc, &nodes).await;

    if config.mdns_enabled() {
        let registry = registry.clone();
        let svc = svc.clone();
        let nodes = nodes.clone();
        let interval = config.discovery_interval();
        tokio::spawn(async move {
            if let Err(e) = discovery::run_mdns(interval, registry, svc, nodes).await {
                tracing::error!(error = %e, "mDNS discovery task exited");
            }
        });
    }

    let (ap_tx, ap_rx) = mpsc::unbounded_channel::<(u16, Message)>();
    let drops = Arc::new(AtomicU64::new(0));
    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new(drops);
        let mut buf = [0u8; 4096];
        loop {
            let n = match serial_rx.read(&mut buf).await {
                Ok(0) => {
                    tracing::error!("serial port closed");
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(error = %e, "serial read error");
                    return;
                }
            };
            for &b in &buf[..n] {
                let Some(result) = decoder.push_byte(b) else { continue };
                let frame = match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropped malformed HDLC frame");
                        continue;
                    }
                };
                match frame.addr {
                    HdlcAddress::Greybus => match decode_ap_frame(&frame.payload) {
                        Ok((cport, msg)) => {
                            let _ = ap_tx.send((cport, msg));
                        }
                        Err(e) => tracing::warn!(error = %e, "malformed AP frame"),
                    },
                    HdlcAddress::DebugLog => {
                        tracing::debug!(bytes = frame.payload.len(), "debug log frame from host");
                    }
                    HdlcAddress::Management => {
                        tracing::debug!(bytes = frame.payload.len(), "management frame from host");
                    }
                }
            }
        }
    });

    svc.start().await;

    let scheduler = Scheduler::new(registry, svc, nodes, ap);
    scheduler.run(ap_rx).await;

    Ok(())
}
