//! Process start-up configuration, mirroring the flag-plus-environment-
//! variable style the reference pack's builder types use for optional
//! fields, plus an optional TOML file layered underneath CLI/env.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

/// Every field optional: only the ones actually present in the file
/// override what CLI parsing (flags, env, or built-in defaults) produced.
#[derive(Debug, Default, serde::Deserialize)]
struct FileConfig {
    serial_port: Option<String>,
    baud_rate: Option<u32>,
    max_nodes: Option<u8>,
    hdlc_mtu: Option<usize>,
    static_nodes: Option<String>,
    mdns: Option<bool>,
    no_mdns: Option<bool>,
    discovery_interval_secs: Option<u64>,
    cports_per_node: Option<u16>,
    log_level: Option<String>,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "bridged", version, about = "Greybus AP bridge daemon")]
pub struct Config {
    /// Optional TOML file overlaying these flags/environment variables.
    #[arg(long, env = "BRIDGED_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Serial device the HDLC link is framed over.
    #[arg(long, env = "BRIDGED_SERIAL_PORT", default_value = "/dev/ttyUSB0")]
    pub serial_port: String,

    /// Baud rate for the serial link.
    #[arg(long, env = "BRIDGED_BAUD_RATE", default_value_t = 115_200)]
    pub baud_rate: u32,

    /// Maximum number of remote node interfaces (ids `2..=max_nodes+1`).
    #[arg(long, env = "BRIDGED_MAX_NODES", default_value_t = 16)]
    pub max_nodes: u8,

    /// Largest HDLC frame payload this bridge will emit or accept.
    #[arg(long, env = "BRIDGED_HDLC_MTU", default_value_t = 4096)]
    pub hdlc_mtu: usize,

    /// Comma-separated static IPv6 node list; empty disables static discovery.
    #[arg(long, env = "BRIDGED_STATIC_NODES", default_value = "")]
    pub static_nodes: String,

    /// Enable mDNS browsing for `_greybus._tcp.local`.
    #[arg(long, env = "BRIDGED_MDNS", default_value_t = true)]
    pub mdns: bool,

    #[arg(long, env = "BRIDGED_NO_MDNS", default_value_t = false)]
    pub no_mdns: bool,

    /// Interval between discovery passes, in seconds.
    #[arg(long, env = "BRIDGED_DISCOVERY_INTERVAL_SECS", default_value_t = 5)]
    pub discovery_interval_secs: u64,

    /// Number of cports reserved on each remote node.
    #[arg(long, env = "BRIDGED_CPORTS_PER_NODE", default_value_t = 4)]
    pub cports_per_node: u16,

    #[arg(long, env = "BRIDGED_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parses CLI/env configuration, then overlays `--config-file`'s TOML
    /// contents on top if one was given.
    pub fn load() -> Result<Self, ConfigError> {
        Self::parse().with_file_overlay()
    }

    fn with_file_overlay(mut self) -> Result<Self, ConfigError> {
        let Some(path) = self.config_file.clone() else {
            return Ok(self);
        };
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
        let file: FileConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse(path, e))?;
        self.apply_file(file);
        Ok(self)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.serial_port {
            self.serial_port = v;
        }
        if let Some(v) = file.baud_rate {
            self.baud_rate = v;
        }
        if let Some(v) = file.max_nodes {
            self.max_nodes = v;
        }
        if let Some(v) = file.hdlc_mtu {
            self.hdlc_mtu = v;
        }
        if let Some(v) = file.static_nodes {
            self.static_nodes = v;
        }
        if let Some(v) = file.mdns {
            self.mdns = v;
        }
        if let Some(v) = file.no_mdns {
            self.no_mdns = v;
        }
        if let Some(v) = file.discovery_interval_secs {
            self.discovery_interval_secs = v;
        }
        if let Some(v) = file.cports_per_node {
            self.cports_per_node = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
    }

    pub fn mdns_enabled(&self) -> bool {
        self.mdns && !self.no_mdns
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn static_node_addrs(&self) -> Vec<std::net::Ipv6Addr> {
        proto::svc::parse_ipv6_list(&self.static_nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mdns_toggle_precedence() {
        let mut cfg = Config::parse_from(["bridged"]);
        assert!(cfg.mdns_enabled());
        cfg.no_mdns = true;
        assert!(!cfg.mdns_enabled());
    }

    #[test]
    fn empty_static_nodes_parses_empty() {
        let cfg = Config::parse_from(["bridged"]);
        assert!(cfg.static_node_addrs().is_empty());
    }

    #[test]
    fn config_file_overlays_cli_defaults() {
        let path = std::env::temp_dir().join(format!("bridged-test-config-{}.toml", std::process::id()));
        std::fs::write(&path, "baud_rate = 9600\nmax_nodes = 3\nlog_level = \"debug\"\n").unwrap();

        let cfg = Config::parse_from(["bridged", "--config-file", path.to_str().unwrap()])
            .with_file_overlay()
            .unwrap();

        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.max_nodes, 3);
        assert_eq!(cfg.log_level, "debug");
        // Fields absent from the file keep their CLI/env/default value.
        assert_eq!(cfg.serial_port, "/dev/ttyUSB0");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cfg = Config::parse_from(["bridged", "--config-file", "/nonexistent/bridged.toml"]);
        assert!(cfg.with_file_overlay().is_err());
    }
}
