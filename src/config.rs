//! `sessions.toml` configuration for rvidctl.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

/// Top-level engine configuration: one port and the sessions running on it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_bind_addr")]
    pub bind_addr: Ipv4Addr,
    #[serde(default = "EngineConfig::default_lcore_registry_path")]
    pub lcore_registry_path: String,
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

impl EngineConfig {
    fn default_bind_addr() -> Ipv4Addr {
        Ipv4Addr::UNSPECIFIED
    }

    fn default_lcore_registry_path() -> String {
        "/var/run/rvidctl.lcores".into()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn default_example() -> Self {
        EngineConfig {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            lcore_registry_path: Self::default_lcore_registry_path(),
            sessions: vec![
                SessionEntry {
                    name: "tx0".into(),
                    role: SessionRole::Tx,
                    port_id: 0,
                    width: 1920,
                    height: 1080,
                    fps: 59.94,
                    dest_addr: "239.1.1.1".into(),
                    dest_port: 10000,
                    payload_type: 112,
                    lcore: None,
                    dump_path: None,
                    rtp_passthrough: false,
                },
                SessionEntry {
                    name: "rx0".into(),
                    role: SessionRole::Rx,
                    port_id: 0,
                    width: 1920,
                    height: 1080,
                    fps: 59.94,
                    dest_addr: "239.1.1.1".into(),
                    dest_port: 10001,
                    payload_type: 112,
                    lcore: None,
                    dump_path: Some("/var/tmp/rvid_rx0_1920_1080_yuv422p10le.yuv".into()),
                    rtp_passthrough: false,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    Tx,
    Rx,
}

/// One TX or RX session.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionEntry {
    pub name: String,
    pub role: SessionRole,
    pub port_id: u16,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Unicast or multicast destination address.
    pub dest_addr: String,
    pub dest_port: u16,
    #[serde(default = "SessionEntry::default_payload_type")]
    pub payload_type: u8,
    /// CPU core to pin this session's scheduler to (optional).
    pub lcore: Option<u32>,
    /// RX only: path to persist assembled frames to, memory-mapped.
    pub dump_path: Option<String>,
    /// RX only: deliver raw RTP packets instead of assembled frames.
    #[serde(default)]
    pub rtp_passthrough: bool,
}

impl SessionEntry {
    fn default_payload_type() -> u8 {
        112
    }
}
