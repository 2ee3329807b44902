//! Shared session-construction helpers used by `run`, `tx`, `rx`, `bench`
//! and `monitor` — one place that turns a `SessionEntry` from config into
//! a running engine session.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};
use rvid_engine::{
    DeliveryMode, Engine, EngineParams, PacingMode, PixelGroup, RxSessionHandle, SessionConfig,
    TxSessionHandle, UdpNicDriver,
};

use crate::config::{EngineConfig, SessionEntry, SessionRole};

pub enum SessionHandle {
    Tx(Arc<TxSessionHandle>),
    Rx(Arc<RxSessionHandle>),
}

impl SessionHandle {
    pub fn name(&self) -> &str {
        match self {
            SessionHandle::Tx(h) => &h.name,
            SessionHandle::Rx(h) => &h.name,
        }
    }

    pub fn close(&self) {
        match self {
            SessionHandle::Tx(h) => h.close(),
            SessionHandle::Rx(h) => h.close(),
        }
    }
}

pub fn build_engine(config: &EngineConfig) -> Result<Arc<Engine>> {
    let driver: Arc<dyn rvid_engine::NicDriver> = Arc::new(UdpNicDriver::new(config.bind_addr));
    let params = EngineParams {
        bind_addr: config.bind_addr,
        lcore_registry_path: config.lcore_registry_path.clone().into(),
        pacing_mode: PacingMode::Auto,
        ..EngineParams::default()
    };
    Engine::create(driver, params).context("failed to create engine")
}

pub fn ensure_ports(engine: &Arc<Engine>, config: &EngineConfig) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for s in &config.sessions {
        if seen.insert(s.port_id) {
            engine
                .create_port(s.port_id, 8, 8)
                .with_context(|| format!("failed to bring up port {}", s.port_id))?;
        }
    }
    Ok(())
}

fn session_config(entry: &SessionEntry) -> Result<SessionConfig> {
    let ip: Ipv4Addr = entry
        .dest_addr
        .parse()
        .with_context(|| format!("invalid dest_addr for session {}", entry.name))?;
    Ok(SessionConfig {
        width: entry.width,
        height: entry.height,
        fps: entry.fps,
        pixel_group: PixelGroup::YUV422_10BIT,
        dest: SocketAddrV4::new(ip, entry.dest_port),
        payload_type: entry.payload_type,
        lcore: entry.lcore,
        rx_queue_capacity: 64,
        delivery_mode: if entry.rtp_passthrough { DeliveryMode::Rtp } else { DeliveryMode::Frame },
    })
}

pub fn start_session(engine: &Arc<Engine>, entry: &SessionEntry) -> Result<SessionHandle> {
    let cfg = session_config(entry)?;
    match entry.role {
        SessionRole::Tx => {
            let handle = engine
                .create_tx_session(entry.port_id, entry.name.clone(), cfg)
                .with_context(|| format!("failed to start tx session {}", entry.name))?;
            Ok(SessionHandle::Tx(handle))
        }
        SessionRole::Rx => {
            let handle = engine
                .create_rx_session(entry.port_id, entry.name.clone(), cfg)
                .with_context(|| format!("failed to start rx session {}", entry.name))?;
            Ok(SessionHandle::Rx(handle))
        }
    }
}

pub fn start_all_sessions(engine: &Arc<Engine>, config: &EngineConfig) -> Result<Vec<SessionHandle>> {
    ensure_ports(engine, config)?;
    config.sessions.iter().map(|s| start_session(engine, s)).collect()
}
