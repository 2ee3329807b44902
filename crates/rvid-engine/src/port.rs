//! Port lifecycle: configure → start → (reset)* → stop → free.
//!
//! A `Port` owns the driver's view of one physical or virtual NIC port plus
//! the bookkeeping needed to replay its flows and shapers across a reset,
//! mirroring the original driver's `dev_stat`/reset-suppression discipline:
//! a port being reset reports no stats and accepts no new flow installs
//! until it is back in `Started`.

use std::sync::{Arc, Mutex};

use crate::driver::{FlowRule, NicDriver, PacketTypeHints, PortId, PortStats};
use crate::error::{EngineError, Result};
use crate::shaper::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Down,
    Configured,
    Started,
    InReset,
    Stopped,
}

struct ReplayState {
    rx_queues: u16,
    tx_queues: u16,
    promiscuous: bool,
    packet_type_hints: Option<PacketTypeHints>,
    flows: Vec<FlowRule>,
}

pub struct Port {
    id: PortId,
    driver: Arc<dyn NicDriver>,
    rate_limiter: Arc<RateLimiter>,
    state: Mutex<PortState>,
    replay: Mutex<ReplayState>,
}

impl Port {
    pub fn new(id: PortId, driver: Arc<dyn NicDriver>, rate_limiter: Arc<RateLimiter>) -> Self {
        Port {
            id,
            driver,
            rate_limiter,
            state: Mutex::new(PortState::Down),
            replay: Mutex::new(ReplayState {
                rx_queues: 0,
                tx_queues: 0,
                promiscuous: false,
                packet_type_hints: None,
                flows: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn state(&self) -> PortState {
        *self.state.lock().unwrap()
    }

    pub fn configure(&self, rx_queues: u16, tx_queues: u16) -> Result<()> {
        self.driver
            .configure_port(self.id, rx_queues, tx_queues)
            .map_err(|e| EngineError::PortConfigFailed { port: self.id, reason: e.to_string() })?;
        let mut replay = self.replay.lock().unwrap();
        replay.rx_queues = rx_queues;
        replay.tx_queues = tx_queues;
        *self.state.lock().unwrap() = PortState::Configured;
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if *state != PortState::Configured && *state != PortState::InReset {
                return Err(EngineError::PortStartFailed {
                    port: self.id,
                    reason: "port must be configured before starting".into(),
                });
            }
        }
        self.driver
            .start_port(self.id)
            .map_err(|e| EngineError::PortStartFailed { port: self.id, reason: e.to_string() })?;
        let link = self.driver.link_get(self.id)?;
        if !link.up {
            return Err(EngineError::NoLink { port: self.id });
        }
        *self.state.lock().unwrap() = PortState::Started;
        Ok(())
    }

    /// Snapshot current flows/hints/shaper rates, stop, reconfigure,
    /// restart, and replay them in order: flows, multicast, rate limits.
    /// Multicast group membership has no Port-side state to snapshot here
    /// — it's owned by the driver's receive path (`UdpNicDriver` rejoins
    /// its configured group on every queue start), not replayed by `Port`.
    pub fn reset(&self) -> Result<()> {
        *self.state.lock().unwrap() = PortState::InReset;
        let shaper_rates = self.rate_limiter.snapshot_rates(self.id);
        self.driver
            .reset_port(self.id)
            .map_err(|e| EngineError::PortResetFailed { port: self.id, reason: e.to_string() })?;
        self.rate_limiter.clear_port(self.id);

        let (rx_queues, tx_queues, promiscuous, hints, flows) = {
            let replay = self.replay.lock().unwrap();
            (replay.rx_queues, replay.tx_queues, replay.promiscuous, replay.packet_type_hints, replay.flows.clone())
        };

        self.configure(rx_queues, tx_queues)?;
        self.driver.set_promiscuous(self.id, promiscuous)?;
        if let Some(hints) = hints {
            self.set_packet_type_hints(hints)?;
        }
        self.start()?;
        for rule in flows {
            self.install_flow(rule)?;
        }
        for bps in shaper_rates {
            self.rate_limiter.get_or_create_shaper(self.id, bps)?;
        }
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.driver
            .stop_port(self.id)
            .map_err(|e| EngineError::PortResetFailed { port: self.id, reason: e.to_string() })?;
        *self.state.lock().unwrap() = PortState::Stopped;
        Ok(())
    }

    pub fn free(&self) -> Result<()> {
        self.driver.close_port(self.id)?;
        *self.state.lock().unwrap() = PortState::Down;
        Ok(())
    }

    pub fn set_promiscuous(&self, on: bool) -> Result<()> {
        self.driver.set_promiscuous(self.id, on)?;
        self.replay.lock().unwrap().promiscuous = on;
        Ok(())
    }

    /// Fails if fewer than five packet types are accepted, per the
    /// driver's minimum classification requirement.
    pub fn set_packet_type_hints(&self, hints: PacketTypeHints) -> Result<()> {
        if hints.accepted_count() < 5 {
            return Err(EngineError::InvalidArgument(
                "packet type hints must accept at least five types".into(),
            ));
        }
        let accepted = self.driver.set_packet_type_hints(self.id, hints)?;
        if !accepted {
            return Err(EngineError::PortConfigFailed {
                port: self.id,
                reason: "driver rejected packet type hints".into(),
            });
        }
        self.replay.lock().unwrap().packet_type_hints = Some(hints);
        Ok(())
    }

    pub fn install_flow(&self, rule: FlowRule) -> Result<u64> {
        if *self.state.lock().unwrap() == PortState::InReset {
            return Err(EngineError::FlowInstallFailed("port is resetting".into()));
        }
        let handle = self
            .driver
            .flow_create(self.id, &rule)
            .map_err(|e| EngineError::FlowInstallFailed(e.to_string()))?;
        self.replay.lock().unwrap().flows.push(rule);
        Ok(handle)
    }

    pub fn stats(&self) -> Result<Option<PortStats>> {
        if *self.state.lock().unwrap() == PortState::InReset {
            return Ok(None);
        }
        Ok(Some(self.driver.stats_get(self.id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::UdpNicDriver;
    use crate::shaper::PacingMode;
    use std::net::Ipv4Addr;

    fn port() -> Port {
        let driver: Arc<dyn NicDriver> = Arc::new(UdpNicDriver::new(Ipv4Addr::LOCALHOST));
        let rate_limiter = Arc::new(RateLimiter::new(driver.clone(), PacingMode::Auto));
        Port::new(0, driver, rate_limiter)
    }

    #[test]
    fn configure_then_start_transitions_state() {
        let p = port();
        p.configure(1, 1).unwrap();
        assert_eq!(p.state(), PortState::Configured);
        p.start().unwrap();
        assert_eq!(p.state(), PortState::Started);
    }

    #[test]
    fn start_before_configure_fails() {
        let p = port();
        assert!(p.start().is_err());
    }

    #[test]
    fn stats_suppressed_during_reset() {
        let p = port();
        p.configure(1, 1).unwrap();
        p.start().unwrap();
        *p.state.lock().unwrap() = PortState::InReset;
        assert_eq!(p.stats().unwrap(), None);
    }

    #[test]
    fn packet_type_hints_require_five() {
        let p = port();
        p.configure(1, 1).unwrap();
        p.start().unwrap();
        let hints = PacketTypeHints { ipv4: true, udp: true, rtp: false, vlan: false, ipv6: false };
        assert!(p.set_packet_type_hints(hints).is_err());
    }

    #[test]
    fn reset_replays_shaper_rates() {
        let p = port();
        p.configure(1, 1).unwrap();
        p.start().unwrap();
        p.rate_limiter.get_or_create_shaper(p.id(), 1_000_000_000).unwrap();
        assert_eq!(p.rate_limiter.snapshot_rates(p.id()), vec![1_000_000_000]);

        p.reset().unwrap();

        assert_eq!(p.rate_limiter.snapshot_rates(p.id()), vec![1_000_000_000]);
    }
}
