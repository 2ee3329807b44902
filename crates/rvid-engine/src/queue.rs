//! Queue allocation: reserve/free TX and RX queue slots on a port, install
//! the 5-tuple flow rule that steers a session's traffic to its queue, and
//! fill any RX queues a session doesn't claim with a dummy flow when the
//! driver can't start RX queues at runtime.

use std::sync::Arc;

use crate::driver::{FlowRule, NicDriver, QueueId};
use crate::error::{EngineError, Result};
use crate::port::Port;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSlot {
    pub queue: QueueId,
    pub in_use: bool,
}

pub struct QueueAllocator {
    driver: Arc<dyn NicDriver>,
    tx_slots: Vec<QueueSlot>,
    rx_slots: Vec<QueueSlot>,
    dummy_filled: bool,
}

impl QueueAllocator {
    pub fn new(driver: Arc<dyn NicDriver>, tx_queues: u16, rx_queues: u16) -> Self {
        QueueAllocator {
            driver,
            tx_slots: (0..tx_queues).map(|q| QueueSlot { queue: q, in_use: false }).collect(),
            rx_slots: (0..rx_queues).map(|q| QueueSlot { queue: q, in_use: false }).collect(),
            dummy_filled: false,
        }
    }

    pub fn request_tx(&mut self, port: &Port) -> Result<QueueId> {
        let slot = self
            .tx_slots
            .iter_mut()
            .find(|s| !s.in_use)
            .ok_or(EngineError::OutOfQueues { port: port.id(), kind: "tx" })?;
        slot.in_use = true;
        let queue = slot.queue;
        self.driver
            .setup_tx_queue(port.id(), queue)
            .map_err(|e| EngineError::PortConfigFailed { port: port.id(), reason: e.to_string() })?;
        Ok(queue)
    }

    pub fn free_tx(&mut self, queue: QueueId) -> Result<()> {
        let slot = self
            .tx_slots
            .iter_mut()
            .find(|s| s.queue == queue)
            .ok_or_else(|| EngineError::NotFound(format!("tx queue {queue}")))?;
        slot.in_use = false;
        Ok(())
    }

    pub fn request_rx(&mut self, port: &Port, bind_port: u16) -> Result<QueueId> {
        let slot = self
            .rx_slots
            .iter_mut()
            .find(|s| !s.in_use)
            .ok_or(EngineError::OutOfQueues { port: port.id(), kind: "rx" })?;
        slot.in_use = true;
        let queue = slot.queue;
        self.driver
            .setup_rx_queue(port.id(), queue, bind_port)
            .map_err(|e| EngineError::PortConfigFailed { port: port.id(), reason: e.to_string() })?;
        Ok(queue)
    }

    pub fn free_rx(&mut self, queue: QueueId) -> Result<()> {
        let slot = self
            .rx_slots
            .iter_mut()
            .find(|s| s.queue == queue)
            .ok_or_else(|| EngineError::NotFound(format!("rx queue {queue}")))?;
        slot.in_use = false;
        Ok(())
    }

    pub fn install_flow(&self, port: &Port, rule: FlowRule) -> Result<u64> {
        port.install_flow(rule)
    }

    /// Some NICs can't start an RX queue at runtime without a flow rule
    /// pointing at it; if a session leaves queues unclaimed, install a
    /// catch-all dummy flow on each so the driver considers them started.
    pub fn fill_unused_with_dummy_flow(&mut self, port: &Port) -> Result<usize> {
        if self.driver.supports_runtime_rx_queue_start() {
            return Ok(0);
        }
        if self.dummy_filled {
            return Ok(0);
        }
        let mut filled = 0;
        for slot in self.rx_slots.iter().filter(|s| !s.in_use) {
            let dummy = FlowRule {
                src_ip: std::net::Ipv4Addr::UNSPECIFIED,
                dst_ip: std::net::Ipv4Addr::UNSPECIFIED,
                src_port: 0,
                dst_port: 0,
                queue: slot.queue,
            };
            port.install_flow(dummy)?;
            filled += 1;
        }
        self.dummy_filled = true;
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::UdpNicDriver;
    use crate::shaper::{PacingMode, RateLimiter};
    use std::net::Ipv4Addr;

    fn setup() -> (Port, QueueAllocator) {
        let driver: Arc<dyn NicDriver> = Arc::new(UdpNicDriver::new(Ipv4Addr::LOCALHOST));
        let rate_limiter = Arc::new(RateLimiter::new(driver.clone(), PacingMode::Auto));
        let port = Port::new(0, driver.clone(), rate_limiter);
        port.configure(2, 2).unwrap();
        port.start().unwrap();
        (port, QueueAllocator::new(driver, 2, 2))
    }

    #[test]
    fn request_tx_exhausts_then_errors() {
        let (port, mut alloc) = setup();
        alloc.request_tx(&port).unwrap();
        alloc.request_tx(&port).unwrap();
        assert!(matches!(alloc.request_tx(&port), Err(EngineError::OutOfQueues { kind: "tx", .. })));
    }

    #[test]
    fn free_then_reacquire_tx_queue() {
        let (port, mut alloc) = setup();
        let q = alloc.request_tx(&port).unwrap();
        alloc.free_tx(q).unwrap();
        let q2 = alloc.request_tx(&port).unwrap();
        assert_eq!(q, q2);
    }

    #[test]
    fn rx_queue_binds_to_distinct_port() {
        let (port, mut alloc) = setup();
        let q = alloc.request_rx(&port, 10010).unwrap();
        assert_eq!(q, 0);
    }
}
