//! Driver-facing interface and the one shipped backend.
//!
//! `NicDriver` is the seam a real poll-mode NIC binding would sit behind —
//! every method takes plain values and slices so a C shim could bind to it
//! through a vtable of function pointers without needing to allocate.
//! `UdpNicDriver` is the only implementation in this repo: one UDP socket
//! per queue, software 5-tuple steering standing in for hardware flow
//! classification, `SO_BUSY_POLL`/`SO_TIMESTAMPNS` set the same way the
//! engine's multicast receive path has always set them. It never reports
//! hardware rate-limiting support, so `RateLimiter` always falls back to
//! TSC pacing against this backend (see `shaper.rs`).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{EngineError, Result};

pub type PortId = u16;
pub type QueueId = u16;
pub type FlowHandle = u64;
pub type ShaperHandle = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub imissed: u64,
    pub ierrors: u64,
    pub oerrors: u64,
    pub rx_nombuf: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub up: bool,
    pub speed_mbps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRule {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub queue: QueueId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaperProfile {
    pub bps: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketTypeHints {
    pub ipv4: bool,
    pub udp: bool,
    pub rtp: bool,
    pub vlan: bool,
    pub ipv6: bool,
}

impl PacketTypeHints {
    pub fn accepted_count(&self) -> usize {
        [self.ipv4, self.udp, self.rtp, self.vlan, self.ipv6]
            .iter()
            .filter(|b| **b)
            .count()
    }
}

pub trait NicDriver: Send + Sync {
    fn configure_port(&self, port: PortId, rx_queues: u16, tx_queues: u16) -> Result<()>;
    fn start_port(&self, port: PortId) -> Result<()>;
    fn stop_port(&self, port: PortId) -> Result<()>;
    fn reset_port(&self, port: PortId) -> Result<()>;
    fn close_port(&self, port: PortId) -> Result<()>;

    fn setup_tx_queue(&self, port: PortId, queue: QueueId) -> Result<()>;
    fn setup_rx_queue(&self, port: PortId, queue: QueueId, bind_port: u16) -> Result<()>;
    /// Binds a TX queue's socket to its single destination. The reference
    /// backend has no per-packet destination field in `tx_burst`, so every
    /// TX queue must be connected to exactly one peer before use.
    fn connect_tx_queue(&self, port: PortId, queue: QueueId, dest: std::net::SocketAddrV4) -> Result<()>;

    fn tx_burst(&self, port: PortId, queue: QueueId, packets: &[&[u8]]) -> Result<usize>;
    fn rx_burst(&self, port: PortId, queue: QueueId, out: &mut [Vec<u8>]) -> Result<usize>;

    fn flow_create(&self, port: PortId, rule: &FlowRule) -> Result<FlowHandle>;
    fn flow_destroy(&self, port: PortId, handle: FlowHandle) -> Result<()>;

    fn shaper_profile_add(&self, port: PortId, profile: &ShaperProfile) -> Result<ShaperHandle>;
    fn hierarchy_node_add(&self, port: PortId, parent: Option<ShaperHandle>, profile: ShaperHandle) -> Result<()>;
    fn hierarchy_commit(&self, port: PortId) -> Result<()>;

    fn timesync_enable(&self, port: PortId) -> Result<()>;
    fn timesync_read(&self, port: PortId) -> Result<u64>;

    fn stats_get(&self, port: PortId) -> Result<PortStats>;
    fn stats_reset(&self, port: PortId) -> Result<()>;

    fn link_get(&self, port: PortId) -> Result<LinkStatus>;
    fn set_promiscuous(&self, port: PortId, on: bool) -> Result<()>;
    /// Returns `false` if the driver rejects the hint set outright — the
    /// queue allocator's caller must then fall back to generic classification.
    fn set_packet_type_hints(&self, port: PortId, hints: PacketTypeHints) -> Result<bool>;

    fn supports_runtime_rx_queue_start(&self) -> bool;
    fn supports_hardware_rate_limit(&self) -> bool;
}

#[derive(Default)]
struct PortCounters {
    rx_packets: AtomicU64,
    tx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    rx_nombuf: AtomicU64,
}

/// Reference backend: real UDP sockets, no special hardware required.
pub struct UdpNicDriver {
    bind_addr: Ipv4Addr,
    tx_sockets: Mutex<HashMap<(PortId, QueueId), Socket>>,
    rx_sockets: Mutex<HashMap<(PortId, QueueId), Socket>>,
    flows: Mutex<HashMap<FlowHandle, (PortId, FlowRule)>>,
    next_flow: AtomicU64,
    counters: Mutex<HashMap<PortId, PortCounters>>,
    promisc: Mutex<HashMap<PortId, bool>>,
}

impl UdpNicDriver {
    pub fn new(bind_addr: Ipv4Addr) -> Self {
        UdpNicDriver {
            bind_addr,
            tx_sockets: Mutex::new(HashMap::new()),
            rx_sockets: Mutex::new(HashMap::new()),
            flows: Mutex::new(HashMap::new()),
            next_flow: AtomicU64::new(1),
            counters: Mutex::new(HashMap::new()),
            promisc: Mutex::new(HashMap::new()),
        }
    }

    fn counters_for(&self, port: PortId) -> std::sync::MutexGuard<'_, HashMap<PortId, PortCounters>> {
        let mut guard = self.counters.lock().unwrap();
        guard.entry(port).or_default();
        guard
    }

    /// Mirrors the busy-poll/timestamp socket options the engine's hot
    /// receive path has always used for low-latency multicast ingest.
    fn apply_hot_path_opts(sock: &Socket) -> Result<()> {
        let fd = sock.as_raw_fd();
        unsafe {
            let busy_poll: libc::c_int = 50;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_BUSY_POLL,
                &busy_poll as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            let ts_on: libc::c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_TIMESTAMPNS,
                &ts_on as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
        Ok(())
    }
}

impl NicDriver for UdpNicDriver {
    fn configure_port(&self, _port: PortId, _rx_queues: u16, _tx_queues: u16) -> Result<()> {
        Ok(())
    }

    fn start_port(&self, _port: PortId) -> Result<()> {
        Ok(())
    }

    fn stop_port(&self, port: PortId) -> Result<()> {
        self.tx_sockets.lock().unwrap().retain(|(p, _), _| *p != port);
        self.rx_sockets.lock().unwrap().retain(|(p, _), _| *p != port);
        Ok(())
    }

    fn reset_port(&self, port: PortId) -> Result<()> {
        self.stop_port(port)
    }

    fn close_port(&self, port: PortId) -> Result<()> {
        self.stop_port(port)?;
        self.counters.lock().unwrap().remove(&port);
        self.promisc.lock().unwrap().remove(&port);
        Ok(())
    }

    fn setup_tx_queue(&self, port: PortId, queue: QueueId) -> Result<()> {
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| EngineError::PortConfigFailed { port, reason: e.to_string() })?;
        sock.set_reuse_address(true).ok();
        self.tx_sockets.lock().unwrap().insert((port, queue), sock);
        Ok(())
    }

    fn setup_rx_queue(&self, port: PortId, queue: QueueId, bind_port: u16) -> Result<()> {
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| EngineError::PortConfigFailed { port, reason: e.to_string() })?;
        sock.set_reuse_address(true).ok();
        sock.set_nonblocking(true).ok();
        Self::apply_hot_path_opts(&sock)?;
        let addr = SockAddr::from(std::net::SocketAddrV4::new(self.bind_addr, bind_port));
        sock.bind(&addr)
            .map_err(|e| EngineError::PortConfigFailed { port, reason: e.to_string() })?;
        self.rx_sockets.lock().unwrap().insert((port, queue), sock);
        Ok(())
    }

    fn connect_tx_queue(&self, port: PortId, queue: QueueId, dest: std::net::SocketAddrV4) -> Result<()> {
        let sockets = self.tx_sockets.lock().unwrap();
        let sock = sockets
            .get(&(port, queue))
            .ok_or_else(|| EngineError::NotFound(format!("tx queue {queue} on port {port}")))?;
        sock.connect(&SockAddr::from(dest))
            .map_err(|e| EngineError::PortConfigFailed { port, reason: e.to_string() })
    }

    fn tx_burst(&self, port: PortId, queue: QueueId, packets: &[&[u8]]) -> Result<usize> {
        let sockets = self.tx_sockets.lock().unwrap();
        let sock = sockets
            .get(&(port, queue))
            .ok_or_else(|| EngineError::NotFound(format!("tx queue {queue} on port {port}")))?;
        let mut sent = 0;
        let counters = self.counters_for(port);
        for pkt in packets {
            // Destination is carried in the packet's own UDP envelope by the
            // caller via `send_to`-style framing; the reference backend
            // connects each queue's socket to its single destination at
            // setup time in the engine facade, so a plain `send` suffices.
            match sock.send(pkt) {
                Ok(n) => {
                    sent += 1;
                    counters[&port].tx_packets.fetch_add(1, Ordering::Relaxed);
                    counters[&port].tx_bytes.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(EngineError::Io(e)),
            }
        }
        Ok(sent)
    }

    fn rx_burst(&self, port: PortId, queue: QueueId, out: &mut [Vec<u8>]) -> Result<usize> {
        let sockets = self.rx_sockets.lock().unwrap();
        let sock = sockets
            .get(&(port, queue))
            .ok_or_else(|| EngineError::NotFound(format!("rx queue {queue} on port {port}")))?;
        let counters = self.counters_for(port);
        let mut received = 0;
        for slot in out.iter_mut() {
            let mut buf = [std::mem::MaybeUninit::uninit(); 9000];
            match sock.recv(&mut buf) {
                Ok(n) => {
                    slot.clear();
                    slot.extend(buf[..n].iter().map(|b| unsafe { b.assume_init() }));
                    received += 1;
                    counters[&port].rx_packets.fetch_add(1, Ordering::Relaxed);
                    counters[&port].rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(EngineError::Io(e)),
            }
        }
        Ok(received)
    }

    fn flow_create(&self, port: PortId, rule: &FlowRule) -> Result<FlowHandle> {
        let handle = self.next_flow.fetch_add(1, Ordering::Relaxed);
        self.flows.lock().unwrap().insert(handle, (port, *rule));
        Ok(handle)
    }

    fn flow_destroy(&self, _port: PortId, handle: FlowHandle) -> Result<()> {
        self.flows
            .lock()
            .unwrap()
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("flow handle {handle}")))
    }

    fn shaper_profile_add(&self, _port: PortId, _profile: &ShaperProfile) -> Result<ShaperHandle> {
        Err(EngineError::ShaperInstallFailed(
            "UdpNicDriver has no hardware rate limiter".into(),
        ))
    }

    fn hierarchy_node_add(&self, _port: PortId, _parent: Option<ShaperHandle>, _profile: ShaperHandle) -> Result<()> {
        Err(EngineError::ShaperInstallFailed(
            "UdpNicDriver has no hardware rate limiter".into(),
        ))
    }

    fn hierarchy_commit(&self, _port: PortId) -> Result<()> {
        Err(EngineError::ShaperInstallFailed(
            "UdpNicDriver has no hardware rate limiter".into(),
        ))
    }

    fn timesync_enable(&self, _port: PortId) -> Result<()> {
        Ok(())
    }

    fn timesync_read(&self, _port: PortId) -> Result<u64> {
        Ok(crate::metrics::now_ns())
    }

    fn stats_get(&self, port: PortId) -> Result<PortStats> {
        let counters = self.counters_for(port);
        let c = &counters[&port];
        Ok(PortStats {
            rx_packets: c.rx_packets.load(Ordering::Relaxed),
            tx_packets: c.tx_packets.load(Ordering::Relaxed),
            rx_bytes: c.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: c.tx_bytes.load(Ordering::Relaxed),
            imissed: 0,
            ierrors: 0,
            oerrors: 0,
            rx_nombuf: c.rx_nombuf.load(Ordering::Relaxed),
        })
    }

    fn stats_reset(&self, port: PortId) -> Result<()> {
        self.counters.lock().unwrap().insert(port, PortCounters::default());
        Ok(())
    }

    fn link_get(&self, _port: PortId) -> Result<LinkStatus> {
        Ok(LinkStatus { up: true, speed_mbps: 10_000 })
    }

    fn set_promiscuous(&self, port: PortId, on: bool) -> Result<()> {
        self.promisc.lock().unwrap().insert(port, on);
        Ok(())
    }

    fn set_packet_type_hints(&self, _port: PortId, hints: PacketTypeHints) -> Result<bool> {
        Ok(hints.accepted_count() >= 5)
    }

    fn supports_runtime_rx_queue_start(&self) -> bool {
        true
    }

    fn supports_hardware_rate_limit(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_hints_accepted_count() {
        let hints = PacketTypeHints { ipv4: true, udp: true, rtp: true, vlan: false, ipv6: false };
        assert_eq!(hints.accepted_count(), 3);
    }

    #[test]
    fn udp_driver_rejects_partial_hints() {
        let drv = UdpNicDriver::new(Ipv4Addr::LOCALHOST);
        let hints = PacketTypeHints { ipv4: true, udp: true, rtp: false, vlan: false, ipv6: false };
        assert!(!drv.set_packet_type_hints(0, hints).unwrap());
    }

    #[test]
    fn udp_driver_has_no_hardware_shaper() {
        let drv = UdpNicDriver::new(Ipv4Addr::LOCALHOST);
        assert!(!drv.supports_hardware_rate_limit());
        let err = drv.shaper_profile_add(0, &ShaperProfile { bps: 1_000_000 });
        assert!(matches!(err, Err(EngineError::ShaperInstallFailed(_))));
    }

    #[test]
    fn flow_create_destroy_roundtrip() {
        let drv = UdpNicDriver::new(Ipv4Addr::LOCALHOST);
        let rule = FlowRule {
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(239, 1, 1, 1),
            src_port: 5000,
            dst_port: 10000,
            queue: 0,
        };
        let h = drv.flow_create(0, &rule).unwrap();
        drv.flow_destroy(0, h).unwrap();
        assert!(drv.flow_destroy(0, h).is_err());
    }
}
