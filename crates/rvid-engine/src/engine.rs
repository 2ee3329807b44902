//! Top-level facade: wires `Port`, `QueueAllocator`, `RateLimiter`,
//! `LcoreRegistry`, `Scheduler` and sessions together the way a caller
//! actually wants to use them — `Engine::create`/`create_tx_session`/
//! `create_rx_session`/`free`, mirroring the lifecycle spec.md §3 names.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::driver::{FlowRule, NicDriver, PacketTypeHints, PortId};
use crate::error::{EngineError, Result};
use crate::lcore::LcoreRegistry;
use crate::port::Port;
use crate::queue::QueueAllocator;
use crate::rtp::{PixelGroup, Rfc4175Payload, RowSegment, RtpHeader, PAYLOAD_HEADER_LEN, ROW_HEADER_LEN, RTP_HEADER_LEN};
use crate::rx_session::{DeliveredItem, DeliveryMode, RxSession};
use crate::scheduler::{PollUnit, Scheduler, SchedulerSet};
use crate::shaper::{PacingMode, RateLimiter};
use crate::stats::{SessionCounters, StatReporter};
use crate::tx_session::TxSession;

/// Maximum UDP payload the reference driver will pack a single RTP packet
/// into, leaving headroom under common path MTUs.
const MAX_PACKET_PIXEL_BYTES: usize = 1400;

pub struct EngineParams {
    pub bind_addr: Ipv4Addr,
    pub lcore_registry_path: PathBuf,
    pub pacing_mode: PacingMode,
    pub stat_interval: Duration,
    pub min_lcore: u32,
    /// Per-core bandwidth ceiling, in Mb/s, used to pack sessions onto
    /// shared schedulers.
    pub data_quota_mbs: u64,
    /// Optional external PTP (or other) clock source; defaults to the
    /// engine's own monotonic clock when absent.
    pub ptp_get_time_fn: Option<Box<dyn Fn() -> u64 + Send + Sync>>,
}

impl Default for EngineParams {
    fn default() -> Self {
        EngineParams {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            lcore_registry_path: std::env::temp_dir().join("rvid-engine.lcores"),
            pacing_mode: PacingMode::Auto,
            stat_interval: Duration::from_secs(1),
            min_lcore: 0,
            data_quota_mbs: crate::scheduler::DEFAULT_DATA_QUOTA_MBS,
            ptp_get_time_fn: None,
        }
    }
}

pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub pixel_group: PixelGroup,
    pub dest: SocketAddrV4,
    pub payload_type: u8,
    pub lcore: Option<u32>,
    pub rx_queue_capacity: usize,
    pub delivery_mode: DeliveryMode,
}

impl SessionConfig {
    pub fn frame_size(&self) -> usize {
        let pixels = self.width as usize * self.height as usize;
        pixels / self.pixel_group.pixels * self.pixel_group.bytes
    }

    /// Octets per scan row. The RFC 4175 row header's offset field is
    /// row-local pixel units, never a frame-linear byte count, so every
    /// packetizer/depacketizer on this session needs this to convert.
    pub fn bytes_per_row(&self) -> usize {
        self.width as usize / self.pixel_group.pixels * self.pixel_group.bytes
    }

    pub fn bits_per_second(&self) -> u64 {
        (self.frame_size() as f64 * 8.0 * self.fps) as u64
    }

    /// Bitrate rounded up to whole Mb/s, the unit scheduler quotas are
    /// tracked in.
    pub fn megabits_per_second(&self) -> u64 {
        (self.bits_per_second() + 999_999) / 1_000_000
    }
}

struct PortEntry {
    port: Arc<Port>,
    queues: QueueAllocator,
}

pub struct Engine {
    driver: Arc<dyn NicDriver>,
    ports: Mutex<HashMap<PortId, PortEntry>>,
    rate_limiter: Arc<RateLimiter>,
    lcore_registry: Arc<LcoreRegistry>,
    scheduler_set: Arc<SchedulerSet>,
    stat_reporter: Arc<StatReporter>,
    next_dest_port: std::sync::atomic::AtomicU16,
    min_lcore: u32,
}

impl Engine {
    pub fn create(driver: Arc<dyn NicDriver>, params: EngineParams) -> Result<Arc<Engine>> {
        let lcore_registry = Arc::new(LcoreRegistry::open(&params.lcore_registry_path)?);
        let scheduler_set = Arc::new(SchedulerSet::with_quota(lcore_registry.clone(), params.data_quota_mbs));
        let stat_reporter = StatReporter::spawn(params.stat_interval);
        let rate_limiter = Arc::new(RateLimiter::new(driver.clone(), params.pacing_mode));
        let min_lcore = params.min_lcore;
        info!("engine created, pacing mode requested = {:?}", params.pacing_mode);
        Ok(Arc::new(Engine {
            driver,
            ports: Mutex::new(HashMap::new()),
            rate_limiter,
            lcore_registry,
            scheduler_set,
            min_lcore,
            stat_reporter,
            next_dest_port: std::sync::atomic::AtomicU16::new(10000),
        }))
    }

    pub fn create_port(&self, port_id: PortId, rx_queues: u16, tx_queues: u16) -> Result<Arc<Port>> {
        let port = Arc::new(Port::new(port_id, self.driver.clone(), self.rate_limiter.clone()));
        port.configure(rx_queues, tx_queues)?;
        let hints = PacketTypeHints { ipv4: true, udp: true, rtp: true, vlan: true, ipv6: true };
        if let Err(e) = port.set_packet_type_hints(hints) {
            warn!("packet type hints rejected for port {port_id}: {e}");
        }
        port.start()?;
        self.stat_reporter.register_port(port.clone());
        self.ports.lock().unwrap().insert(
            port_id,
            PortEntry { port: port.clone(), queues: QueueAllocator::new(self.driver.clone(), tx_queues, rx_queues) },
        );
        Ok(port)
    }

    pub fn reset_port(&self, port_id: PortId) -> Result<()> {
        let ports = self.ports.lock().unwrap();
        let entry = ports.get(&port_id).ok_or_else(|| EngineError::NotFound(format!("port {port_id}")))?;
        entry.port.reset()
    }

    pub fn create_tx_session(
        self: &Arc<Self>,
        port_id: PortId,
        name: impl Into<String>,
        cfg: SessionConfig,
    ) -> Result<Arc<TxSessionHandle>> {
        let name = name.into();
        let mut ports = self.ports.lock().unwrap();
        let entry = ports.get_mut(&port_id).ok_or_else(|| EngineError::NotFound(format!("port {port_id}")))?;

        let queue = entry.queues.request_tx(&entry.port)?;
        self.driver.connect_tx_queue(port_id, queue, cfg.dest)?;

        let pacing = self.rate_limiter.get_or_create_shaper(port_id, cfg.bits_per_second())?;
        let session = Arc::new(TxSession::new(cfg.frame_size(), cfg.pixel_group, cfg.bytes_per_row()));
        let counters = Arc::new(SessionCounters::default());
        self.stat_reporter.register_session(name.clone(), counters.clone());

        let quota_mbs = cfg.megabits_per_second();
        let sched = self.scheduler_set.get_sch(cfg.lcore, self.min_lcore, quota_mbs)?;
        let unit: Arc<dyn PollUnit> = Arc::new(TxPollUnit {
            name: name.clone(),
            driver: self.driver.clone(),
            port: port_id,
            queue,
            session: session.clone(),
            counters: counters.clone(),
            payload_type: cfg.payload_type,
            seq: std::sync::atomic::AtomicU64::new(0),
            pacing,
        });
        sched.add_unit(unit);

        Ok(Arc::new(TxSessionHandle {
            name,
            session,
            counters,
            scheduler: sched,
            scheduler_set: self.scheduler_set.clone(),
            quota_mbs,
            pacing_mode: pacing,
        }))
    }

    pub fn create_rx_session(
        self: &Arc<Self>,
        port_id: PortId,
        name: impl Into<String>,
        cfg: SessionConfig,
    ) -> Result<Arc<RxSessionHandle>> {
        let name = name.into();
        let mut ports = self.ports.lock().unwrap();
        let entry = ports.get_mut(&port_id).ok_or_else(|| EngineError::NotFound(format!("port {port_id}")))?;

        let bind_port = self.next_dest_port.fetch_add(1, Ordering::Relaxed);
        let queue = entry.queues.request_rx(&entry.port, bind_port)?;
        entry.queues.fill_unused_with_dummy_flow(&entry.port)?;

        let rule = FlowRule {
            src_ip: Ipv4Addr::UNSPECIFIED,
            dst_ip: *cfg.dest.ip(),
            src_port: 0,
            dst_port: cfg.dest.port(),
            queue,
        };
        entry.port.install_flow(rule)?;

        let session = Arc::new(RxSession::new(
            cfg.frame_size(),
            cfg.delivery_mode,
            cfg.rx_queue_capacity,
            cfg.pixel_group,
            cfg.bytes_per_row(),
        ));
        let counters = Arc::new(SessionCounters::default());
        self.stat_reporter.register_session(name.clone(), counters.clone());

        let quota_mbs = cfg.megabits_per_second();
        let sched = self.scheduler_set.get_sch(cfg.lcore, self.min_lcore, quota_mbs)?;
        let unit: Arc<dyn PollUnit> = Arc::new(RxPollUnit {
            name: name.clone(),
            driver: self.driver.clone(),
            port: port_id,
            queue,
            session: session.clone(),
            counters: counters.clone(),
        });
        sched.add_unit(unit);

        Ok(Arc::new(RxSessionHandle {
            name,
            session,
            counters,
            scheduler: sched,
            scheduler_set: self.scheduler_set.clone(),
            quota_mbs,
        }))
    }

    /// Latest periodic snapshot across every registered port and session,
    /// or `None` before the first reporting interval has elapsed.
    pub fn latest_stats(&self) -> Option<crate::stats::StatSnapshot> {
        self.stat_reporter.latest()
    }

    pub fn free(&self) -> Result<()> {
        self.stat_reporter.stop();
        let mut ports = self.ports.lock().unwrap();
        for (_, entry) in ports.drain() {
            entry.port.stop()?;
            entry.port.free()?;
        }
        Ok(())
    }
}

pub struct TxSessionHandle {
    pub name: String,
    pub session: Arc<TxSession>,
    pub counters: Arc<SessionCounters>,
    pub scheduler: Arc<Scheduler>,
    scheduler_set: Arc<SchedulerSet>,
    quota_mbs: u64,
    pub pacing_mode: PacingMode,
}

impl TxSessionHandle {
    pub fn close(&self) {
        self.session.close();
        self.scheduler.remove_unit(&self.name);
        if let Err(e) = self.scheduler_set.release(self.scheduler.lcore(), self.quota_mbs) {
            warn!("releasing scheduler quota for session {}: {e}", self.name);
        }
    }
}

pub struct RxSessionHandle {
    pub name: String,
    pub session: Arc<RxSession>,
    pub counters: Arc<SessionCounters>,
    pub scheduler: Arc<Scheduler>,
    scheduler_set: Arc<SchedulerSet>,
    quota_mbs: u64,
}

impl RxSessionHandle {
    pub fn try_recv(&self) -> Option<DeliveredItem> {
        self.session.try_recv()
    }

    pub fn close(&self) {
        self.scheduler.remove_unit(&self.name);
        if let Err(e) = self.scheduler_set.release(self.scheduler.lcore(), self.quota_mbs) {
            warn!("releasing scheduler quota for session {}: {e}", self.name);
        }
    }
}

struct TxPollUnit {
    name: String,
    driver: Arc<dyn NicDriver>,
    port: PortId,
    queue: crate::driver::QueueId,
    session: Arc<TxSession>,
    counters: Arc<SessionCounters>,
    payload_type: u8,
    seq: std::sync::atomic::AtomicU64,
    pacing: PacingMode,
}

impl PollUnit for TxPollUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&self) -> Result<u64> {
        let Some(idx) = self.session.get_next_frame() else {
            return Ok(0);
        };

        let pixel_group = self.session.pixel_group;
        let bytes_per_row = self.session.bytes_per_row;
        let max_chunk = (MAX_PACKET_PIXEL_BYTES / pixel_group.bytes).max(1) * pixel_group.bytes;
        let chunk_len = max_chunk.min(bytes_per_row).max(pixel_group.bytes);
        let mut total_bytes = 0u64;

        self.session.with_frame_mut(idx, |frame| -> Result<()> {
            let num_rows = frame.len() / bytes_per_row;
            for row in 0..num_rows {
                let row_start = row * bytes_per_row;
                let mut row_offset = 0usize;
                while row_offset < bytes_per_row {
                    let len = chunk_len.min(bytes_per_row - row_offset);
                    let offset = row_start + row_offset;
                    let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                    let marker = row == num_rows - 1 && row_offset + len >= bytes_per_row;

                    let seg = RowSegment {
                        field_id: false,
                        line_number: row as u16,
                        continuation: false,
                        offset: (row_offset / pixel_group.bytes * pixel_group.pixels) as u16,
                        length: len as u16,
                    };

                    let mut pkt = vec![0u8; RTP_HEADER_LEN + PAYLOAD_HEADER_LEN + ROW_HEADER_LEN + len];
                    RtpHeader {
                        marker,
                        payload_type: self.payload_type,
                        sequence_number: seq as u16,
                        timestamp: crate::metrics::now_ns() as u32,
                        ssrc: 0,
                    }
                    .pack(&mut pkt[..RTP_HEADER_LEN])?;
                    Rfc4175Payload::pack_header(
                        seq as u16,
                        &[seg],
                        &mut pkt[RTP_HEADER_LEN..RTP_HEADER_LEN + PAYLOAD_HEADER_LEN + ROW_HEADER_LEN],
                    )?;
                    pkt[RTP_HEADER_LEN + PAYLOAD_HEADER_LEN + ROW_HEADER_LEN..]
                        .copy_from_slice(&frame[offset..offset + len]);

                    self.driver.tx_burst(self.port, self.queue, &[&pkt])?;
                    total_bytes += pkt.len() as u64;
                    row_offset += len;
                }
            }
            Ok(())
        })??;

        self.session.notify_frame_done(idx)?;
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_sent.fetch_add(total_bytes, Ordering::Relaxed);
        let _ = self.pacing;
        Ok(total_bytes)
    }
}

struct RxPollUnit {
    name: String,
    driver: Arc<dyn NicDriver>,
    port: PortId,
    queue: crate::driver::QueueId,
    session: Arc<RxSession>,
    counters: Arc<SessionCounters>,
}

impl PollUnit for RxPollUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&self) -> Result<u64> {
        let mut bufs: Vec<Vec<u8>> = (0..32).map(|_| Vec::new()).collect();
        let n = self.driver.rx_burst(self.port, self.queue, &mut bufs)?;
        let mut total = 0u64;
        for pkt in bufs.into_iter().take(n) {
            total += pkt.len() as u64;
            match self.session.ingest_packet(&pkt) {
                Ok(()) => {}
                Err(EngineError::Busy) => {
                    self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.counters.bytes_received.fetch_add(total, Ordering::Relaxed);
        if n > 0 {
            self.counters.frames_received.fetch_add(0, Ordering::Relaxed);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::UdpNicDriver;

    fn engine() -> Arc<Engine> {
        let driver: Arc<dyn NicDriver> = Arc::new(UdpNicDriver::new(Ipv4Addr::LOCALHOST));
        let mut params = EngineParams::default();
        params.lcore_registry_path =
            std::env::temp_dir().join(format!("rvid-engine-test-{}.lcores", std::process::id()));
        Engine::create(driver, params).unwrap()
    }

    #[test]
    fn create_port_then_free_engine() {
        let eng = engine();
        eng.create_port(0, 2, 2).unwrap();
        eng.free().unwrap();
    }

    #[test]
    fn tx_and_rx_session_roundtrip_over_loopback() {
        let eng = engine();
        eng.create_port(0, 2, 2).unwrap();

        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        let rx_cfg = SessionConfig {
            width: 64,
            height: 2,
            fps: 59.94,
            pixel_group: PixelGroup::YUV422_10BIT,
            dest,
            payload_type: 112,
            lcore: None,
            rx_queue_capacity: 8,
            delivery_mode: DeliveryMode::Frame,
        };
        let rx = eng.create_rx_session(0, "rx0", rx_cfg).unwrap();

        // Actual dest port was chosen by the engine; fetch it back out by
        // re-deriving the bind port isn't exposed, so this test exercises
        // session creation and teardown rather than a live packet send —
        // the RTP/driver round trip is covered directly in rtp.rs and
        // driver.rs tests.
        assert_eq!(rx.session.frame_size(), rx_cfg_frame_size());
        rx.close();
        eng.free().unwrap();
    }

    fn rx_cfg_frame_size() -> usize {
        let pg = PixelGroup::YUV422_10BIT;
        64 * 2 / pg.pixels * pg.bytes
    }

    #[test]
    fn tx_poll_unit_emits_row_local_offsets_across_multiple_rows() {
        let driver: Arc<dyn NicDriver> = Arc::new(UdpNicDriver::new(Ipv4Addr::LOCALHOST));
        let listener = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let dest = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(v4) => v4,
            _ => unreachable!(),
        };

        driver.setup_tx_queue(0, 0).unwrap();
        driver.connect_tx_queue(0, 0, dest).unwrap();

        let pg = PixelGroup::YUV422_10BIT;
        let bytes_per_row = 20; // well under MAX_PACKET_PIXEL_BYTES, one packet per row
        let session = Arc::new(TxSession::new(bytes_per_row * 2, pg, bytes_per_row));
        let idx = session.acquire_frame().unwrap();
        session
            .with_frame_mut(idx, |frame| {
                for (i, b) in frame.iter_mut().enumerate() {
                    *b = i as u8;
                }
            })
            .unwrap();
        session.commit_frame(idx).unwrap();

        let unit = TxPollUnit {
            name: "tx-test".into(),
            driver: driver.clone(),
            port: 0,
            queue: 0,
            session: session.clone(),
            counters: Arc::new(SessionCounters::default()),
            payload_type: 112,
            seq: std::sync::atomic::AtomicU64::new(0),
            pacing: PacingMode::Tsc,
        };
        unit.poll().unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let mut buf = [0u8; 1500];
            let n = listener.recv(&mut buf).unwrap();
            let (payload, hdr_len) = Rfc4175Payload::unpack_header(&buf[RTP_HEADER_LEN..n]).unwrap();
            assert_eq!(payload.segments.len(), 1);
            let seg = payload.segments[0];
            let body_start = RTP_HEADER_LEN + hdr_len;
            seen.push((seg.line_number, seg.offset, buf[body_start]));
        }
        seen.sort_by_key(|(line, offset, _)| (*line, *offset));

        // Row 0 starts at byte 0, row 1 at byte 20 — each packet's first
        // payload byte should match the absolute frame offset its
        // row-local line_number/offset decode to.
        assert_eq!(seen[0], (0, 0, 0));
        assert_eq!(seen[1], (1, 0, 20));
    }
}
