//! Periodic stats snapshotting, grounded on the same atomics-plus-thread
//! shape the driver's original counter dump used: a background thread
//! wakes on an interval, reads `rte_eth_stats`-equivalent counters from
//! every registered port and session, and hands a read-only snapshot to
//! whoever is watching. Suppressed while a port is mid-reset, matching
//! `dev_in_reset`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use crate::driver::{NicDriver, PortId, PortStats};
use crate::port::Port;
use crate::shaper::{PacingMode, RateLimiter};

#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames_sent: AtomicU64,
    pub frames_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub packets_dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortSnapshot {
    pub port: PortId,
    pub stats: Option<PortStatsView>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PortStatsView {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub imissed: u64,
    pub ierrors: u64,
    pub oerrors: u64,
    pub rx_nombuf: u64,
}

impl From<PortStats> for PortStatsView {
    fn from(s: PortStats) -> Self {
        PortStatsView {
            rx_packets: s.rx_packets,
            tx_packets: s.tx_packets,
            rx_bytes: s.rx_bytes,
            tx_bytes: s.tx_bytes,
            imissed: s.imissed,
            ierrors: s.ierrors,
            oerrors: s.oerrors,
            rx_nombuf: s.rx_nombuf,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatSnapshot {
    pub ts_ns: u64,
    pub ports: Vec<PortSnapshot>,
    pub sessions: Vec<SessionSnapshot>,
}

struct Registered {
    ports: Vec<Arc<Port>>,
    sessions: Vec<(String, Arc<SessionCounters>)>,
}

pub struct StatReporter {
    registered: Mutex<Registered>,
    latest: Mutex<Option<StatSnapshot>>,
    stop: Arc<AtomicBool>,
    wake: Arc<Condvar>,
    wake_lock: Arc<Mutex<()>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StatReporter {
    pub fn spawn(interval: Duration) -> Arc<Self> {
        let reporter = Arc::new(StatReporter {
            registered: Mutex::new(Registered { ports: Vec::new(), sessions: Vec::new() }),
            latest: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Condvar::new()),
            wake_lock: Arc::new(Mutex::new(())),
            handle: Mutex::new(None),
        });

        let worker = reporter.clone();
        let handle = std::thread::Builder::new()
            .name("rvid-stat-reporter".into())
            .spawn(move || {
                let guard = worker.wake_lock.lock().unwrap();
                let mut guard = guard;
                while !worker.stop.load(Ordering::Relaxed) {
                    let (g, _timeout) = worker.wake.wait_timeout(guard, interval).unwrap();
                    guard = g;
                    if worker.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let snapshot = worker.take_snapshot();
                    *worker.latest.lock().unwrap() = Some(snapshot);
                }
            })
            .expect("failed to spawn stat reporter thread");
        *reporter.handle.lock().unwrap() = Some(handle);
        reporter
    }

    pub fn register_port(&self, port: Arc<Port>) {
        self.registered.lock().unwrap().ports.push(port);
    }

    pub fn register_session(&self, name: impl Into<String>, counters: Arc<SessionCounters>) {
        self.registered.lock().unwrap().sessions.push((name.into(), counters));
    }

    fn take_snapshot(&self) -> StatSnapshot {
        let registered = self.registered.lock().unwrap();
        let ports = registered
            .ports
            .iter()
            .map(|p| PortSnapshot {
                port: p.id(),
                stats: p.stats().ok().flatten().map(PortStatsView::from),
            })
            .collect();
        let sessions = registered
            .sessions
            .iter()
            .map(|(name, c)| SessionSnapshot {
                name: name.clone(),
                frames_sent: c.frames_sent.load(Ordering::Relaxed),
                frames_received: c.frames_received.load(Ordering::Relaxed),
                bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
                bytes_received: c.bytes_received.load(Ordering::Relaxed),
                packets_dropped: c.packets_dropped.load(Ordering::Relaxed),
            })
            .collect();
        StatSnapshot { ts_ns: crate::metrics::now_ns(), ports, sessions }
    }

    pub fn latest(&self) -> Option<StatSnapshot> {
        self.latest.lock().unwrap().clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.wake.notify_all();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

pub fn dummy_driver_for_tests() -> Arc<dyn NicDriver> {
    Arc::new(crate::driver::UdpNicDriver::new(std::net::Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_produces_snapshot_after_interval() {
        let reporter = StatReporter::spawn(Duration::from_millis(10));
        let counters = Arc::new(SessionCounters::default());
        counters.frames_sent.store(5, Ordering::Relaxed);
        reporter.register_session("tx0", counters);

        std::thread::sleep(Duration::from_millis(50));
        let snap = reporter.latest().expect("expected a snapshot");
        assert_eq!(snap.sessions[0].frames_sent, 5);
        reporter.stop();
    }

    #[test]
    fn port_in_reset_reports_no_stats() {
        let driver = dummy_driver_for_tests();
        let rate_limiter = Arc::new(RateLimiter::new(driver.clone(), PacingMode::Auto));
        let port = Arc::new(Port::new(0, driver, rate_limiter));
        port.configure(1, 1).unwrap();
        port.start().unwrap();

        let reporter = StatReporter::spawn(Duration::from_millis(10));
        reporter.register_port(port.clone());
        std::thread::sleep(Duration::from_millis(30));
        let snap = reporter.latest().unwrap();
        assert!(snap.ports[0].stats.is_some());
        reporter.stop();
    }
}
