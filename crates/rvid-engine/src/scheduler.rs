//! Scheduler: one pinned poll-loop thread per claimed lcore, running every
//! session assigned to it in round robin, under a shared bandwidth quota.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{EngineError, Result};
use crate::lcore::LcoreRegistry;

/// Anything the scheduler can poll: a TX or RX session's driving side.
pub trait PollUnit: Send + Sync {
    /// Runs one non-blocking iteration of work. Returns the number of
    /// bytes moved, for quota accounting.
    fn poll(&self) -> Result<u64>;
    fn name(&self) -> &str;
}

struct SchedulerInner {
    units: Mutex<Vec<Arc<dyn PollUnit>>>,
    /// Per-core bandwidth ceiling in Mb/s, shared by every session packed
    /// onto this scheduler. Also used as the poll loop's own byte-rate cap.
    quota_mbs: u64,
    /// Sum of the Mb/s each packed session was admitted with.
    allocated_mbs: AtomicU64,
    used_bytes_this_window: AtomicU64,
    stop: AtomicBool,
}

pub struct Scheduler {
    lcore: u32,
    inner: Arc<SchedulerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn spawn(lcore: u32, quota_mbs: u64) -> Self {
        let inner = Arc::new(SchedulerInner {
            units: Mutex::new(Vec::new()),
            quota_mbs,
            allocated_mbs: AtomicU64::new(0),
            used_bytes_this_window: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        });
        let worker = inner.clone();
        let handle = std::thread::Builder::new()
            .name(format!("rvid-sched-{lcore}"))
            .spawn(move || run_loop(worker))
            .expect("failed to spawn scheduler thread");
        Scheduler { lcore, inner, handle: Mutex::new(Some(handle)) }
    }

    pub fn lcore(&self) -> u32 {
        self.lcore
    }

    /// Mb/s still free on this scheduler before it hits `quota_mbs`.
    pub fn remaining_quota_mbs(&self) -> u64 {
        self.inner.quota_mbs.saturating_sub(self.inner.allocated_mbs.load(Ordering::Relaxed))
    }

    /// Admits a session requesting `mbs` of this scheduler's quota. Fails
    /// without mutating state if there isn't room.
    pub fn add_quota(&self, mbs: u64) -> Result<()> {
        loop {
            let cur = self.inner.allocated_mbs.load(Ordering::Relaxed);
            if cur.saturating_add(mbs) > self.inner.quota_mbs {
                return Err(EngineError::Busy);
            }
            if self
                .inner
                .allocated_mbs
                .compare_exchange(cur, cur + mbs, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Returns `mbs` of quota a closed session held back to the scheduler.
    pub fn free_quota(&self, mbs: u64) {
        self.inner
            .allocated_mbs
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| Some(cur.saturating_sub(mbs)))
            .ok();
    }

    pub fn add_unit(&self, unit: Arc<dyn PollUnit>) {
        self.inner.units.lock().unwrap().push(unit);
    }

    pub fn remove_unit(&self, name: &str) {
        self.inner.units.lock().unwrap().retain(|u| u.name() != name);
    }

    pub fn unit_count(&self) -> usize {
        self.inner.units.lock().unwrap().len()
    }

    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(inner: Arc<SchedulerInner>) {
    let quota_bytes = inner.quota_mbs.saturating_mul(1_000_000);
    let mut window_start = crate::metrics::now_ns();
    while !inner.stop.load(Ordering::Relaxed) {
        let units: Vec<Arc<dyn PollUnit>> = inner.units.lock().unwrap().clone();
        for unit in units {
            if inner.stop.load(Ordering::Relaxed) {
                break;
            }
            if quota_bytes > 0 && inner.used_bytes_this_window.load(Ordering::Relaxed) >= quota_bytes {
                continue;
            }
            if let Ok(moved) = unit.poll() {
                inner.used_bytes_this_window.fetch_add(moved, Ordering::Relaxed);
            }
        }
        let now = crate::metrics::now_ns();
        if now.saturating_sub(window_start) >= 1_000_000_000 {
            inner.used_bytes_this_window.store(0, Ordering::Relaxed);
            window_start = now;
        }
        std::thread::yield_now();
    }
}

/// Default per-core bandwidth ceiling used to pack sessions onto shared
/// schedulers, in Mb/s.
pub const DEFAULT_DATA_QUOTA_MBS: u64 = 26_000;

/// Owns every live `Scheduler`, keyed by lcore, and their refcounts so a
/// released session's lcore can be returned to the registry once no
/// session references it anymore.
pub struct SchedulerSet {
    registry: Arc<LcoreRegistry>,
    data_quota_mbs: u64,
    schedulers: Mutex<std::collections::HashMap<u32, (Arc<Scheduler>, usize)>>,
}

impl SchedulerSet {
    pub fn new(registry: Arc<LcoreRegistry>) -> Self {
        Self::with_quota(registry, DEFAULT_DATA_QUOTA_MBS)
    }

    pub fn with_quota(registry: Arc<LcoreRegistry>, data_quota_mbs: u64) -> Self {
        SchedulerSet { registry, data_quota_mbs, schedulers: Mutex::new(std::collections::HashMap::new()) }
    }

    /// Returns a scheduler with room for `requested_mbs` more of quota.
    ///
    /// With an explicit `lcore`, that lcore's scheduler is reused (or
    /// claimed fresh) regardless of quota headroom elsewhere — a pinned
    /// session always lands on its pinned core. Without one, the first
    /// existing scheduler with enough remaining quota is reused; only when
    /// none has room is a fresh lcore claimed and a new scheduler spawned
    /// with a full `data_quota_mbs` allowance.
    pub fn get_sch(&self, lcore: Option<u32>, min_lcore: u32, requested_mbs: u64) -> Result<Arc<Scheduler>> {
        let mut schedulers = self.schedulers.lock().unwrap();

        if let Some(lcore) = lcore {
            if let Some((sched, refs)) = schedulers.get_mut(&lcore) {
                sched.add_quota(requested_mbs)?;
                *refs += 1;
                return Ok(sched.clone());
            }
            let claimed = self.registry.claim(Some(lcore), min_lcore)?;
            let sched = Arc::new(Scheduler::spawn(claimed, self.data_quota_mbs));
            sched.add_quota(requested_mbs)?;
            schedulers.insert(claimed, (sched.clone(), 1));
            return Ok(sched);
        }

        for (sched, refs) in schedulers.values_mut() {
            if sched.add_quota(requested_mbs).is_ok() {
                *refs += 1;
                return Ok(sched.clone());
            }
        }

        let claimed = self.registry.claim(None, min_lcore)?;
        let sched = Arc::new(Scheduler::spawn(claimed, self.data_quota_mbs));
        sched.add_quota(requested_mbs)?;
        schedulers.insert(claimed, (sched.clone(), 1));
        Ok(sched)
    }

    /// Frees `mbs` of quota held by a closed session and drops the
    /// scheduler's refcount, releasing its lcore back to the registry once
    /// nothing references it anymore.
    pub fn release(&self, lcore: u32, mbs: u64) -> Result<()> {
        let mut schedulers = self.schedulers.lock().unwrap();
        let remove = match schedulers.get_mut(&lcore) {
            Some((sched, refs)) => {
                sched.free_quota(mbs);
                *refs -= 1;
                *refs == 0
            }
            None => return Err(EngineError::NotFound(format!("scheduler for lcore {lcore}"))),
        };
        if remove {
            schedulers.remove(&lcore);
            self.registry.release(lcore)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingUnit {
        name: String,
        calls: Arc<AtomicUsize>,
    }

    impl PollUnit for CountingUnit {
        fn poll(&self) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(0)
        }
        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn scheduler_polls_added_units() {
        let sched = Scheduler::spawn(0, 0);
        let calls = Arc::new(AtomicUsize::new(0));
        sched.add_unit(Arc::new(CountingUnit { name: "a".into(), calls: calls.clone() }));
        std::thread::sleep(std::time::Duration::from_millis(50));
        sched.stop();
        assert!(calls.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn remove_unit_stops_polling_it() {
        let sched = Scheduler::spawn(0, 0);
        sched.add_unit(Arc::new(CountingUnit { name: "a".into(), calls: Arc::new(AtomicUsize::new(0)) }));
        assert_eq!(sched.unit_count(), 1);
        sched.remove_unit("a");
        assert_eq!(sched.unit_count(), 0);
        sched.stop();
    }

    #[test]
    fn scheduler_set_refcounts_lcore() {
        let path = std::env::temp_dir().join(format!("rvid-engine-test-sched-set-{}", std::process::id()));
        let registry = Arc::new(LcoreRegistry::open(&path).unwrap());
        let set = SchedulerSet::new(registry);
        let s1 = set.get_sch(Some(5), 0, 0).unwrap();
        let s2 = set.get_sch(Some(5), 0, 0).unwrap();
        assert_eq!(s1.lcore(), s2.lcore());
        set.release(5, 0).unwrap();
        set.release(5, 0).unwrap();
        assert!(set.release(5, 0).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn get_sch_packs_sessions_until_quota_exhausted() {
        let path = std::env::temp_dir().join(format!("rvid-engine-test-sched-quota-{}", std::process::id()));
        let registry = Arc::new(LcoreRegistry::open(&path).unwrap());
        let set = SchedulerSet::with_quota(registry, 5000);

        // Six sessions at ~2488 Mb/s each (1080p60 YUV 4:2:2 10-bit): two
        // fit per scheduler (4976 <= 5000), a third would not (7464 > 5000).
        let mut lcores = std::collections::HashSet::new();
        for _ in 0..6 {
            let sched = set.get_sch(None, 0, 2488).unwrap();
            lcores.insert(sched.lcore());
        }
        assert_eq!(lcores.len(), 3);
        let _ = std::fs::remove_file(&path);
    }
}
