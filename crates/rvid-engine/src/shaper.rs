//! Rate limiting: a hierarchical shaper tree per port, shaper profiles
//! interned by bits-per-second so two sessions asking for the same rate
//! share one hardware profile, and a pacing-mode fallback ladder
//! (`Auto` tries hardware rate limiting, falls back to a software
//! busy-wait clock when the driver has none — see `UdpNicDriver`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::driver::{NicDriver, PortId, ShaperHandle, ShaperProfile};
use crate::error::{EngineError, Result};

const MAX_SHAPERS_PER_PORT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingMode {
    Auto,
    Rl,
    Tsc,
}

impl PacingMode {
    fn to_u8(self) -> u8 {
        match self {
            PacingMode::Auto => 0,
            PacingMode::Rl => 1,
            PacingMode::Tsc => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => PacingMode::Rl,
            2 => PacingMode::Tsc,
            _ => PacingMode::Auto,
        }
    }
}

struct PortShapers {
    by_bps: HashMap<u64, ShaperHandle>,
}

pub struct RateLimiter {
    driver: Arc<dyn NicDriver>,
    ports: Mutex<HashMap<PortId, PortShapers>>,
    mode: AtomicU8,
    mode_latched: std::sync::atomic::AtomicBool,
}

impl RateLimiter {
    pub fn new(driver: Arc<dyn NicDriver>, requested_mode: PacingMode) -> Self {
        RateLimiter {
            driver,
            ports: Mutex::new(HashMap::new()),
            mode: AtomicU8::new(requested_mode.to_u8()),
            mode_latched: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn requested_mode(&self) -> PacingMode {
        PacingMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    /// The mode actually in effect, decided the first time a shaper is
    /// requested. Stays fixed afterward, even if later calls ask for a
    /// different rate on the same port.
    pub fn effective_mode(&self) -> Option<PacingMode> {
        if self.mode_latched.load(Ordering::Relaxed) {
            Some(self.requested_mode())
        } else {
            None
        }
    }

    fn latch(&self, mode: PacingMode) {
        self.mode.store(mode.to_u8(), Ordering::Relaxed);
        self.mode_latched.store(true, Ordering::Relaxed);
    }

    /// Interns a shaper for `bps` on `port`, installing it in the driver's
    /// hierarchy only the first time this rate is requested. Returns the
    /// pacing mode actually used: `Rl` if the driver accepted the profile,
    /// `Tsc` if it didn't (per `Auto`'s fallback contract) or if the caller
    /// requested `Tsc` directly.
    pub fn get_or_create_shaper(&self, port: PortId, bps: u64) -> Result<PacingMode> {
        if bps == 0 {
            return Err(EngineError::InvalidArgument("shaper rate must be nonzero".into()));
        }
        let requested = self.requested_mode();
        if requested == PacingMode::Tsc {
            self.latch(PacingMode::Tsc);
            return Ok(PacingMode::Tsc);
        }

        let mut ports = self.ports.lock().unwrap();
        let entry = ports.entry(port).or_insert_with(|| PortShapers { by_bps: HashMap::new() });

        if let Some(_handle) = entry.by_bps.get(&bps) {
            let mode = self.effective_mode().unwrap_or(PacingMode::Tsc);
            return Ok(mode);
        }

        if entry.by_bps.len() >= MAX_SHAPERS_PER_PORT {
            return Err(EngineError::OutOfMemory { what: "shaper profile table" });
        }

        match self.install_hardware_shaper(port, bps) {
            Ok(handle) => {
                entry.by_bps.insert(bps, handle);
                self.latch(PacingMode::Rl);
                Ok(PacingMode::Rl)
            }
            Err(e) if requested == PacingMode::Rl => Err(e),
            Err(_) => {
                self.latch(PacingMode::Tsc);
                Ok(PacingMode::Tsc)
            }
        }
    }

    /// Rates currently interned for `port`, for replay across a port
    /// reset. Order is unspecified.
    pub fn snapshot_rates(&self, port: PortId) -> Vec<u64> {
        self.ports.lock().unwrap().get(&port).map(|p| p.by_bps.keys().copied().collect()).unwrap_or_default()
    }

    /// Drops this port's interned shaper handles. The caller is
    /// responsible for having already reset the port's own hardware
    /// shaper hierarchy — this only clears our bookkeeping of it.
    pub fn clear_port(&self, port: PortId) {
        self.ports.lock().unwrap().remove(&port);
    }

    fn install_hardware_shaper(&self, port: PortId, bps: u64) -> Result<ShaperHandle> {
        if !self.driver.supports_hardware_rate_limit() {
            return Err(EngineError::ShaperInstallFailed("driver has no hardware rate limiter".into()));
        }
        let handle = self.driver.shaper_profile_add(port, &ShaperProfile { bps })?;
        self.driver.hierarchy_node_add(port, None, handle)?;
        self.driver.hierarchy_commit(port)?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::UdpNicDriver;
    use std::net::Ipv4Addr;

    fn limiter(mode: PacingMode) -> RateLimiter {
        let driver: Arc<dyn NicDriver> = Arc::new(UdpNicDriver::new(Ipv4Addr::LOCALHOST));
        RateLimiter::new(driver, mode)
    }

    #[test]
    fn auto_falls_back_to_tsc_without_hardware() {
        let rl = limiter(PacingMode::Auto);
        let mode = rl.get_or_create_shaper(0, 1_000_000_000).unwrap();
        assert_eq!(mode, PacingMode::Tsc);
        assert_eq!(rl.effective_mode(), Some(PacingMode::Tsc));
    }

    #[test]
    fn explicit_rl_fails_without_hardware() {
        let rl = limiter(PacingMode::Rl);
        assert!(rl.get_or_create_shaper(0, 1_000_000_000).is_err());
    }

    #[test]
    fn same_bps_interned_idempotently() {
        let rl = limiter(PacingMode::Auto);
        rl.get_or_create_shaper(0, 2_000_000_000).unwrap();
        let mode = rl.get_or_create_shaper(0, 2_000_000_000).unwrap();
        assert_eq!(mode, PacingMode::Tsc);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let rl = limiter(PacingMode::Auto);
        assert!(rl.get_or_create_shaper(0, 0).is_err());
    }
}
