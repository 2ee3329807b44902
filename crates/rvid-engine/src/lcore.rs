//! Cross-process lcore (logical core) registry.
//!
//! Multiple engine processes on the same host must agree on which CPU
//! cores are claimed. A fixed-size bitmap in a memory-mapped file, guarded
//! by an advisory `flock`, stands in for the System-V shared-memory segment
//! a DPDK-based implementation would use — same contract (one bit per
//! lcore, cleared on graceful release, arbitrated across processes),
//! realized with the mmap/file-lock primitives already linked into this
//! crate rather than a second IPC mechanism.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{EngineError, Result};

const MAX_LCORES: usize = 128;
const BITMAP_BYTES: usize = MAX_LCORES / 8;

pub struct LcoreRegistry {
    path: PathBuf,
    file: std::fs::File,
    map: std::sync::Mutex<MmapMut>,
}

impl LcoreRegistry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(EngineError::Io)?;
        file.set_len(BITMAP_BYTES as u64).map_err(EngineError::Io)?;
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(EngineError::Io)?;
        Ok(LcoreRegistry { path, file, map: std::sync::Mutex::new(map) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_lock<T>(&self, f: impl FnOnce(&mut MmapMut) -> Result<T>) -> Result<T> {
        let fd = self.file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc != 0 {
            return Err(EngineError::LockFailed(std::io::Error::last_os_error().to_string()));
        }
        let mut map = self.map.lock().unwrap();
        let result = f(&mut map);
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
        result
    }

    /// Claims the first free lcore at or above `min_lcore`, or a specific
    /// lcore if `want` is given. Returns `NoLcoreAvailable` if exhausted.
    pub fn claim(&self, want: Option<u32>, min_lcore: u32) -> Result<u32> {
        self.with_lock(|map| {
            if let Some(lcore) = want {
                if lcore as usize >= MAX_LCORES {
                    return Err(EngineError::InvalidArgument(format!("lcore {lcore} out of range")));
                }
                if test_bit(map, lcore as usize) {
                    return Err(EngineError::AlreadyExists(format!("lcore {lcore}")));
                }
                set_bit(map, lcore as usize);
                return Ok(lcore);
            }
            for lcore in min_lcore as usize..MAX_LCORES {
                if !test_bit(map, lcore) {
                    set_bit(map, lcore);
                    return Ok(lcore as u32);
                }
            }
            Err(EngineError::NoLcoreAvailable)
        })
    }

    /// Releasing an lcore that isn't currently claimed is an error rather
    /// than a no-op — it means the caller's bookkeeping has drifted from
    /// the registry's.
    pub fn release(&self, lcore: u32) -> Result<()> {
        self.with_lock(|map| {
            if lcore as usize >= MAX_LCORES {
                return Err(EngineError::InvalidArgument(format!("lcore {lcore} out of range")));
            }
            if !test_bit(map, lcore as usize) {
                return Err(EngineError::NotFound(format!("lcore {lcore} is not claimed")));
            }
            clear_bit(map, lcore as usize);
            Ok(())
        })
    }

    pub fn is_claimed(&self, lcore: u32) -> Result<bool> {
        self.with_lock(|map| Ok(test_bit(map, lcore as usize)))
    }
}

fn test_bit(map: &MmapMut, bit: usize) -> bool {
    map[bit / 8] & (1 << (bit % 8)) != 0
}

fn set_bit(map: &mut MmapMut, bit: usize) {
    map[bit / 8] |= 1 << (bit % 8);
}

fn clear_bit(map: &mut MmapMut, bit: usize) {
    map[bit / 8] &= !(1 << (bit % 8));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rvid-engine-test-{}-{}", name, std::process::id()))
    }

    #[test]
    fn claim_and_release_round_trip() {
        let path = temp_path("claim-release");
        let reg = LcoreRegistry::open(&path).unwrap();
        let lcore = reg.claim(None, 0).unwrap();
        assert!(reg.is_claimed(lcore).unwrap());
        reg.release(lcore).unwrap();
        assert!(!reg.is_claimed(lcore).unwrap());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn claiming_specific_lcore_twice_fails() {
        let path = temp_path("double-claim");
        let reg = LcoreRegistry::open(&path).unwrap();
        reg.claim(Some(3), 0).unwrap();
        assert!(matches!(reg.claim(Some(3), 0), Err(EngineError::AlreadyExists(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn releasing_unclaimed_lcore_errors() {
        let path = temp_path("release-unclaimed");
        let reg = LcoreRegistry::open(&path).unwrap();
        assert!(matches!(reg.release(7), Err(EngineError::NotFound(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn exhausting_all_lcores_errors() {
        let path = temp_path("exhaust");
        let reg = LcoreRegistry::open(&path).unwrap();
        for _ in 0..MAX_LCORES {
            reg.claim(None, 0).unwrap();
        }
        assert!(matches!(reg.claim(None, 0), Err(EngineError::NoLcoreAvailable)));
        let _ = std::fs::remove_file(&path);
    }
}
