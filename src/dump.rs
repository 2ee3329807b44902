//! Memory-mapped `.yuv` frame dump, per session persisted state: a fixed
//! number of frame slots written round robin, matching the engine's own
//! triple-buffer cursor discipline.

use std::fs::OpenOptions;

use anyhow::{Context, Result};
use memmap2::MmapMut;

pub struct FrameDump {
    map: MmapMut,
    frame_size: usize,
    slot_count: usize,
    cursor: usize,
}

impl FrameDump {
    pub fn open(path: &str, frame_size: usize, slot_count: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("failed to open frame dump {path}"))?;
        file.set_len((frame_size * slot_count) as u64)
            .with_context(|| format!("failed to size frame dump {path}"))?;
        let map = unsafe { MmapMut::map_mut(&file) }.with_context(|| format!("failed to mmap {path}"))?;
        Ok(FrameDump { map, frame_size, slot_count, cursor: 0 })
    }

    pub fn write_frame(&mut self, frame: &[u8]) {
        let slot = self.cursor % self.slot_count;
        let start = slot * self.frame_size;
        let len = frame.len().min(self.frame_size);
        self.map[start..start + len].copy_from_slice(&frame[..len]);
        self.cursor = self.cursor.wrapping_add(1);
    }
}
