//! TX session: the producer/consumer frame-buffer protocol between a
//! session's application thread (the producer, writes full video frames)
//! and the scheduler's poll loop (the consumer, packetizes and transmits).
//!
//! Three frame slots, tracked with a free-mask and a ready-mask behind one
//! mutex + condvar. The producer blocks in `acquire_frame` until a slot is
//! free — this is the drain-before-refill discipline: a slot only becomes
//! free again after the poll loop has fully transmitted it and called
//! `notify_frame_done`, so the producer can never overwrite a frame still
//! in flight. The poll loop's `get_next_frame`/`notify_frame_done` pair
//! never blocks: with nothing ready, `get_next_frame` returns `None`
//! immediately (the sentinel the scheduler treats as "nothing to do this
//! tick").

use std::sync::{Condvar, Mutex};

use crate::error::{EngineError, Result};
use crate::rtp::PixelGroup;

const SLOT_COUNT: usize = 3;

struct RingState {
    slots: [Vec<u8>; SLOT_COUNT],
    free_mask: u8,
    ready_mask: u8,
    inflight_mask: u8,
    next_write: usize,
    next_read: usize,
    closed: bool,
}

pub struct TxSession {
    state: Mutex<RingState>,
    cond: Condvar,
    frame_size: usize,
    pub pixel_group: PixelGroup,
    /// Octets per scan row, per the pixel-group descriptor and configured
    /// width — packetization chunks within a row and never crosses a row
    /// boundary, so the RFC 4175 row header's offset field stays row-local.
    pub bytes_per_row: usize,
}

impl TxSession {
    pub fn new(frame_size: usize, pixel_group: PixelGroup, bytes_per_row: usize) -> Self {
        TxSession {
            state: Mutex::new(RingState {
                slots: std::array::from_fn(|_| vec![0u8; frame_size]),
                free_mask: (1 << SLOT_COUNT) - 1,
                ready_mask: 0,
                inflight_mask: 0,
                next_write: 0,
                next_read: 0,
                closed: false,
            }),
            cond: Condvar::new(),
            frame_size,
            pixel_group,
            bytes_per_row,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Producer side. Blocks until a slot is free, claims it, and returns
    /// its index. Never returns the same index as an in-flight or ready
    /// slot — that invariant is the whole point of the free-mask.
    pub fn acquire_frame(&self) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(EngineError::NotFound("session closed".into()));
            }
            let idx = state.next_write % SLOT_COUNT;
            if state.free_mask & (1 << idx) != 0 {
                state.free_mask &= !(1 << idx);
                state.next_write += 1;
                return Ok(idx);
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Gives the producer mutable access to an acquired slot's frame
    /// buffer to write into before calling `commit_frame`.
    pub fn with_frame_mut<T>(&self, idx: usize, f: impl FnOnce(&mut [u8]) -> T) -> Result<T> {
        if idx >= SLOT_COUNT {
            return Err(EngineError::InvalidArgument(format!("slot index {idx} out of range")));
        }
        let mut state = self.state.lock().unwrap();
        Ok(f(&mut state.slots[idx]))
    }

    /// Producer side. Marks a slot ready for transmission and wakes up
    /// anyone waiting on the free mask (there is never anyone waiting on
    /// the ready mask — the poll loop polls, it doesn't block).
    pub fn commit_frame(&self, idx: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ready_mask |= 1 << idx;
        self.cond.notify_all();
        Ok(())
    }

    /// Poll-loop side, non-blocking. Returns the lowest-indexed ready slot
    /// in FIFO order (the producer always writes round robin, so index
    /// order is arrival order), or `None` if nothing is ready.
    pub fn get_next_frame(&self) -> Option<usize> {
        let mut state = self.state.lock().unwrap();
        for offset in 0..SLOT_COUNT {
            let idx = (state.next_read + offset) % SLOT_COUNT;
            if state.ready_mask & (1 << idx) != 0 {
                state.ready_mask &= !(1 << idx);
                state.inflight_mask |= 1 << idx;
                state.next_read = idx + 1;
                return Some(idx);
            }
        }
        None
    }

    /// Poll-loop side, non-blocking. Frees a slot after transmission
    /// completes and wakes any producer blocked in `acquire_frame`.
    pub fn notify_frame_done(&self, idx: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.inflight_mask & (1 << idx) == 0 {
            return Err(EngineError::InvalidArgument(format!("slot {idx} was not in flight")));
        }
        state.inflight_mask &= !(1 << idx);
        state.free_mask |= 1 << idx;
        self.cond.notify_all();
        Ok(())
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn get_next_frame_returns_none_sentinel_when_empty() {
        let tx = TxSession::new(1024, PixelGroup::YUV422_10BIT, 1024);
        assert_eq!(tx.get_next_frame(), None);
    }

    #[test]
    fn acquire_commit_consume_round_trip() {
        let tx = TxSession::new(1024, PixelGroup::YUV422_10BIT, 1024);
        let idx = tx.acquire_frame().unwrap();
        tx.commit_frame(idx).unwrap();
        let got = tx.get_next_frame().unwrap();
        assert_eq!(got, idx);
        assert_eq!(tx.get_next_frame(), None);
        tx.notify_frame_done(got).unwrap();
    }

    #[test]
    fn producer_blocks_until_slot_freed() {
        let tx = Arc::new(TxSession::new(64, PixelGroup::YUV422_10BIT, 64));
        // Exhaust all three slots.
        let mut acquired = Vec::new();
        for _ in 0..3 {
            let idx = tx.acquire_frame().unwrap();
            tx.commit_frame(idx).unwrap();
            acquired.push(tx.get_next_frame().unwrap());
        }
        assert_eq!(tx.get_next_frame(), None);

        let tx2 = tx.clone();
        let handle = std::thread::spawn(move || tx2.acquire_frame().unwrap());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        tx.notify_frame_done(acquired[0]).unwrap();
        let idx = handle.join().unwrap();
        assert_eq!(idx, acquired[0]);
    }

    #[test]
    fn fifo_order_preserved_across_multiple_ready_frames() {
        let tx = TxSession::new(64, PixelGroup::YUV422_10BIT, 64);
        let a = tx.acquire_frame().unwrap();
        tx.commit_frame(a).unwrap();
        let b = tx.acquire_frame().unwrap();
        tx.commit_frame(b).unwrap();
        assert_eq!(tx.get_next_frame(), Some(a));
        assert_eq!(tx.get_next_frame(), Some(b));
    }

    #[test]
    fn notify_done_on_non_inflight_slot_errors() {
        let tx = TxSession::new(64, PixelGroup::YUV422_10BIT, 64);
        assert!(tx.notify_frame_done(0).is_err());
    }

    #[test]
    fn close_unblocks_waiting_producer() {
        let tx = Arc::new(TxSession::new(64, PixelGroup::YUV422_10BIT, 64));
        for _ in 0..3 {
            let idx = tx.acquire_frame().unwrap();
            tx.commit_frame(idx).unwrap();
        }
        let tx2 = tx.clone();
        let handle = std::thread::spawn(move || tx2.acquire_frame());
        std::thread::sleep(Duration::from_millis(20));
        tx.close();
        assert!(handle.join().unwrap().is_err());
    }
}
