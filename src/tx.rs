//! `rvidctl tx <session>` — run a single TX session until Ctrl-C.
//!
//! There is no video capture device in scope, so the producer thread fills
//! each acquired frame with a moving test pattern — enough to exercise the
//! full pacing/packetization path end to end.

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::config::{EngineConfig, SessionRole};
use crate::engine_setup::{build_engine, ensure_ports, start_session, SessionHandle};
use crate::signal;

pub fn run(config: &EngineConfig, session_name: &str) -> Result<()> {
    let entry = config
        .sessions
        .iter()
        .find(|s| s.name == session_name && s.role == SessionRole::Tx)
        .with_context(|| format!("no tx session named '{session_name}' in config"))?;

    let engine = build_engine(config)?;
    ensure_ports(&engine, config)?;
    let handle = start_session(&engine, entry)?;
    let tx = match &handle {
        SessionHandle::Tx(h) => h.clone(),
        SessionHandle::Rx(_) => bail!("session '{session_name}' is not a tx session"),
    };

    signal::install();
    eprintln!(
        "rvidctl tx {session_name} — {}x{} @ {:.2}fps -> {} (pacing={:?}), Ctrl-C to stop",
        entry.width, entry.height, entry.fps, entry.dest_addr, tx.pacing_mode
    );

    let frame_interval = Duration::from_secs_f64(1.0 / entry.fps.max(1.0));
    let mut pattern: u8 = 0;
    while signal::running() {
        let idx = tx.session.acquire_frame()?;
        tx.session.with_frame_mut(idx, |buf| buf.fill(pattern))?;
        tx.session.commit_frame(idx)?;
        pattern = pattern.wrapping_add(1);
        std::thread::sleep(frame_interval);
    }

    handle.close();
    engine.free()?;
    Ok(())
}
