//! `rvidctl rx <session>` — run a single RX session until Ctrl-C.

use anyhow::{bail, Context, Result};
use std::time::Duration;

use rvid_engine::DeliveredItem;

use crate::config::{EngineConfig, SessionRole};
use crate::dump::FrameDump;
use crate::engine_setup::{build_engine, ensure_ports, start_session, SessionHandle};
use crate::signal;

pub fn run(config: &EngineConfig, session_name: &str) -> Result<()> {
    let entry = config
        .sessions
        .iter()
        .find(|s| s.name == session_name && s.role == SessionRole::Rx)
        .with_context(|| format!("no rx session named '{session_name}' in config"))?;

    let engine = build_engine(config)?;
    ensure_ports(&engine, config)?;
    let handle = start_session(&engine, entry)?;
    let rx = match &handle {
        SessionHandle::Rx(h) => h.clone(),
        SessionHandle::Tx(_) => bail!("session '{session_name}' is not an rx session"),
    };

    let mut dump = match &entry.dump_path {
        Some(path) => Some(FrameDump::open(path, rx.session.frame_size(), 8)?),
        None => None,
    };

    signal::install();
    eprintln!(
        "rvidctl rx {session_name} — listening on {}:{}, Ctrl-C to stop",
        entry.dest_addr, entry.dest_port
    );

    let mut frames = 0u64;
    while signal::running() {
        match rx.try_recv() {
            Some(DeliveredItem::Frame(buf)) => {
                frames += 1;
                if let Some(d) = dump.as_mut() {
                    d.write_frame(&buf);
                }
            }
            Some(DeliveredItem::RtpPacket(_)) => {
                frames += 1;
            }
            None => std::thread::sleep(Duration::from_millis(5)),
        }
    }

    eprintln!("rvidctl rx {session_name} — received {frames} item(s)");
    handle.close();
    engine.free()?;
    Ok(())
}
