//! `rvidctl run` — background daemon running every configured session and
//! writing periodic stats snapshots to a JSONL log. Use `rvidctl status` to
//! query the log, or `rvidctl service install` to manage via systemd.

use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::EngineConfig;
use crate::engine_setup::{build_engine, start_all_sessions};
use crate::signal;

pub const DEFAULT_LOG: &str = "/var/log/rvidctl.jsonl";

#[derive(Serialize)]
struct LogEntry {
    ts: u64,
    started_at: u64,
    snapshot: rvid_engine::StatSnapshot,
}

pub fn run(config: &EngineConfig, interval_secs: u64, log_path: PathBuf) -> Result<()> {
    if config.sessions.is_empty() {
        anyhow::bail!("no sessions configured — run `rvidctl init > sessions.toml` first");
    }

    eprintln!(
        "rvidctl run — {} session(s), logging to {} every {}s",
        config.sessions.len(),
        log_path.display(),
        interval_secs
    );

    let engine = build_engine(config)?;
    let handles = start_all_sessions(&engine, config)?;

    signal::install();
    let started_at = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();

    if let Ok(f) = std::fs::File::create(&log_path) {
        drop(f);
    }

    while signal::running() {
        std::thread::sleep(Duration::from_secs(interval_secs));
        if let Some(snapshot) = engine.latest_stats() {
            let entry = LogEntry {
                ts: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
                started_at,
                snapshot,
            };
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
                if let Ok(line) = serde_json::to_string(&entry) {
                    let _ = writeln!(file, "{}", line);
                }
            }
        }
    }

    for h in &handles {
        h.close();
    }
    engine.free()?;
    Ok(())
}
