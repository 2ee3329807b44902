//! `rvidctl bench` — timed benchmark with structured JSON output.
//!
//! Runs every configured session for a fixed duration, then emits a JSON
//! report with per-session throughput and drop counts.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::engine_setup::{build_engine, start_all_sessions};

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub duration_secs: u64,
    pub sessions: Vec<SessionReport>,
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub name: String,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_per_sec: f64,
    pub bytes_sent_mb: f64,
    pub bytes_received_mb: f64,
    pub packets_dropped: u64,
}

pub fn run(config: &EngineConfig, duration_secs: u64, output: Option<PathBuf>) -> Result<()> {
    if config.sessions.is_empty() {
        anyhow::bail!("no sessions configured — run `rvidctl init > sessions.toml` to create a config");
    }

    eprintln!(
        "rvidctl bench — running for {}s with {} session(s)...",
        duration_secs,
        config.sessions.len()
    );

    let engine = build_engine(config)?;
    let handles = start_all_sessions(&engine, config)?;

    let start = Instant::now();
    let target = Duration::from_secs(duration_secs);

    let mut next_tick = 10u64;
    while start.elapsed() < target {
        std::thread::sleep(Duration::from_secs(1));
        let elapsed = start.elapsed().as_secs();
        if elapsed >= next_tick {
            eprintln!("  ...{}s / {}s", elapsed, duration_secs);
            next_tick += 10;
        }
    }

    let elapsed_secs = start.elapsed().as_secs_f64().max(0.001);
    let snapshot = engine.latest_stats();
    let sessions: Vec<SessionReport> = snapshot
        .map(|s| s.sessions.into_iter().map(|s| session_report(&s, elapsed_secs)).collect())
        .unwrap_or_default();

    let report = BenchReport { duration_secs, sessions };
    let json = serde_json::to_string_pretty(&report)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json)?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    eprintln!();
    eprintln!("=== BENCH SUMMARY ({:.0}s) ===", elapsed_secs);
    for s in &report.sessions {
        eprintln!(
            "  {}  frames/s={:.1}  sent={}MB  recv={}MB  dropped={}",
            s.name, s.frames_per_sec, s.bytes_sent_mb as u64, s.bytes_received_mb as u64, s.packets_dropped
        );
    }

    for h in &handles {
        h.close();
    }
    engine.free()?;
    Ok(())
}

fn session_report(s: &rvid_engine::SessionSnapshot, elapsed_secs: f64) -> SessionReport {
    SessionReport {
        name: s.name.clone(),
        frames_sent: s.frames_sent,
        frames_received: s.frames_received,
        frames_per_sec: s.frames_sent as f64 / elapsed_secs,
        bytes_sent_mb: s.bytes_sent as f64 / 1_048_576.0,
        bytes_received_mb: s.bytes_received as f64 / 1_048_576.0,
        packets_dropped: s.packets_dropped,
    }
}
