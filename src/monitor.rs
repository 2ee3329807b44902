//! `rvidctl monitor` — live dashboard reading from the service metrics log.
//!
//! This command is a read-only view. It reads the JSONL log written by
//! `rvidctl run` / `rvidctl service start` and redraws the dashboard every
//! N seconds. Ctrl-C closes the view; the background service keeps running.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::io::Write;

use crate::color;
use crate::run::DEFAULT_LOG;
use crate::signal;

fn log_has_data() -> bool {
    std::fs::metadata(DEFAULT_LOG).map(|m| m.len() > 0).unwrap_or(false)
}

pub fn run(interval_secs: u64) -> Result<()> {
    if std::fs::metadata(DEFAULT_LOG).is_err() {
        eprintln!("No metrics log found at {}.", DEFAULT_LOG);
        eprintln!();
        eprintln!("Start the background service first:");
        eprintln!("  rvidctl service start");
        eprintln!();
        eprintln!("Then run `rvidctl monitor` again.");
        return Ok(());
    }

    if !log_has_data() {
        println!("{}", color::yellow("Service recently started — monitor will appear in under 30s..."));
        let mut waited = 0u32;
        loop {
            std::thread::sleep(std::time::Duration::from_secs(5));
            waited += 5;
            if log_has_data() {
                print!("\x1b[1A\x1b[2K");
                break;
            }
            if waited >= 30 {
                println!(
                    "{}",
                    color::yellow("Service is taking longer than expected. Check: rvidctl service status")
                );
                return Ok(());
            }
        }
    }

    signal::install();

    println!("{}", color::bold("RVIDCTL MONITOR  —  Ctrl-C to close  (service keeps running)"));
    println!();

    let mut lines_drawn = 0usize;

    while signal::running() {
        let snapshot = read_last_entry(DEFAULT_LOG);

        if lines_drawn > 0 {
            print!("\x1b[{}A\x1b[0J", lines_drawn);
        }

        lines_drawn = match snapshot {
            Some(entry) => draw_dashboard(&entry),
            None => {
                println!("Waiting for first snapshot...");
                1
            }
        };
        std::io::stdout().flush().ok();

        let mut waited = 0u64;
        while waited < interval_secs && signal::running() {
            std::thread::sleep(std::time::Duration::from_secs(1));
            waited += 1;
        }
    }

    println!();
    println!("View closed.  Service is still running in the background.");
    println!("  rvidctl status  — check metrics any time");

    Ok(())
}

fn read_last_entry(path: &str) -> Option<serde_json::Value> {
    let content = std::fs::read_to_string(path).ok()?;
    let line = content.lines().filter(|l| !l.is_empty()).last()?;
    serde_json::from_str(line).ok()
}

fn draw_dashboard(entry: &serde_json::Value) -> usize {
    const W: usize = 100;
    let mut out: Vec<String> = Vec::new();

    let ts = entry["ts"].as_u64().unwrap_or(0) as i64;
    let time_str = Utc
        .timestamp_opt(ts, 0)
        .single()
        .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "—".into());

    let started_at = entry["started_at"].as_u64().unwrap_or(0) as i64;
    let (started_str, uptime_str) = uptime_strings(ts, started_at);

    out.push(color::bold(&"=".repeat(W)));
    out.push(color::bold_cyan(&format!("{:^W$}", format!("  RVIDCTL SESSIONS  {}  ", time_str))));
    out.push(color::bold(&"=".repeat(W)));
    out.push(color::dim(&format!("  Started: {}   Uptime: {}", started_str, uptime_str)));
    out.push(String::new());

    out.push(color::bold(&format!(
        "{:<16}  {:>10}  {:>10}  {:>10}  {:>10}  {:>8}",
        "SESSION", "FRAMES TX", "FRAMES RX", "SENT MB", "RECV MB", "DROPPED",
    )));
    out.push(color::dim(&"-".repeat(W)));

    if let Some(sessions) = entry["snapshot"]["sessions"].as_array() {
        for s in sessions {
            let name = s["name"].as_str().unwrap_or("?");
            let sent = s["bytes_sent"].as_u64().unwrap_or(0) as f64 / 1_048_576.0;
            let recv = s["bytes_received"].as_u64().unwrap_or(0) as f64 / 1_048_576.0;
            let dropped = s["packets_dropped"].as_u64().unwrap_or(0);
            let row = format!(
                "{:<16}  {:>10}  {:>10}  {:>10.1}  {:>10.1}  {:>8}",
                name,
                s["frames_sent"].as_u64().unwrap_or(0),
                s["frames_received"].as_u64().unwrap_or(0),
                sent,
                recv,
                dropped,
            );
            out.push(if dropped > 0 { color::yellow(&row) } else { color::green(&row) });
        }
    } else {
        out.push(color::dim("  (no sessions reporting yet)"));
    }

    out.push(color::dim(&"-".repeat(W)));
    out.push(String::new());

    if let Some(ports) = entry["snapshot"]["ports"].as_array() {
        out.push(color::bold("PORTS:"));
        for p in ports {
            let id = p["port"].as_u64().unwrap_or(0);
            match p["stats"].as_object() {
                Some(st) => out.push(format!(
                    "  port {id}  rx_pkts={}  tx_pkts={}  imissed={}  ierrors={}",
                    st.get("rx_packets").and_then(|v| v.as_u64()).unwrap_or(0),
                    st.get("tx_packets").and_then(|v| v.as_u64()).unwrap_or(0),
                    st.get("imissed").and_then(|v| v.as_u64()).unwrap_or(0),
                    st.get("ierrors").and_then(|v| v.as_u64()).unwrap_or(0),
                )),
                None => out.push(color::dim(&format!("  port {id}  (in reset, stats suppressed)"))),
            }
        }
        out.push(String::new());
    }

    let count = out.len();
    for line in out {
        println!("{}", line);
    }
    count
}

fn uptime_strings(ts: i64, started_at: i64) -> (String, String) {
    if started_at > 0 {
        let s = Utc
            .timestamp_opt(started_at, 0)
            .single()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "—".into());
        let secs = (ts - started_at).max(0) as u64;
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        let s2 = secs % 60;
        let u = if h > 0 {
            format!("{}h {}m {}s", h, m, s2)
        } else if m > 0 {
            format!("{}m {}s", m, s2)
        } else {
            format!("{}s", s2)
        };
        (s, u)
    } else {
        ("—".into(), "—".into())
    }
}
