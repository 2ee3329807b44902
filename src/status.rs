//! `rvidctl status` — show the most recent snapshot from the metrics log.
//!
//! Reads the last line from the JSONL log and prints a static one-shot
//! table. Use this to check on the running service without opening the
//! live dashboard.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use crate::run::DEFAULT_LOG;

pub fn run() -> Result<()> {
    let content = match std::fs::read_to_string(DEFAULT_LOG) {
        Ok(c) => c,
        Err(_) => {
            eprintln!("No metrics log found at {}.", DEFAULT_LOG);
            eprintln!("Start the service first:  rvidctl service start");
            return Ok(());
        }
    };

    let line = match content.lines().filter(|l| !l.is_empty()).last() {
        Some(l) => l,
        None => {
            eprintln!("Metrics log is empty — service may just be starting.");
            return Ok(());
        }
    };

    let entry: serde_json::Value = serde_json::from_str(line)?;
    let ts = entry["ts"].as_u64().unwrap_or(0) as i64;
    let time_str = Utc
        .timestamp_opt(ts, 0)
        .single()
        .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".into());

    let started_at = entry["started_at"].as_u64().unwrap_or(0) as i64;
    let (started_str, uptime_str) = if started_at > 0 {
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
    };

    let width = 100;
    println!("{:=<width$}", "");
    println!("{:^width$}", format!(" RVIDCTL STATUS  {} ", time_str));
    println!("{:=<width$}", "");
    println!("  Started: {}   Uptime: {}", started_str, uptime_str);
    println!();

    println!(
        "{:<16}  {:>10}  {:>10}  {:>10}  {:>10}  {:>8}",
        "SESSION", "FRAMES TX", "FRAMES RX", "SENT MB", "RECV MB", "DROPPED",
    );
    println!("{:-<width$}", "");

    if let Some(sessions) = entry["snapshot"]["sessions"].as_array() {
        for s in sessions {
            let name = s["name"].as_str().unwrap_or("?");
            let sent = s["bytes_sent"].as_u64().unwrap_or(0) as f64 / 1_048_576.0;
            let recv = s["bytes_received"].as_u64().unwrap_or(0) as f64 / 1_048_576.0;
            println!(
                "{:<16}  {:>10}  {:>10}  {:>10.1}  {:>10.1}  {:>8}",
                name,
                s["frames_sent"].as_u64().unwrap_or(0),
                s["frames_received"].as_u64().unwrap_or(0),
                sent,
                recv,
                s["packets_dropped"].as_u64().unwrap_or(0),
            );
        }
    }

    println!("{:-<width$}", "");
    println!();

    if let Some(ports) = entry["snapshot"]["ports"].as_array() {
        println!("PORTS:");
        for p in ports {
            let id = p["port"].as_u64().unwrap_or(0);
            match p["stats"].as_object() {
                Some(st) => println!(
                    "  port {id}  rx_pkts={}  tx_pkts={}  imissed={}  ierrors={}",
                    st.get("rx_packets").and_then(|v| v.as_u64()).unwrap_or(0),
                    st.get("tx_packets").and_then(|v| v.as_u64()).unwrap_or(0),
                    st.get("imissed").and_then(|v| v.as_u64()).unwrap_or(0),
                    st.get("ierrors").and_then(|v| v.as_u64()).unwrap_or(0),
                ),
                None => println!("  port {id}  (in reset, stats suppressed)"),
            }
        }
        println!();
    }

    println!("Log: {}  (rvidctl service status for service health)", DEFAULT_LOG);

    Ok(())
}
