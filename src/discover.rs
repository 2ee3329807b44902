//! `rvidctl discover` — list local network interfaces and configured sessions.

use anyhow::Result;
use std::process::Command;

use crate::config::EngineConfig;

pub fn run(config: &EngineConfig) -> Result<()> {
    println!("=== Network interfaces ===");
    show_interfaces();

    println!();
    println!("=== Configured sessions (sessions.toml) ===");
    if config.sessions.is_empty() {
        println!("  (no sessions configured — run `rvidctl init > sessions.toml` to create one)");
    } else {
        println!(
            "  {:<12} {:<5} {:<6} {:<16} {:<8} {:<10}x{:<6}",
            "NAME", "ROLE", "PORT", "DEST", "DPORT", "WIDTH", "HEIGHT"
        );
        println!("  {}", "-".repeat(72));
        for s in &config.sessions {
            println!(
                "  {:<12} {:<5?} {:<6} {:<16} {:<8} {:<10}x{:<6}",
                s.name, s.role, s.port_id, s.dest_addr, s.dest_port, s.width, s.height
            );
        }
    }

    Ok(())
}

fn show_interfaces() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(output) = Command::new("ip").args(["-o", "addr", "show"]).output() {
            let text = String::from_utf8_lossy(&output.stdout);
            for line in text.lines() {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() >= 4 {
                    println!("  {:<16} {}", fields[1], fields[3]);
                }
            }
        } else {
            println!("  (ip command not available)");
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        println!("  (interface listing requires Linux — ip addr show)");
    }
}
