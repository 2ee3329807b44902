//! `rvidctl service` — systemd integration.
//!
//! Installs and manages a systemd unit that runs `rvidctl run` in the
//! background, logging metrics to the default JSONL log path.

use anyhow::Result;
use std::process::Command;

const UNIT_PATH: &str = "/etc/systemd/system/rvidctl.service";

pub fn install(config_path: &std::path::Path) -> Result<()> {
    let already_active = Command::new("systemctl")
        .args(["is-active", "--quiet", "rvidctl"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if already_active {
        println!("Service is already running.");
        println!();
        println!("  rvidctl service stop     — stop the service");
        println!("  rvidctl service restart  — restart the service");
        println!("  rvidctl monitor          — open live dashboard");
        return Ok(());
    }

    let binary = std::env::current_exe()?;
    let config_abs = config_path.canonicalize().unwrap_or_else(|_| config_path.to_path_buf());

    let unit = format!(
        r#"[Unit]
Description=rvidctl — ST 2110-21 / RFC 4175 video-over-IP transport engine
After=network.target

[Service]
Type=simple
User=root
ExecStart={binary} -c {config} run
Restart=always
RestartSec=5
StandardOutput=journal
StandardError=journal

[Install]
WantedBy=multi-user.target
"#,
        binary = binary.display(),
        config = config_abs.display(),
    );

    std::fs::write(UNIT_PATH, unit)?;

    let _ = Command::new("systemctl").arg("daemon-reload").status();
    let _ = Command::new("systemctl").args(["enable", "rvidctl"]).status();
    let _ = Command::new("systemctl").args(["start", "rvidctl"]).status();

    println!("Service installed, enabled, and started.");
    println!();
    println!("  rvidctl monitor  — open live dashboard");
    println!("  rvidctl status   — view latest metrics");

    Ok(())
}

pub fn uninstall() -> Result<()> {
    let _ = Command::new("systemctl").args(["stop", "rvidctl"]).status();
    let _ = Command::new("systemctl").args(["disable", "rvidctl"]).status();
    std::fs::remove_file(UNIT_PATH)?;
    let _ = Command::new("systemctl").arg("daemon-reload").status();
    println!("Removed {}.", UNIT_PATH);
    Ok(())
}

pub fn control(action: &str) -> Result<()> {
    let ok = Command::new("systemctl").args([action, "rvidctl"]).status()?.success();
    anyhow::ensure!(ok, "systemctl {} rvidctl failed", action);
    Ok(())
}
