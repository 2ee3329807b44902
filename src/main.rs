//! rvidctl — ST 2110-21 / RFC 4175 video-over-IP transmit and receive engine.
//!
//! Drives kernel-bypass-modeled TX/RX sessions over a userspace transport
//! engine. Run `rvidctl --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod bench;
mod cli;
mod color;
mod config;
mod discover;
mod dump;
mod engine_setup;
mod monitor;
mod run;
mod rx;
mod service;
mod signal;
mod status;
mod tx;

use cli::{Cli, Commands, ServiceAction};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Init => None,
        _ => {
            if !cli.config.exists() {
                let example = config::EngineConfig::default_example();
                std::fs::write(&cli.config, toml::to_string_pretty(&example)?)?;
                eprintln!(
                    "Created '{}' with an example tx0/rx0 session — edit it to match your network.",
                    cli.config.display()
                );
            }
            Some(config::EngineConfig::load(&cli.config)?)
        }
    };

    match cli.command {
        Commands::Init => {
            let example = config::EngineConfig::default_example();
            print!("{}", toml::to_string_pretty(&example)?);
        }
        Commands::Discover => {
            discover::run(config.as_ref().unwrap())?;
        }
        Commands::Run { interval } => {
            run::run(config.as_ref().unwrap(), interval, std::path::PathBuf::from(run::DEFAULT_LOG))?;
        }
        Commands::Tx { session } => {
            tx::run(config.as_ref().unwrap(), &session)?;
        }
        Commands::Rx { session } => {
            rx::run(config.as_ref().unwrap(), &session)?;
        }
        Commands::Bench { duration, output } => {
            bench::run(config.as_ref().unwrap(), duration, output)?;
        }
        Commands::Monitor { interval } => {
            monitor::run(interval)?;
        }
        Commands::Status => {
            status::run()?;
        }
        Commands::Service { action } => match action {
            ServiceAction::Install => service::install(&cli.config)?,
            ServiceAction::Uninstall => service::uninstall()?,
            ServiceAction::Start => service::control("start")?,
            ServiceAction::Stop => service::control("stop")?,
            ServiceAction::Restart => service::control("restart")?,
        },
    }

    Ok(())
}
