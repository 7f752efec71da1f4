//! qpersist entry point.
//!
//! Operator tooling for a persisted query cache: inspect the stored envelope,
//! check whether it would be restored, or clear it. Logging goes to stderr so
//! `show --json` output stays machine-readable.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use qpersist_core::AppConfig;
use qpersist_core::clock::{Clock, SystemClock};
use tracing_subscriber::EnvFilter;

mod args;
mod commands;

use args::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.with_target(false).init();
    }

    let mut config = AppConfig::load()?;
    cli.apply(&mut config);
    config.validate()?;

    tracing::debug!(backend = ?config.backend, key = %config.persist.storage_key, "configuration loaded");

    let storage = commands::open_storage(&config).await?;
    let options = &config.persist;

    match cli.command {
        Command::Show { json } => {
            let inspection = commands::inspect_impl(storage.as_ref(), options, SystemClock::new().now_ms()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inspection)?);
            } else {
                print!("{}", inspection.render());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let inspection = commands::inspect_impl(storage.as_ref(), options, SystemClock::new().now_ms()).await?;
            println!("{}", inspection.decision);
            if inspection.decision.is_restore() { Ok(ExitCode::SUCCESS) } else { Ok(ExitCode::from(1)) }
        }
        Command::Clear => {
            if commands::clear_impl(storage.as_ref(), options).await? {
                println!("removed {}", options.storage_key);
            } else {
                println!("no entry under {}", options.storage_key);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
