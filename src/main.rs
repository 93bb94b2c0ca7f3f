// SPDX-License-Identifier: Apache-2.0

//! `conduitd`: loads a configuration document, builds a [`conduit_controller::Connector`] from
//! it, starts every configured app, and blocks until a shutdown signal arrives.
//!
//! Exit codes: `0` on a clean shutdown after every app stopped; `1` if the configuration file
//! could not be read or parsed, or the connector failed to build or start. In both failure cases
//! a human-readable reason is printed to stderr rather than a backtrace.

#![allow(missing_docs)]

#[cfg(all(feature = "jemalloc", not(feature = "mimalloc"), not(windows)))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use conduit_config::RawConfig;
use conduit_controller::Connector;
use conduit_engine::config_value::InvokeRegistry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Budget given to every running app's three-phase shutdown once a stop signal arrives.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

/// A configurable event-processing connector binding message brokers to user-defined
/// processing pipelines.
#[derive(Parser, Debug)]
#[command(name = "conduitd", version, about)]
struct Cli {
    /// Path to the YAML configuration document (apps/flows/components).
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("conduitd: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let raw = std::fs::read_to_string(&cli.config)
        .map_err(|source| format!("could not read config file `{}`: {source}", cli.config.display()))?;
    let config = RawConfig::from_yaml_str(&raw)
        .map_err(|source| format!("could not parse config file `{}`: {source}", cli.config.display()))?;

    conduit_telemetry::logging::init_logging(&config.log)
        .map_err(|source| format!("could not initialize logging: {source}"))?;

    let connector = Arc::new(
        Connector::new(&config, InvokeRegistry::new()).map_err(|source| format!("could not build connector: {source}"))?,
    );
    connector.start_all().map_err(|source| format!("could not start connector: {source}"))?;
    tracing::info!(instance = connector.instance_name(), "conduitd started");

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = Arc::clone(&shutdown);
    ctrlc::set_handler(move || handler_shutdown.store(true, Ordering::SeqCst))
        .map_err(|source| format!("could not install signal handler: {source}"))?;

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("shutdown signal received, stopping every app");
    connector.stop_all(SHUTDOWN_BUDGET);
    Ok(())
}
