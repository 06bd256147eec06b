//! dlcsrv service entry point

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use common::logging::{self, LogConfig};
use dlcsrv::backend::{Backend, HttpBackend, HttpNotifier};
use dlcsrv::clock::SystemClock;
use dlcsrv::config::ServiceConfig;
use dlcsrv::engine::Engine;
use dlcsrv::poller::commands::CommandStore;
use dlcsrv::poller::Poller;
use dlcsrv::{Result, SERVICE_NAME, SERVICE_VERSION};

#[derive(Parser, Debug)]
#[command(name = SERVICE_NAME, version = SERVICE_VERSION, about = "Demand-limiting control service")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config/dlcsrv.yaml")]
    config: PathBuf,

    /// Console log level override
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(&args.config)?;

    let level = args
        .log_level
        .unwrap_or_else(|| config.logging.level.clone());
    let log_config = LogConfig {
        service_name: config.service_name.clone(),
        log_dir: config
            .logging
            .log_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(logging::get_log_root),
        console_level: level.parse().unwrap_or(tracing::Level::INFO),
        ..LogConfig::default()
    };
    if let Err(err) = logging::init_with_config(log_config) {
        eprintln!("logging init failed: {err}");
    }

    info!("Starting {SERVICE_NAME} v{SERVICE_VERSION}");

    let backend = HttpBackend::new(&config.backend)?;
    let notifier = HttpNotifier::new(&config.backend)?;
    let clock = SystemClock;
    let mut store = CommandStore::load(&config.queue_path);
    let mut engine = Engine::new();

    // one-time register initialization across the reachable fleet
    match backend.fetch_zone_configs().await {
        Ok(zones) => {
            let poller = Poller::new(&config.serial, &clock);
            poller.initialize_registers(&zones).await;
        }
        Err(err) => error!("startup zone fetch failed: {err}"),
    }

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.cycle_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = engine
                    .run_cycle(&config.serial, &clock, &mut store, &backend, &notifier)
                    .await
                {
                    error!("control cycle failed: {err}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
