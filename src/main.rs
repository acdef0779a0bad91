mod bootstrap;
mod collectors;
mod config;
mod driver;
mod error;
mod exporters;
mod poller;
mod registry;
mod server;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Args, Settings};
use crate::driver::{DeviceDriver, NvmlDriver};
use crate::exporters::prometheus::encode;
use crate::poller::Poller;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let settings = match Settings::from_args(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("rigstats: error: {e}");
            std::process::exit(2);
        }
    };
    info!(?settings, "Loaded config");

    let driver: Arc<dyn DeviceDriver> =
        Arc::new(NvmlDriver::init().context("failed to initialize NVML")?);

    let (registry, refreshers) = bootstrap::build(&settings, driver).await?;
    let registry = Arc::new(registry);

    if args.oneshot {
        info!("Running in oneshot mode, printing metrics to stdout");
        let families = registry.gather().await?;
        print!("{}", encode(&families).context("failed to encode metrics")?);
        return Ok(());
    }

    let pollers: Vec<_> = refreshers
        .into_iter()
        .map(|target| Poller::new(target, settings.poll_interval).spawn())
        .collect();

    info!("Starting exporter...");
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.port));
    let served = server::serve(addr, registry, shutdown_signal()).await;

    for poller in pollers {
        poller.abort();
    }
    served.with_context(|| format!("metrics server on {addr} failed"))?;
    info!("Exiting...");
    Ok(())
}

fn setup_logging(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true).compact())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}
