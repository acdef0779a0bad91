use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::collectors::bminer::BminerCollector;
use crate::collectors::dstm::DstmCollector;
use crate::collectors::flypool::FlypoolCollector;
use crate::collectors::gpu::GpuCollector;
use crate::config::{MinerKind, PoolKind, Settings};
use crate::driver::DeviceDriver;
use crate::poller::Refresh;
use crate::registry::Registry;

/// Builds the registry in its fixed order: gpu, then pool, then miner.
///
/// The pool is refreshed once before this returns, so the first scrape
/// already carries pool data. The returned refreshers are what the pollers
/// keep up to date.
pub async fn build(
    settings: &Settings,
    driver: Arc<dyn DeviceDriver>,
) -> Result<(Registry, Vec<Arc<dyn Refresh>>)> {
    let mut registry = Registry::new();
    registry.register(Arc::new(GpuCollector::new(driver.clone())));

    let mut refreshers: Vec<Arc<dyn Refresh>> = Vec::new();
    if let Some(pool) = &settings.pool {
        let collector = match pool.kind {
            PoolKind::Flypool => Arc::new(FlypoolCollector::new(
                &pool.host,
                &pool.miner,
                settings.request_timeout,
            )?),
        };
        collector.refresh().await;
        registry.register(collector.clone());
        refreshers.push(collector);
    }

    if let Some(miner) = &settings.miner {
        match miner.kind {
            MinerKind::Dstm => registry.register(Arc::new(DstmCollector::new(
                &miner.host,
                miner.port,
                settings.request_timeout,
            ))),
            MinerKind::Bminer => registry.register(Arc::new(BminerCollector::new(
                &miner.host,
                miner.port,
                settings.request_timeout,
                driver,
            )?)),
        }
    }
    info!(collectors = ?registry.collector_names(), "Collectors registered");

    Ok((registry, refreshers))
}
