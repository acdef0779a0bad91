use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Collector, MetricFamily};
use crate::error::CollectionError;
use crate::poller::Refresh;

/// Account statistics as returned by the flypool API. Every field may be
/// missing or `null`.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub current_hashrate: Option<f64>,
    pub average_hashrate: Option<f64>,
    pub valid_shares: Option<f64>,
    pub invalid_shares: Option<f64>,
    pub stale_shares: Option<f64>,
    pub unconfirmed: Option<f64>,
    pub unpaid: Option<f64>,
    pub coins_per_min: Option<f64>,
    pub btc_per_min: Option<f64>,
    pub usd_per_min: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    data: PoolStats,
}

/// Last known flypool account snapshot. Only `refresh` touches the network.
pub struct FlypoolCollector {
    client: Client,
    url: String,
    snapshot: RwLock<Arc<PoolStats>>,
}

impl FlypoolCollector {
    pub fn new(host: &str, miner: &str, timeout: Duration) -> Result<Self, CollectionError> {
        Self::with_url(stats_url(host, miner), timeout)
    }

    pub fn with_url(url: String, timeout: Duration) -> Result<Self, CollectionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| CollectionError::Http {
                collector: "flypool",
                source,
            })?;
        Ok(FlypoolCollector {
            client,
            url,
            snapshot: RwLock::new(Arc::new(PoolStats::default())),
        })
    }

    pub fn snapshot(&self) -> Arc<PoolStats> {
        // A poisoned lock still holds a complete snapshot.
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, stats: PoolStats) {
        let stats = Arc::new(stats);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = stats,
            Err(poisoned) => *poisoned.into_inner() = stats,
        }
    }

    async fn fetch(&self) -> Result<PoolStats, CollectionError> {
        let http = |source| CollectionError::Http {
            collector: "flypool",
            source,
        };
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(http)?
            .error_for_status()
            .map_err(http)?
            .bytes()
            .await
            .map_err(http)?;
        let response: StatsResponse =
            serde_json::from_slice(&body).map_err(|source| CollectionError::Parse {
                collector: "flypool",
                source,
            })?;
        Ok(response.data)
    }
}

// A bare host is reached over https; a host with a scheme is used as given.
fn stats_url(host: &str, miner: &str) -> String {
    if host.contains("://") {
        format!("{}/miner/{miner}/currentStats", host.trim_end_matches('/'))
    } else {
        format!("https://{host}/miner/{miner}/currentStats")
    }
}

#[async_trait]
impl Refresh for FlypoolCollector {
    fn name(&self) -> &str {
        "flypool"
    }

    async fn refresh(&self) {
        match self.fetch().await {
            Ok(stats) => {
                debug!(url = %self.url, "Pool stats refreshed");
                self.replace(stats);
            }
            Err(e) => warn!(error = %e, "Pool refresh failed, keeping previous stats"),
        }
    }
}

#[async_trait]
impl Collector for FlypoolCollector {
    fn name(&self) -> &str {
        "flypool"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectionError> {
        let mut hashrate = MetricFamily::gauge("pool_hashrate", "Hashrate", &["type"]);
        let mut shares = MetricFamily::gauge("pool_shares", "Shares", &["type"]);
        let mut earnings = MetricFamily::gauge("pool_earnings", "Earnings", &["type"]);

        let stats = self.snapshot();
        let or_zero = |v: Option<f64>| v.unwrap_or(0.0);

        hashrate.add_metric(&["current"], or_zero(stats.current_hashrate));
        hashrate.add_metric(&["average"], or_zero(stats.average_hashrate));
        shares.add_metric(&["valid"], or_zero(stats.valid_shares));
        shares.add_metric(&["invalid"], or_zero(stats.invalid_shares));
        shares.add_metric(&["stale"], or_zero(stats.stale_shares));
        earnings.add_metric(&["unconfirmed"], or_zero(stats.unconfirmed));
        earnings.add_metric(&["unpaid"], or_zero(stats.unpaid));
        earnings.add_metric(&["coins_per_min"], or_zero(stats.coins_per_min));
        earnings.add_metric(&["btc_per_min"], or_zero(stats.btc_per_min));
        earnings.add_metric(&["usd_per_min"], or_zero(stats.usd_per_min));

        Ok(vec![hashrate, shares, earnings])
    }
}
