use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use super::{Collector, MetricFamily};
use crate::driver::DeviceDriver;
use crate::error::CollectionError;

#[derive(Debug, Deserialize)]
struct Status {
    start_time: i64,
    stratum: Stratum,
    // Keys are BMiner's CUDA device indices.
    miners: BTreeMap<u32, MinerDevice>,
}

#[derive(Debug, Deserialize)]
struct Stratum {
    accepted_shares: f64,
    rejected_shares: f64,
}

#[derive(Debug, Deserialize)]
struct MinerDevice {
    solver: Solver,
    device: Device,
}

#[derive(Debug, Deserialize)]
struct Solver {
    solution_rate: f64,
}

#[derive(Debug, Deserialize)]
struct Device {
    power: f64,
}

/// BMiner's HTTP status API, queried on every scrape.
///
/// BMiner reports devices by CUDA index, which is translated to a UUID through
/// the GPU driver. That only matches NVML's order when the miner runs with
/// `CUDA_DEVICE_ORDER=PCI_BUS_ID`; with any other ordering the series are
/// attributed to the wrong GPU.
pub struct BminerCollector {
    client: Client,
    url: String,
    driver: Arc<dyn DeviceDriver>,
}

impl BminerCollector {
    pub fn new(
        host: &str,
        port: u16,
        timeout: Duration,
        driver: Arc<dyn DeviceDriver>,
    ) -> Result<Self, CollectionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| CollectionError::Http {
                collector: "bminer",
                source,
            })?;
        Ok(BminerCollector {
            client,
            url: format!("http://{host}:{port}/api/status"),
            driver,
        })
    }

    /// `None` when the miner is not listening.
    async fn query(&self) -> Result<Option<Status>, CollectionError> {
        let http = |source| CollectionError::Http {
            collector: "bminer",
            source,
        };
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            // Checked first so a timed-out connect never reads as an absent miner.
            Err(e) if e.is_timeout() => {
                return Err(CollectionError::Timeout {
                    collector: "bminer",
                    target: self.url.clone(),
                })
            }
            Err(e) if e.is_connect() => {
                warn!(url = %self.url, error = %e, "BMiner is not reachable");
                return Ok(None);
            }
            Err(e) => return Err(http(e)),
        };
        let body = response
            .error_for_status()
            .map_err(http)?
            .bytes()
            .await
            .map_err(http)?;
        let status = serde_json::from_slice(&body).map_err(|source| CollectionError::Parse {
            collector: "bminer",
            source,
        })?;
        Ok(Some(status))
    }

    fn build_families(&self, status: Option<&Status>) -> Result<Vec<MetricFamily>, CollectionError> {
        let mut uptime = MetricFamily::gauge("miner_uptime", "Uptime", &["type"]);
        let mut hashrate = MetricFamily::gauge("miner_hashrate", "Hashrate", &["gpu_id", "type"]);
        let mut efficiency =
            MetricFamily::gauge("miner_efficiency", "Efficiency", &["gpu_id", "type"]);
        let mut pool_shares = MetricFamily::gauge("miner_pool_shares", "Pool Shares", &["type"]);

        let Some(status) = status else {
            uptime.add_metric(&["miner"], 0.0);
            uptime.add_metric(&["connection"], 0.0);
            pool_shares.add_metric(&["accepted"], 0.0);
            pool_shares.add_metric(&["rejected"], 0.0);
            return Ok(vec![uptime, hashrate, efficiency, pool_shares]);
        };

        uptime.add_metric(&["miner"], (unix_now() - status.start_time) as f64);
        uptime.add_metric(&["connection"], 0.0);
        pool_shares.add_metric(&["accepted"], status.stratum.accepted_shares);
        pool_shares.add_metric(&["rejected"], status.stratum.rejected_shares);

        for (index, miner) in &status.miners {
            let gpu_id = self
                .driver
                .device_uuid(*index)
                .map_err(|source| CollectionError::Driver {
                    collector: "bminer",
                    source,
                })?;
            let rate = miner.solver.solution_rate;
            hashrate.add_metric(&[gpu_id.as_str(), "current"], rate);
            efficiency.add_metric(&[gpu_id.as_str(), "current"], efficiency_of(rate, miner.device.power));
        }

        Ok(vec![uptime, hashrate, efficiency, pool_shares])
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

// Solutions per watt, two decimals. An idle card reporting 0 W counts as 0.
fn efficiency_of(rate: f64, power: f64) -> f64 {
    if power <= 0.0 {
        return 0.0;
    }
    (rate / power * 100.0).round() / 100.0
}

#[async_trait]
impl Collector for BminerCollector {
    fn name(&self) -> &str {
        "bminer"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectionError> {
        let status = self.query().await?;
        self.build_families(status.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::Router;

    use super::*;
    use crate::collectors::family;
    use crate::driver::fake::FakeDriver;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn serve(body: String) -> u16 {
        let app = Router::new().route("/api/status", get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        port
    }

    fn collector(port: u16) -> BminerCollector {
        collector_with_timeout(port, TIMEOUT)
    }

    fn collector_with_timeout(port: u16, timeout: Duration) -> BminerCollector {
        let driver = Arc::new(FakeDriver::new(&["GPU-zero", "GPU-one"]));
        BminerCollector::new("127.0.0.1", port, timeout, driver).unwrap()
    }

    #[tokio::test]
    async fn test_collect_maps_index_to_uuid() {
        let start = unix_now() - 3600;
        let body = format!(
            r#"{{"start_time": {start}, "stratum": {{"accepted_shares": 12, "rejected_shares": 1}},
            "miners": {{"1": {{"solver": {{"solution_rate": 300.0}}, "device": {{"power": 140}}}},
                        "0": {{"solver": {{"solution_rate": 280.5}}, "device": {{"power": 0}}}}}}}}"#
        );
        let families = collector(serve(body).await).collect().await.unwrap();

        let uptime = family(&families, "miner_uptime").value(&["miner"]).unwrap();
        assert!((3600.0..3700.0).contains(&uptime));
        assert_eq!(family(&families, "miner_uptime").value(&["connection"]), Some(0.0));

        let shares = family(&families, "miner_pool_shares");
        assert_eq!(shares.value(&["accepted"]), Some(12.0));
        assert_eq!(shares.value(&["rejected"]), Some(1.0));

        let hashrate = family(&families, "miner_hashrate");
        assert_eq!(hashrate.value(&["GPU-zero", "current"]), Some(280.5));
        assert_eq!(hashrate.value(&["GPU-one", "current"]), Some(300.0));
        assert_eq!(hashrate.points[0].label_values[0], "GPU-zero");

        let efficiency = family(&families, "miner_efficiency");
        assert_eq!(efficiency.value(&["GPU-one", "current"]), Some(2.14));
        assert_eq!(efficiency.value(&["GPU-zero", "current"]), Some(0.0));
    }

    #[tokio::test]
    async fn test_connection_failure_yields_defaults() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let families = collector(port).collect().await.unwrap();

        assert_eq!(families.len(), 4);
        assert!(family(&families, "miner_hashrate").points.is_empty());
        assert!(family(&families, "miner_efficiency").points.is_empty());
        let uptime = family(&families, "miner_uptime");
        assert_eq!(uptime.value(&["miner"]), Some(0.0));
        assert_eq!(uptime.value(&["connection"]), Some(0.0));
        let shares = family(&families, "miner_pool_shares");
        assert_eq!(shares.value(&["accepted"]), Some(0.0));
        assert_eq!(shares.value(&["rejected"]), Some(0.0));
    }

    #[tokio::test]
    async fn test_slow_miner_times_out() {
        let app = Router::new().route(
            "/api/status",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "{}"
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let err = collector_with_timeout(port, Duration::from_millis(200))
            .collect()
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::Timeout { collector: "bminer", .. }));
    }

    #[tokio::test]
    async fn test_unknown_device_index_is_an_error() {
        let body = r#"{"start_time": 0, "stratum": {"accepted_shares": 0, "rejected_shares": 0},
            "miners": {"7": {"solver": {"solution_rate": 1.0}, "device": {"power": 1.0}}}}"#;
        let err = collector(serve(body.to_string()).await).collect().await.unwrap_err();
        assert!(matches!(err, CollectionError::Driver { .. }));
    }

    #[tokio::test]
    async fn test_malformed_status_is_an_error() {
        let err = collector(serve("{}".to_string()).await).collect().await.unwrap_err();
        assert!(matches!(err, CollectionError::Parse { .. }));
    }

    #[test]
    fn test_efficiency_rounding() {
        assert_eq!(efficiency_of(300.0, 140.0), 2.14);
        assert_eq!(efficiency_of(10.0, 3.0), 3.33);
        assert_eq!(efficiency_of(10.0, 0.0), 0.0);
    }
}
