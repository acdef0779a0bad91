use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

use super::{Collector, MetricFamily};
use crate::error::CollectionError;

const REQUEST: &[u8] = br#"{"id": 1, "method": "getstat"}"#;
// Larger responses are truncated and fail to parse.
const READ_BUFFER: usize = 8192;

#[derive(Debug, Deserialize)]
struct Status {
    uptime: f64,
    contime: f64,
    result: Vec<GpuStatus>,
}

#[derive(Debug, Deserialize)]
struct GpuStatus {
    gpu_uuid: String,
    sol_ps: f64,
    avg_sol_ps: f64,
    sol_pw: f64,
    avg_sol_pw: f64,
    accepted_shares: f64,
    rejected_shares: f64,
    latency: f64,
}

/// DSTM's line-oriented JSON API, queried on every scrape.
pub struct DstmCollector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl DstmCollector {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        DstmCollector {
            host: host.to_string(),
            port,
            timeout,
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn exchange(&self) -> std::io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.write_all(REQUEST).await?;
        let mut buf = vec![0u8; READ_BUFFER];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn query(&self) -> Result<Status, CollectionError> {
        let raw = time::timeout(self.timeout, self.exchange())
            .await
            .map_err(|_| CollectionError::Timeout {
                collector: "dstm",
                target: self.target(),
            })?
            .map_err(|source| CollectionError::Io {
                collector: "dstm",
                target: self.target(),
                source,
            })?;
        parse_status(&raw)
    }
}

fn parse_status(raw: &[u8]) -> Result<Status, CollectionError> {
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    serde_json::from_slice(&raw[..end]).map_err(|source| CollectionError::Parse {
        collector: "dstm",
        source,
    })
}

fn build_families(status: &Status) -> Vec<MetricFamily> {
    let mut uptime = MetricFamily::gauge("miner_uptime", "Uptime", &["type"]);
    let mut hashrate = MetricFamily::gauge("miner_hashrate", "Hashrate", &["gpu_id", "type"]);
    let mut efficiency = MetricFamily::gauge("miner_efficiency", "Efficiency", &["gpu_id", "type"]);
    let mut pool_shares =
        MetricFamily::gauge("miner_pool_shares", "Pool Shares", &["gpu_id", "type"]);
    let mut latency = MetricFamily::gauge("miner_latency", "Latency", &["gpu_id"]);

    uptime.add_metric(&["miner"], status.uptime);
    uptime.add_metric(&["connection"], status.contime);
    for gpu in &status.result {
        let gpu_id = gpu.gpu_uuid.as_str();
        hashrate.add_metric(&[gpu_id, "current"], gpu.sol_ps);
        hashrate.add_metric(&[gpu_id, "average"], gpu.avg_sol_ps);
        efficiency.add_metric(&[gpu_id, "current"], gpu.sol_pw);
        efficiency.add_metric(&[gpu_id, "average"], gpu.avg_sol_pw);
        pool_shares.add_metric(&[gpu_id, "accepted"], gpu.accepted_shares);
        pool_shares.add_metric(&[gpu_id, "rejected"], gpu.rejected_shares);
        latency.add_metric(&[gpu_id], gpu.latency);
    }

    vec![uptime, hashrate, efficiency, pool_shares, latency]
}

#[async_trait]
impl Collector for DstmCollector {
    fn name(&self) -> &str {
        "dstm"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectionError> {
        let status = self.query().await?;
        Ok(build_families(&status))
    }
}
