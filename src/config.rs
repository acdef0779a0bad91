use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 9001;
// One pool query per minute keeps us under the API rate limits.
const DEFAULT_POLL_INTERVAL: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT: u64 = 10;

#[derive(Parser, Debug)]
#[command(
    name = "rigstats",
    version,
    about = "Nvidia GPU, miner and pool statistics exporter for Prometheus"
)]
pub struct Args {
    /// Optional TOML config file; command-line values take precedence
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// The port the exporter listens on for Prometheus queries [default: 9001]
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: Option<u16>,

    /// The pool name, in case pool stats are to be collected
    #[arg(short = 'o', long, value_name = "NAME", value_enum, ignore_case = true)]
    pub pool: Option<PoolKind>,

    /// Pool API host
    #[arg(short = 'O', long, value_name = "HOST")]
    pub pool_api_host: Option<String>,

    /// Pool API miner
    #[arg(short = 'u', long, value_name = "MINER")]
    pub pool_api_miner: Option<String>,

    /// The miner software, in case miner stats are to be collected
    #[arg(short = 'm', long, value_name = "NAME", value_enum, ignore_case = true)]
    pub miner: Option<MinerKind>,

    /// Miner API host
    #[arg(short = 'H', long, value_name = "HOST")]
    pub miner_api_host: Option<String>,

    /// Miner API port
    #[arg(short = 'P', long, value_name = "PORT")]
    pub miner_api_port: Option<u16>,

    /// Seconds between pool refreshes [default: 60]
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Timeout in seconds for pool and miner API requests [default: 10]
    #[arg(long, value_name = "SECS")]
    pub request_timeout: Option<u64>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Collect once, print the metrics to stdout and exit
    #[arg(long)]
    pub oneshot: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Flypool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinerKind {
    Dstm,
    Bminer,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub poll_interval: Option<u64>,
    pub request_timeout: Option<u64>,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub miner: MinerSection,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PoolSection {
    pub kind: Option<PoolKind>,
    pub host: Option<String>,
    pub miner: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct MinerSection {
    pub kind: Option<MinerKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub kind: PoolKind,
    pub host: String,
    pub miner: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinerSettings {
    pub kind: MinerKind,
    pub host: String,
    pub port: u16,
}

/// Validated startup configuration, immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub pool: Option<PoolSettings>,
    pub miner: Option<MinerSettings>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

impl Settings {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    /// Command-line values override file values field by field; the groups
    /// are validated after merging.
    pub fn merge(args: &Args, file: FileConfig) -> Result<Self, ConfigError> {
        let pool = complete_group(
            args.pool.or(file.pool.kind),
            args.pool_api_host.clone().or(file.pool.host),
            args.pool_api_miner.clone().or(file.pool.miner),
            ConfigError::IncompletePool,
        )?
        .map(|(kind, host, miner)| PoolSettings { kind, host, miner });

        let miner = complete_group(
            args.miner.or(file.miner.kind),
            args.miner_api_host.clone().or(file.miner.host),
            args.miner_api_port.or(file.miner.port),
            ConfigError::IncompleteMiner,
        )?
        .map(|(kind, host, port)| MinerSettings { kind, host, port });

        let poll_interval = args
            .poll_interval
            .or(file.poll_interval)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval == 0 {
            return Err(ConfigError::ZeroDuration("poll interval"));
        }
        let request_timeout = args
            .request_timeout
            .or(file.request_timeout)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if request_timeout == 0 {
            return Err(ConfigError::ZeroDuration("request timeout"));
        }

        Ok(Settings {
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            poll_interval: Duration::from_secs(poll_interval),
            request_timeout: Duration::from_secs(request_timeout),
            pool,
            miner,
        })
    }
}

// All three or none.
fn complete_group<A, B, C>(
    a: Option<A>,
    b: Option<B>,
    c: Option<C>,
    incomplete: ConfigError,
) -> Result<Option<(A, B, C)>, ConfigError> {
    match (a, b, c) {
        (Some(a), Some(b), Some(c)) => Ok(Some((a, b, c))),
        (None, None, None) => Ok(None),
        _ => Err(incomplete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(argv: &[&str]) -> Result<Settings, ConfigError> {
        let args = Args::try_parse_from(std::iter::once("rigstats").chain(argv.iter().copied()))
            .unwrap();
        Settings::merge(&args, FileConfig::default())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.port, 9001);
        assert_eq!(settings.poll_interval, Duration::from_secs(60));
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.pool, None);
        assert_eq!(settings.miner, None);
    }

    #[test]
    fn test_complete_groups_accepted() {
        let settings = settings(&[
            "-p", "9100", "-o", "FlyPool", "-O", "api-zcash.flypool.org", "-u", "t1abc", "-m",
            "dstm", "-H", "127.0.0.1", "-P", "2222",
        ])
        .unwrap();

        assert_eq!(settings.port, 9100);
        assert_eq!(
            settings.pool,
            Some(PoolSettings {
                kind: PoolKind::Flypool,
                host: "api-zcash.flypool.org".to_string(),
                miner: "t1abc".to_string(),
            })
        );
        assert_eq!(
            settings.miner,
            Some(MinerSettings {
                kind: MinerKind::Dstm,
                host: "127.0.0.1".to_string(),
                port: 2222,
            })
        );
    }

    #[test]
    fn test_partial_pool_group_rejected() {
        for argv in [
            &["--pool", "flypool"][..],
            &["--pool-api-host", "api.example"][..],
            &["--pool-api-miner", "t1abc"][..],
            &["--pool", "flypool", "--pool-api-miner", "t1abc"][..],
        ] {
            assert!(
                matches!(settings(argv), Err(ConfigError::IncompletePool)),
                "accepted {argv:?}"
            );
        }
    }

    #[test]
    fn test_partial_miner_group_rejected() {
        assert!(matches!(
            settings(&["--miner", "bminer", "--miner-api-host", "localhost"]),
            Err(ConfigError::IncompleteMiner)
        ));
        assert!(matches!(
            settings(&["--miner-api-port", "1880"]),
            Err(ConfigError::IncompleteMiner)
        ));
    }

    #[test]
    fn test_unknown_kind_rejected_by_parser() {
        assert!(Args::try_parse_from(["rigstats", "--miner", "ccminer"]).is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        assert!(matches!(
            settings(&["--poll-interval", "0"]),
            Err(ConfigError::ZeroDuration(_))
        ));
    }

    #[test]
    fn test_file_values_merged_with_args() {
        let file: FileConfig = toml::from_str(
            r#"
            port = 9200
            poll_interval = 120

            [pool]
            kind = "flypool"
            host = "api-zcash.flypool.org"
            miner = "t1file"

            [miner]
            kind = "bminer"
            host = "10.0.0.5"
            "#,
        )
        .unwrap();
        let args = Args::try_parse_from(["rigstats", "-u", "t1cli", "-P", "1880"]).unwrap();
        let settings = Settings::merge(&args, file).unwrap();

        assert_eq!(settings.port, 9200);
        assert_eq!(settings.poll_interval, Duration::from_secs(120));
        assert_eq!(settings.pool.unwrap().miner, "t1cli");
        let miner = settings.miner.unwrap();
        assert_eq!(miner.kind, MinerKind::Bminer);
        assert_eq!(miner.port, 1880);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("collect_interval = 15").is_err());
    }
}
