use thiserror::Error;

/// Failure of a single query against the local GPU driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver initialization failed: {0}")]
    Init(String),
    #[error("device enumeration failed: {0}")]
    Enumerate(String),
    #[error("query failed on device {index}: {message}")]
    Query { index: u32, message: String },
}

/// Failure that aborts a collector's output for one scrape.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("{collector}: failed to reach {target}: {source}")]
    Io {
        collector: &'static str,
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{collector}: request to {target} timed out")]
    Timeout {
        collector: &'static str,
        target: String,
    },
    #[error("{collector}: http request failed: {source}")]
    Http {
        collector: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{collector}: malformed response: {source}")]
    Parse {
        collector: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{collector}: collection task failed: {source}")]
    Join {
        collector: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("{collector}: {source}")]
    Driver {
        collector: &'static str,
        #[source]
        source: DriverError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("--pool requires --pool-api-host and --pool-api-miner")]
    IncompletePool,
    #[error("--miner requires --miner-api-host and --miner-api-port")]
    IncompleteMiner,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}
