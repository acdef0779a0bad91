use std::sync::Arc;

use tracing::debug;

use crate::collectors::{Collector, MetricFamily};
use crate::error::CollectionError;

/// The fixed set of collectors behind the scrape endpoint.
#[derive(Default)]
pub struct Registry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn collector_names(&self) -> Vec<&str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Collects every registered source in registration order. The first
    /// failing collector fails the whole gather.
    pub async fn gather(&self) -> Result<Vec<MetricFamily>, CollectionError> {
        let mut families = Vec::new();
        for collector in &self.collectors {
            let collected = collector.collect().await?;
            debug!(collector = collector.name(), families = collected.len(), "Collected");
            families.extend(collected);
        }
        Ok(families)
    }
}
