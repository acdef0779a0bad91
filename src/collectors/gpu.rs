use std::sync::Arc;

use async_trait::async_trait;
use tokio::task;
use tracing::{debug, warn};

use super::{Collector, MetricFamily};
use crate::driver::{DeviceDriver, DeviceQuery};
use crate::error::CollectionError;

const UTILIZATION: &[(&str, DeviceQuery)] = &[
    ("gpu", DeviceQuery::GpuUtilization),
    ("memory", DeviceQuery::MemoryUtilization),
];

const CLOCK_SPEED: &[(&str, DeviceQuery)] = &[
    ("core", DeviceQuery::CoreClock),
    ("memory", DeviceQuery::MemoryClock),
    ("max_core", DeviceQuery::MaxCoreClock),
    ("max_memory", DeviceQuery::MaxMemoryClock),
];

const POWER_USAGE: &[(&str, DeviceQuery)] = &[
    ("usage", DeviceQuery::PowerUsage),
    ("min_limit", DeviceQuery::PowerMinLimit),
    ("max_limit", DeviceQuery::PowerMaxLimit),
    ("limit", DeviceQuery::PowerLimit),
    ("default_limit", DeviceQuery::PowerDefaultLimit),
    ("enforced_limit", DeviceQuery::PowerEnforcedLimit),
];

const MEMORY_USAGE: &[(&str, DeviceQuery)] = &[
    ("used", DeviceQuery::MemoryUsed),
    ("free", DeviceQuery::MemoryFree),
    ("total", DeviceQuery::MemoryTotal),
];

const BAR1_MEMORY_USAGE: &[(&str, DeviceQuery)] = &[
    ("used", DeviceQuery::Bar1Used),
    ("free", DeviceQuery::Bar1Free),
    ("total", DeviceQuery::Bar1Total),
];

const TEMPERATURE: &[(&str, DeviceQuery)] = &[
    ("current", DeviceQuery::Temperature),
    ("slowdown_threshold", DeviceQuery::SlowdownThreshold),
    ("shutdown_threshold", DeviceQuery::ShutdownThreshold),
];

/// Live driver readings for every GPU, queried on each scrape.
///
/// Driver calls block, so a scrape runs them on tokio's blocking pool.
pub struct GpuCollector {
    driver: Arc<dyn DeviceDriver>,
}

impl GpuCollector {
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        GpuCollector { driver }
    }
}

// A failed query only zeroes its own point.
fn read(driver: &dyn DeviceDriver, index: u32, gpu_id: &str, query: DeviceQuery) -> f64 {
    match driver.query(index, query) {
        Ok(value) => value,
        Err(e) => {
            debug!(gpu_id, error = %e, "GPU query failed, reporting 0");
            0.0
        }
    }
}

fn add_typed(
    driver: &dyn DeviceDriver,
    family: &mut MetricFamily,
    index: u32,
    gpu_id: &str,
    readings: &[(&str, DeviceQuery)],
) {
    for &(kind, query) in readings {
        family.add_metric(&[gpu_id, kind], read(driver, index, gpu_id, query));
    }
}

fn device_ids(driver: &dyn DeviceDriver) -> Vec<(u32, String)> {
    let count = match driver.device_count() {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate GPUs");
            return Vec::new();
        }
    };

    (0..count)
        .filter_map(|index| match driver.device_uuid(index) {
            Ok(uuid) => Some((index, uuid)),
            Err(e) => {
                warn!(index, error = %e, "Skipping GPU without a readable UUID");
                None
            }
        })
        .collect()
}

fn build_families(driver: &dyn DeviceDriver) -> Vec<MetricFamily> {
    let mut utilization =
        MetricFamily::gauge("nvidia_gpu_utilization", "GPU Utilization", &["gpu_id", "type"]);
    let mut clock_speed =
        MetricFamily::gauge("nvidia_clock_speed", "Clock Speed", &["gpu_id", "type"]);
    let mut power_usage =
        MetricFamily::gauge("nvidia_power_usage", "Power Usage", &["gpu_id", "type"]);
    let mut memory_usage =
        MetricFamily::gauge("nvidia_memory_usage", "Memory Usage", &["gpu_id", "type"]);
    let mut bar1_memory_usage = MetricFamily::gauge(
        "nvidia_bar1_memory_usage",
        "BAR1 Memory Usage",
        &["gpu_id", "type"],
    );
    let mut temperature =
        MetricFamily::gauge("nvidia_temperature", "Temperature", &["gpu_id", "type"]);
    let mut fan_speed = MetricFamily::gauge("nvidia_fan_speed", "Fan Speed", &["gpu_id"]);

    for (index, gpu_id) in device_ids(driver) {
        add_typed(driver, &mut utilization, index, &gpu_id, UTILIZATION);
        add_typed(driver, &mut clock_speed, index, &gpu_id, CLOCK_SPEED);
        add_typed(driver, &mut power_usage, index, &gpu_id, POWER_USAGE);
        add_typed(driver, &mut memory_usage, index, &gpu_id, MEMORY_USAGE);
        add_typed(driver, &mut bar1_memory_usage, index, &gpu_id, BAR1_MEMORY_USAGE);
        add_typed(driver, &mut temperature, index, &gpu_id, TEMPERATURE);
        let fan = read(driver, index, &gpu_id, DeviceQuery::FanSpeed);
        fan_speed.add_metric(&[gpu_id.as_str()], fan);
    }

    vec![
        utilization,
        clock_speed,
        power_usage,
        memory_usage,
        bar1_memory_usage,
        temperature,
        fan_speed,
    ]
}

#[async_trait]
impl Collector for GpuCollector {
    fn name(&self) -> &str {
        "gpu"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectionError> {
        let driver = Arc::clone(&self.driver);
        task::spawn_blocking(move || build_families(driver.as_ref()))
            .await
            .map_err(|source| CollectionError::Join {
                collector: "gpu",
                source,
            })
    }
}
