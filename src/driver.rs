use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor, TemperatureThreshold};
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;

use crate::error::DriverError;

/// One reading the driver can be asked for. Units are the driver's own:
/// percent, MHz, milliwatts, bytes, degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceQuery {
    GpuUtilization,
    MemoryUtilization,
    CoreClock,
    MemoryClock,
    MaxCoreClock,
    MaxMemoryClock,
    PowerUsage,
    PowerMinLimit,
    PowerMaxLimit,
    PowerLimit,
    PowerDefaultLimit,
    PowerEnforcedLimit,
    MemoryUsed,
    MemoryFree,
    MemoryTotal,
    Bar1Used,
    Bar1Free,
    Bar1Total,
    Temperature,
    SlowdownThreshold,
    ShutdownThreshold,
    FanSpeed,
}

/// Synchronous access to the local accelerators.
pub trait DeviceDriver: Send + Sync {
    fn device_count(&self) -> Result<u32, DriverError>;

    /// Stable identifier of the device at `index`. Indices follow the
    /// driver's enumeration order and are not stable across hosts.
    fn device_uuid(&self, index: u32) -> Result<String, DriverError>;

    fn query(&self, index: u32, query: DeviceQuery) -> Result<f64, DriverError>;
}

pub struct NvmlDriver {
    nvml: Nvml,
}

impl NvmlDriver {
    pub fn init() -> Result<Self, DriverError> {
        let nvml = Nvml::init().map_err(|e| DriverError::Init(e.to_string()))?;
        Ok(NvmlDriver { nvml })
    }

    fn read(&self, index: u32, query: DeviceQuery) -> Result<f64, NvmlError> {
        let device = self.nvml.device_by_index(index)?;
        let value = match query {
            DeviceQuery::GpuUtilization => device.utilization_rates()?.gpu as f64,
            DeviceQuery::MemoryUtilization => device.utilization_rates()?.memory as f64,
            DeviceQuery::CoreClock => device.clock_info(Clock::Graphics)? as f64,
            DeviceQuery::MemoryClock => device.clock_info(Clock::Memory)? as f64,
            DeviceQuery::MaxCoreClock => device.max_clock_info(Clock::Graphics)? as f64,
            DeviceQuery::MaxMemoryClock => device.max_clock_info(Clock::Memory)? as f64,
            DeviceQuery::PowerUsage => device.power_usage()? as f64,
            DeviceQuery::PowerMinLimit => {
                device.power_management_limit_constraints()?.min_limit as f64
            }
            DeviceQuery::PowerMaxLimit => {
                device.power_management_limit_constraints()?.max_limit as f64
            }
            DeviceQuery::PowerLimit => device.power_management_limit()? as f64,
            DeviceQuery::PowerDefaultLimit => device.power_management_limit_default()? as f64,
            DeviceQuery::PowerEnforcedLimit => device.enforced_power_limit()? as f64,
            DeviceQuery::MemoryUsed => device.memory_info()?.used as f64,
            DeviceQuery::MemoryFree => device.memory_info()?.free as f64,
            DeviceQuery::MemoryTotal => device.memory_info()?.total as f64,
            DeviceQuery::Bar1Used => device.bar1_memory_info()?.used as f64,
            DeviceQuery::Bar1Free => device.bar1_memory_info()?.free as f64,
            DeviceQuery::Bar1Total => device.bar1_memory_info()?.total as f64,
            DeviceQuery::Temperature => device.temperature(TemperatureSensor::Gpu)? as f64,
            DeviceQuery::SlowdownThreshold => {
                device.temperature_threshold(TemperatureThreshold::Slowdown)? as f64
            }
            DeviceQuery::ShutdownThreshold => {
                device.temperature_threshold(TemperatureThreshold::Shutdown)? as f64
            }
            DeviceQuery::FanSpeed => device.fan_speed(0)? as f64,
        };
        Ok(value)
    }
}

impl DeviceDriver for NvmlDriver {
    fn device_count(&self) -> Result<u32, DriverError> {
        self.nvml
            .device_count()
            .map_err(|e| DriverError::Enumerate(e.to_string()))
    }

    fn device_uuid(&self, index: u32) -> Result<String, DriverError> {
        self.nvml
            .device_by_index(index)
            .and_then(|device| device.uuid())
            .map_err(|e| DriverError::Query {
                index,
                message: format!("uuid: {e}"),
            })
    }

    fn query(&self, index: u32, query: DeviceQuery) -> Result<f64, DriverError> {
        self.read(index, query).map_err(|e| DriverError::Query {
            index,
            message: format!("{query:?}: {e}"),
        })
    }
}
