//! Built-in collectors.
//!
//! `system` samples host usage (CPU, memory, disk, sessions, load, CPU
//! temperature); `temperature` reads DS18B20 1-Wire probes and the BME280
//! environmental sensor through sysfs.

pub mod system_usage;
pub mod temperature;

use tracing::debug;

use crate::collector::{factory, Collector};
use crate::registry::CollectorRegistry;

pub use system_usage::SystemUsageCollector;
pub use temperature::{BME280TemperatureCollector, DS18B20TemperatureCollector};

/// Environment variable overriding the `machine` label.
pub const MACHINE_NAME_ENV: &str = "MACHINE_NAME";

/// Registers the built-in groups and their short aliases.
pub fn register_builtins(registry: &mut CollectorRegistry) {
    registry.register(
        "system",
        "SystemUsageCollector",
        factory(|options, sink| {
            Ok(Box::new(SystemUsageCollector::new(options, sink)?) as Box<dyn Collector>)
        }),
    );
    registry.register(
        "temperature",
        "DS18B20TemperatureCollector",
        factory(|options, sink| {
            Ok(Box::new(DS18B20TemperatureCollector::new(options, sink)?) as Box<dyn Collector>)
        }),
    );
    registry.register(
        "temperature",
        "BME280TemperatureCollector",
        factory(|options, sink| {
            Ok(Box::new(BME280TemperatureCollector::new(options, sink)?) as Box<dyn Collector>)
        }),
    );

    registry.alias("system_usage", "system", "SystemUsageCollector");
    registry.alias("ds18b20_temperature", "temperature", "DS18B20TemperatureCollector");
    registry.alias("bme280_temperature", "temperature", "BME280TemperatureCollector");
}

/// Value of the `machine` label: explicit option, else `MACHINE_NAME`, else
/// the hostname. Only the part before the first `.` is kept.
pub fn machine_label(explicit: Option<&str>) -> String {
    let raw = explicit
        .map(str::to_string)
        .or_else(|| std::env::var(MACHINE_NAME_ENV).ok())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(hostname);
    short_name(&raw).to_string()
}

fn hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            debug!("gethostname failed: {}", e);
            "unknown".to_string()
        }
    }
}

fn short_name(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("pi-lab.example.org"), "pi-lab");
        assert_eq!(short_name("pi-lab"), "pi-lab");
    }

    #[test]
    fn test_explicit_machine_label_wins() {
        assert_eq!(machine_label(Some("bench.local")), "bench");
    }

    #[test]
    fn test_machine_label_never_contains_dot() {
        assert!(!machine_label(None).contains('.'));
    }
}
