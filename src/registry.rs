//! Collector registry: maps configured identifiers to collector factories.
//!
//! Identifiers are either a short alias (`system_usage`) or a qualified
//! `<group>.<TypeName>` name (`temperature.DS18B20TemperatureCollector`).
//! Built-in collectors are registered by [`CollectorRegistry::with_builtins`];
//! external code may add its own through [`CollectorRegistry::register`]
//! before the exporter starts.

use ahash::AHashMap as HashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::collector::{BuildError, Collector, CollectorFactory};
use crate::collectors;
use crate::config::CollectorSpec;
use crate::sink::MetricSink;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("identifier pattern is valid")
});

/// Identifier resolution failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid collector identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("unknown collector alias '{0}'")]
    UnknownAlias(String),

    #[error("unknown collector group '{0}'")]
    UnknownGroup(String),

    #[error("collector type '{type_name}' not found in group '{group}'")]
    UnknownType { group: String, type_name: String },
}

/// Why a configured entry did not produce a collector.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Resolve(#[from] RegistryError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// A constructed collector tagged with the identifier it was configured as.
pub struct NamedCollector {
    pub id: String,
    pub collector: Box<dyn Collector>,
}

impl std::fmt::Debug for NamedCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedCollector")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A configured entry that was skipped.
#[derive(Debug)]
pub struct BuildFailure {
    pub id: String,
    pub error: EntryError,
}

/// Result of building every configured collector.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub collectors: Vec<NamedCollector>,
    pub failures: Vec<BuildFailure>,
}

impl BuildReport {
    pub fn built_ids(&self) -> Vec<&str> {
        self.collectors.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.id.as_str()).collect()
    }
}

/// Lookup table from identifiers to factories.
#[derive(Default)]
pub struct CollectorRegistry {
    groups: HashMap<String, HashMap<String, CollectorFactory>>,
    aliases: HashMap<String, (String, String)>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}

impl CollectorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the built-in collectors and their aliases.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        collectors::register_builtins(&mut registry);
        registry
    }

    /// Registers `factory` as `<group>.<type_name>`. Replaces any previous
    /// factory under the same qualified name.
    pub fn register(&mut self, group: &str, type_name: &str, factory: CollectorFactory) {
        let previous = self
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(type_name.to_string(), factory);
        if previous.is_some() {
            warn!(
                "Collector {}.{} registered twice, keeping the latest factory",
                group, type_name
            );
        }
    }

    /// Adds a short alias for a qualified identifier.
    pub fn alias(&mut self, alias: &str, group: &str, type_name: &str) {
        self.aliases
            .insert(alias.to_string(), (group.to_string(), type_name.to_string()));
    }

    /// Resolves an identifier to the factory that constructs it.
    pub fn resolve(&self, identifier: &str) -> Result<&CollectorFactory, RegistryError> {
        if !IDENTIFIER_RE.is_match(identifier) {
            return Err(RegistryError::InvalidIdentifier(identifier.to_string()));
        }

        let (group, type_name) = match identifier.rsplit_once('.') {
            Some((group, type_name)) => (group, type_name),
            None => {
                let (group, type_name) = self
                    .aliases
                    .get(identifier)
                    .ok_or_else(|| RegistryError::UnknownAlias(identifier.to_string()))?;
                (group.as_str(), type_name.as_str())
            }
        };

        let types = self
            .groups
            .get(group)
            .ok_or_else(|| RegistryError::UnknownGroup(group.to_string()))?;
        types.get(type_name).ok_or_else(|| RegistryError::UnknownType {
            group: group.to_string(),
            type_name: type_name.to_string(),
        })
    }

    /// Every resolvable identifier, aliases first, each list sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.aliases.keys().cloned().collect();
        aliases.sort();

        let mut qualified: Vec<String> = self
            .groups
            .iter()
            .flat_map(|(group, types)| types.keys().map(move |t| format!("{group}.{t}")))
            .collect();
        qualified.sort();

        aliases.extend(qualified);
        aliases
    }

    /// Resolves and constructs a single entry.
    pub fn build_one(
        &self,
        spec: &CollectorSpec,
        sink: &MetricSink,
    ) -> Result<Box<dyn Collector>, EntryError> {
        let factory = self.resolve(&spec.id)?;
        let registered = sink.series_names();
        match factory(&spec.options, sink) {
            Ok(collector) => Ok(collector),
            Err(e) => {
                // Drop whatever the failed factory registered before bailing.
                sink.retain_series(&registered);
                Err(e.into())
            }
        }
    }

    /// Builds every configured collector in configuration order.
    ///
    /// A failing entry is logged and recorded in the report; it never
    /// prevents the remaining entries from being built.
    pub fn build(&self, specs: &[CollectorSpec], sink: &MetricSink) -> BuildReport {
        let mut report = BuildReport::default();

        for spec in specs {
            match self.build_one(spec, sink) {
                Ok(collector) => {
                    info!("Instantiated collector: {}", spec.id);
                    report.collectors.push(NamedCollector {
                        id: spec.id.clone(),
                        collector,
                    });
                }
                Err(error) => {
                    warn!("Skipping collector {}: {}", spec.id, error);
                    report.failures.push(BuildFailure {
                        id: spec.id.clone(),
                        error,
                    });
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{factory, CollectError, CollectorOptions};

    struct Noop;

    impl Collector for Noop {
        fn collect(&mut self) -> Result<(), CollectError> {
            Ok(())
        }
    }

    fn noop_factory() -> CollectorFactory {
        factory(|_, _| Ok(Box::new(Noop) as Box<dyn Collector>))
    }

    #[test]
    fn test_resolve_qualified_and_alias() {
        let mut registry = CollectorRegistry::new();
        registry.register("custom", "NoopCollector", noop_factory());
        registry.alias("noop", "custom", "NoopCollector");

        assert!(registry.resolve("custom.NoopCollector").is_ok());
        assert!(registry.resolve("noop").is_ok());
    }

    #[test]
    fn test_resolve_nested_group_path() {
        let mut registry = CollectorRegistry::new();
        registry.register("vendor.sensors", "Probe", noop_factory());
        assert!(registry.resolve("vendor.sensors.Probe").is_ok());
        assert!(matches!(
            registry.resolve("vendor.Probe"),
            Err(RegistryError::UnknownGroup(g)) if g == "vendor"
        ));
    }

    #[test]
    fn test_resolve_errors() {
        let mut registry = CollectorRegistry::new();
        registry.register("custom", "NoopCollector", noop_factory());

        assert!(matches!(
            registry.resolve("missing"),
            Err(RegistryError::UnknownAlias(_))
        ));
        assert!(matches!(
            registry.resolve("other.NoopCollector"),
            Err(RegistryError::UnknownGroup(_))
        ));
        assert!(matches!(
            registry.resolve("custom.Missing"),
            Err(RegistryError::UnknownType { .. })
        ));
        for bad in ["", "custom.", ".Noop", "custom..Noop", "has space", "1abc"] {
            assert!(
                matches!(registry.resolve(bad), Err(RegistryError::InvalidIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_builtins_are_listed() {
        let registry = CollectorRegistry::with_builtins();
        let ids = registry.identifiers();
        for expected in [
            "system_usage",
            "ds18b20_temperature",
            "bme280_temperature",
            "system.SystemUsageCollector",
            "temperature.DS18B20TemperatureCollector",
            "temperature.BME280TemperatureCollector",
        ] {
            assert!(ids.iter().any(|id| id == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_build_skips_failures_and_keeps_order() {
        let mut registry = CollectorRegistry::new();
        registry.register("custom", "A", noop_factory());
        registry.register("custom", "B", noop_factory());
        registry.register(
            "custom",
            "Broken",
            factory(|_, _| Err(BuildError::MissingOption("names"))),
        );

        let specs = vec![
            CollectorSpec::new("custom.B", CollectorOptions::empty()),
            CollectorSpec::new("does_not_exist", CollectorOptions::empty()),
            CollectorSpec::new("custom.Broken", CollectorOptions::empty()),
            CollectorSpec::new("custom.A", CollectorOptions::empty()),
        ];

        let sink = MetricSink::new();
        let report = registry.build(&specs, &sink);
        assert_eq!(report.built_ids(), vec!["custom.B", "custom.A"]);
        assert_eq!(report.failed_ids(), vec!["does_not_exist", "custom.Broken"]);
    }
}
