//! Metric sink backing the `/metrics` endpoint.
//!
//! The sink owns a Prometheus [`Registry`] and every gauge family registered
//! against it. Collectors receive a reference at construction time, register
//! the gauges they will ever touch, and update them on each tick. The HTTP
//! handler reads the same registry concurrently; prometheus gauges are atomic
//! so a scrape never sees a torn value.

use ahash::AHashMap as HashMap;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by the metric sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("gauge '{0}' is already registered")]
    Duplicate(String),

    #[error("gauge '{0}' is not registered")]
    Unknown(String),

    #[error("gauge '{name}' expects {expected} label values, got {got}")]
    LabelArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("sink lock poisoned")]
    Poisoned,
}

/// A registered gauge family together with its label schema.
#[derive(Clone)]
pub struct GaugeSeries {
    name: String,
    label_keys: Vec<String>,
    vec: GaugeVec,
    children: Arc<RwLock<HashMap<Vec<String>, Gauge>>>,
}

impl fmt::Debug for GaugeSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeSeries")
            .field("name", &self.name)
            .field("label_keys", &self.label_keys)
            .finish_non_exhaustive()
    }
}

impl GaugeSeries {
    /// Returns the child gauge for one label-value combination, creating it
    /// with an initial value of zero if it does not exist yet.
    pub fn with_labels(&self, values: &[&str]) -> Result<Gauge, SinkError> {
        if values.len() != self.label_keys.len() {
            return Err(SinkError::LabelArity {
                name: self.name.clone(),
                expected: self.label_keys.len(),
                got: values.len(),
            });
        }
        let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        if let Some(gauge) = self.children.read().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(gauge);
        }

        let gauge = self.vec.get_metric_with_label_values(values)?;
        let mut children = self.children.write().map_err(|_| SinkError::Poisoned)?;
        children.entry(key).or_insert_with(|| gauge.clone());
        Ok(gauge)
    }

    /// Value of an existing child; `None` if it was never created.
    pub fn value(&self, values: &[&str]) -> Option<f64> {
        let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let children = self.children.read().ok()?;
        children.get(&key).map(|g| g.get())
    }
}

/// Explicit metric sink shared by the exporter, its collectors and the
/// scrape handler.
pub struct MetricSink {
    registry: Registry,
    series: RwLock<HashMap<String, GaugeSeries>>,
}

impl Default for MetricSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Registers gauge `name` with a fixed label-key set.
    ///
    /// A name can be registered exactly once per sink; a second attempt
    /// returns [`SinkError::Duplicate`] and leaves the first series intact.
    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
    ) -> Result<GaugeSeries, SinkError> {
        let mut series = self.series.write().map_err(|_| SinkError::Poisoned)?;
        if series.contains_key(name) {
            return Err(SinkError::Duplicate(name.to_string()));
        }

        let vec = GaugeVec::new(Opts::new(name, help), label_keys)?;
        self.registry.register(Box::new(vec.clone()))?;

        let entry = GaugeSeries {
            name: name.to_string(),
            label_keys: label_keys.iter().map(|k| k.to_string()).collect(),
            vec,
            children: Arc::new(RwLock::new(HashMap::new())),
        };
        series.insert(name.to_string(), entry.clone());
        debug!("Registered gauge {} with labels {:?}", name, label_keys);
        Ok(entry)
    }

    /// Removes gauge `name` and every child from the sink. The name may be
    /// registered again afterwards.
    pub fn unregister(&self, name: &str) -> Result<(), SinkError> {
        let mut series = self.series.write().map_err(|_| SinkError::Poisoned)?;
        let entry = series
            .remove(name)
            .ok_or_else(|| SinkError::Unknown(name.to_string()))?;
        self.registry.unregister(Box::new(entry.vec))?;
        debug!("Unregistered gauge {}", name);
        Ok(())
    }

    /// Unregisters every series not listed in `keep`. Used to undo the
    /// gauges of a collector whose construction failed halfway.
    pub fn retain_series(&self, keep: &[String]) {
        for name in self.series_names() {
            if keep.contains(&name) {
                continue;
            }
            if let Err(e) = self.unregister(&name) {
                warn!("Failed to unregister gauge {}: {}", name, e);
            }
        }
    }

    /// Sets gauge `name` for a label-value combination to `value`.
    pub fn set(&self, name: &str, label_values: &[&str], value: f64) -> Result<(), SinkError> {
        self.series_for(name)?.with_labels(label_values)?.set(value);
        Ok(())
    }

    /// Current value of one labeled gauge, if both the series and the child
    /// exist.
    pub fn value(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let series = self.series.read().ok()?;
        series.get(name)?.value(label_values)
    }

    /// Looks up a registered series by name.
    pub fn series_for(&self, name: &str) -> Result<GaugeSeries, SinkError> {
        let series = self.series.read().map_err(|_| SinkError::Poisoned)?;
        series
            .get(name)
            .cloned()
            .ok_or_else(|| SinkError::Unknown(name.to_string()))
    }

    /// Sorted names of every registered series.
    pub fn series_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.series.read() {
            Ok(series) => series.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    /// Encodes all registered gauges in the Prometheus text format.
    pub fn encode(&self) -> Result<String, SinkError> {
        let families = self.registry.gather();
        let mut buffer = Vec::with_capacity(16 * 1024);
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
