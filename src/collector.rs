//! Collector contract shared by the registry, the exporter core and every
//! leaf collector.
//!
//! A collector is constructed once from its options against a
//! [`MetricSink`], registers every gauge it will ever update, and is then
//! invoked once per tick through [`Collector::collect`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::sink::{MetricSink, SinkError};

/// Errors that prevent a collector from being constructed.
///
/// Any of these skips the offending configuration entry; the exporter keeps
/// running with the remaining collectors.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing required option '{0}'")]
    MissingOption(&'static str),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("found {devices} device(s) but {names} name(s) were configured")]
    NameMismatch { devices: usize, names: usize },

    #[error("device error: {0}")]
    Device(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metric registration failed: {0}")]
    Sink(#[from] SinkError),
}

/// Errors raised by a single collect-once invocation.
///
/// The exporter logs them with the collector identity and keeps the
/// collector registered for later ticks.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("device error: {0}")]
    Device(String),

    #[error("metric update failed: {0}")]
    Sink(#[from] SinkError),

    #[error("collection exceeded timeout of {0:?}")]
    Timeout(Duration),

    #[error("previous collection is still running")]
    Busy,

    #[error("collector panicked: {0}")]
    Panicked(String),
}

impl CollectError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(what: impl Into<String>, detail: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            detail: detail.to_string(),
        }
    }
}

/// Outcome of reading a single quantity.
///
/// `Unavailable` is not an error: the collector is healthy but the quantity
/// cannot be determined right now (no thermal sensor present, sensor still
/// settling). Callers write the sentinel instead of failing the tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Value(f64),
    Unavailable,
}

impl Reading {
    /// Sentinel written to a gauge when a reading is unavailable.
    pub const SENTINEL: f64 = 0.0;

    pub fn or_sentinel(self) -> f64 {
        match self {
            Reading::Value(v) => v,
            Reading::Unavailable => Self::SENTINEL,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Value(_))
    }
}

/// Options blob attached to one configured collector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectorOptions(Value);

impl CollectorOptions {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn empty() -> Self {
        Self(Value::Null)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Inserts `key` if the options do not already carry it.
    pub fn set_default(&mut self, key: &str, value: Value) {
        if self.0.is_null() {
            self.0 = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.0 {
            map.entry(key.to_string()).or_insert(value);
        }
    }

    /// Deserializes the options into the collector's own option type.
    /// `null` is treated as an empty mapping so `T`'s serde defaults apply.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, BuildError> {
        let value = match &self.0 {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| BuildError::InvalidOptions(e.to_string()))
    }
}

/// A live collector instance.
///
/// `collect` performs blocking local I/O; the exporter runs it on the
/// blocking pool under a timeout.
pub trait Collector: Send + 'static {
    /// Samples current state once and pushes updates into the sink.
    fn collect(&mut self) -> Result<(), CollectError>;

    /// Releases device handles. Called once when the exporter stops.
    fn close(&mut self) {}
}

/// Constructs a collector from its options against a metric sink.
pub type CollectorFactory =
    Arc<dyn Fn(&CollectorOptions, &MetricSink) -> Result<Box<dyn Collector>, BuildError> + Send + Sync>;

/// Wraps a constructor function or closure as a [`CollectorFactory`].
pub fn factory<F>(f: F) -> CollectorFactory
where
    F: Fn(&CollectorOptions, &MetricSink) -> Result<Box<dyn Collector>, BuildError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct SampleOptions {
        #[serde(default)]
        names: Vec<String>,
        #[serde(default)]
        strict: bool,
    }

    #[test]
    fn test_null_options_use_defaults() {
        let opts: SampleOptions = CollectorOptions::empty().parse().unwrap();
        assert!(opts.names.is_empty());
        assert!(!opts.strict);
    }

    #[test]
    fn test_parse_options() {
        let raw = serde_json::json!({ "names": ["a", "b"], "strict": true });
        let opts: SampleOptions = CollectorOptions::new(raw).parse().unwrap();
        assert_eq!(opts.names, vec!["a", "b"]);
        assert!(opts.strict);
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let raw = serde_json::json!({ "names": "not-a-list" });
        let err = CollectorOptions::new(raw)
            .parse::<SampleOptions>()
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidOptions(_)));
    }

    #[test]
    fn test_set_default_does_not_override() {
        let mut opts = CollectorOptions::new(serde_json::json!({ "names": ["x"] }));
        opts.set_default("names", serde_json::json!(["y"]));
        assert_eq!(opts.get("names"), Some(&serde_json::json!(["x"])));

        let mut empty = CollectorOptions::empty();
        empty.set_default("names", serde_json::json!(["y"]));
        assert_eq!(empty.get("names"), Some(&serde_json::json!(["y"])));
    }

    #[test]
    fn test_reading_sentinel() {
        assert_eq!(Reading::Value(21.5).or_sentinel(), 21.5);
        assert_eq!(Reading::Unavailable.or_sentinel(), 0.0);
        assert!(!Reading::Unavailable.is_available());
    }
}
