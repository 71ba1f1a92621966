//! dssg-monitor: a pluggable Prometheus exporter.
//!
//! Collectors are resolved from configuration through a
//! [`CollectorRegistry`](registry::CollectorRegistry), constructed against a
//! shared [`MetricSink`](sink::MetricSink), and driven on a fixed interval by
//! the [`Exporter`](exporter::Exporter). A collector that fails, hangs or
//! panics is logged and retried on the next tick; the others keep running.
//!
//! # Features
//!
//! - **Open registry**: built-in collectors plus any registered by the caller
//! - **Fault isolation**: per-collector timeout, panic capture, busy detection
//! - **Graceful stop**: a watch channel ends the loop and closes collectors
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use dssg_monitor::collector::{factory, CollectError, Collector, CollectorOptions};
//! use dssg_monitor::config::CollectorSpec;
//! use dssg_monitor::exporter::{Exporter, LoopSettings};
//! use dssg_monitor::registry::CollectorRegistry;
//! use dssg_monitor::sink::MetricSink;
//!
//! struct Fixed(prometheus::Gauge);
//!
//! impl Collector for Fixed {
//!     fn collect(&mut self) -> Result<(), CollectError> {
//!         self.0.set(42.0);
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = CollectorRegistry::with_builtins();
//! registry.register(
//!     "custom",
//!     "FixedCollector",
//!     factory(|_, sink| {
//!         let gauge = sink.register_gauge("answer", "Always 42", &[])?.with_labels(&[])?;
//!         Ok(Box::new(Fixed(gauge)) as Box<dyn Collector>)
//!     }),
//! );
//!
//! let sink = Arc::new(MetricSink::new());
//! let specs = vec![CollectorSpec::new("custom.FixedCollector", CollectorOptions::empty())];
//! let report = registry.build(&specs, &sink);
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let mut exporter = Exporter::new(report, sink.clone(), LoopSettings::default());
//! runtime.block_on(exporter.tick());
//! assert_eq!(sink.value("answer", &[]), Some(42.0));
//! ```

pub mod cli;
pub mod collector;
pub mod collectors;
pub mod commands;
pub mod config;
pub mod exporter;
pub mod handlers;
pub mod health;
pub mod registry;
pub mod server;
pub mod sink;
pub mod state;
pub mod system;

// Re-export main types for convenience
pub use collector::{BuildError, CollectError, Collector, CollectorFactory, CollectorOptions};
pub use config::{CollectorSpec, Config};
pub use exporter::{Exporter, LoopSettings, TickReport};
pub use registry::{BuildReport, CollectorRegistry};
pub use sink::MetricSink;
