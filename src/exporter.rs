//! Exporter core: owns the collector set and drives the collection loop.
//!
//! Every tick invokes each collector once, sequentially, in configuration
//! order. Each invocation runs on the blocking pool under a timeout; errors,
//! timeouts and panics are caught per collector, logged with the collector
//! identifier, and never stop the remaining collectors or the loop. The loop
//! exits when the stop signal flips, after finishing the invocation in
//! progress, and then closes every collector.

use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::collector::{CollectError, Collector};
use crate::config::Config;
use crate::health::ExporterHealth;
use crate::registry::BuildReport;
use crate::sink::{GaugeSeries, MetricSink};

/// Loop timing and feature settings.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub interval: Duration,
    pub collect_timeout: Duration,
    pub telemetry: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            collect_timeout: Duration::from_secs(5),
            telemetry: true,
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.tick_interval(),
            collect_timeout: config.collect_timeout(),
            telemetry: config.telemetry_enabled(),
        }
    }
}

/// Result of one collector invocation within a tick.
#[derive(Debug)]
pub struct CollectorOutcome {
    pub id: String,
    pub duration: Duration,
    pub result: Result<(), CollectError>,
}

/// Result of one tick.
#[derive(Debug)]
pub struct TickReport {
    pub tick: u64,
    pub outcomes: Vec<CollectorOutcome>,
    /// The stop signal arrived before every collector ran.
    pub interrupted: bool,
}

impl TickReport {
    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.id.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.id.as_str())
            .collect()
    }
}

type SharedCollector = Arc<Mutex<Box<dyn Collector>>>;

struct Slot {
    id: String,
    collector: SharedCollector,
}

/// Self-observability gauges.
struct Telemetry {
    up: GaugeSeries,
    duration: GaugeSeries,
}

impl Telemetry {
    fn register(sink: &MetricSink, ids: &[String], failed_builds: usize) -> Result<Self, crate::sink::SinkError> {
        let up = sink.register_gauge(
            "dssg_monitor_collector_up",
            "Whether the last collection succeeded (1) or failed (0)",
            &["collector"],
        )?;
        let duration = sink.register_gauge(
            "dssg_monitor_collector_duration_seconds",
            "Time spent in the last collection",
            &["collector"],
        )?;
        let build_failures = sink.register_gauge(
            "dssg_monitor_collectors_failed_to_build",
            "Number of configured collectors skipped at startup",
            &[],
        )?;

        for id in ids {
            up.with_labels(&[id])?;
            duration.with_labels(&[id])?;
        }
        build_failures.with_labels(&[])?.set(failed_builds as f64);

        Ok(Self { up, duration })
    }

    fn record(&self, outcome: &CollectorOutcome) {
        let up = if outcome.result.is_ok() { 1.0 } else { 0.0 };
        if let Ok(g) = self.up.with_labels(&[&outcome.id]) {
            g.set(up);
        }
        if let Ok(g) = self.duration.with_labels(&[&outcome.id]) {
            g.set(outcome.duration.as_secs_f64());
        }
    }
}

/// Owns the collector set and the collection loop.
pub struct Exporter {
    slots: Vec<Slot>,
    settings: LoopSettings,
    health: Arc<ExporterHealth>,
    telemetry: Option<Telemetry>,
    ticks: u64,
}

impl Exporter {
    /// Takes ownership of the built collectors. The set is fixed from here on.
    pub fn new(report: BuildReport, sink: Arc<MetricSink>, settings: LoopSettings) -> Self {
        let ids: Vec<String> = report.collectors.iter().map(|c| c.id.clone()).collect();
        let skipped: Vec<(String, String)> = report
            .failures
            .iter()
            .map(|f| (f.id.clone(), f.error.to_string()))
            .collect();

        let telemetry = if settings.telemetry {
            let registered = sink.series_names();
            match Telemetry::register(&sink, &ids, skipped.len()) {
                Ok(t) => Some(t),
                Err(e) => {
                    sink.retain_series(&registered);
                    warn!("Telemetry gauges disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let slots = report
            .collectors
            .into_iter()
            .map(|named| Slot {
                id: named.id,
                collector: Arc::new(Mutex::new(named.collector)),
            })
            .collect();

        Self {
            slots,
            settings,
            health: Arc::new(ExporterHealth::new(&ids, skipped)),
            telemetry,
            ticks: 0,
        }
    }

    pub fn health(&self) -> Arc<ExporterHealth> {
        Arc::clone(&self.health)
    }

    /// Identifiers of the running collectors, in execution order.
    pub fn collector_ids(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.id.as_str()).collect()
    }

    /// Runs one tick over every collector.
    pub async fn tick(&mut self) -> TickReport {
        self.run_tick(None).await
    }

    async fn run_tick(&mut self, stop: Option<&watch::Receiver<bool>>) -> TickReport {
        self.ticks += 1;
        let tick = self.ticks;
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(self.slots.len());
        let mut interrupted = false;

        for (index, slot) in self.slots.iter().enumerate() {
            if stop.is_some_and(|rx| *rx.borrow()) {
                interrupted = true;
                break;
            }

            let invoke_start = Instant::now();
            let result = invoke(&slot.collector, self.settings.collect_timeout).await;
            let duration = invoke_start.elapsed();

            if let Some(stats) = self.health.collector(index) {
                match &result {
                    Ok(()) => stats.record_success(duration),
                    Err(e) => stats.record_failure(duration, e),
                }
            }

            match &result {
                Ok(()) => debug!("Collector {} finished in {:?}", slot.id, duration),
                Err(CollectError::Busy) => {
                    warn!("Collector {} skipped: {}", slot.id, CollectError::Busy)
                }
                Err(e) => error!("Could not collect metrics for {}: {}", slot.id, e),
            }

            let outcome = CollectorOutcome {
                id: slot.id.clone(),
                duration,
                result,
            };
            if let Some(telemetry) = &self.telemetry {
                telemetry.record(&outcome);
            }
            outcomes.push(outcome);
        }

        let elapsed = started.elapsed();
        self.health.record_tick(elapsed);
        debug!(
            "Tick {} completed in {:.2}ms ({} collectors)",
            tick,
            elapsed.as_secs_f64() * 1000.0,
            outcomes.len()
        );

        TickReport {
            tick,
            outcomes,
            interrupted,
        }
    }

    /// Runs the collection loop until `shutdown` turns `true` (or its sender
    /// is dropped), then closes every collector. Returns the number of ticks
    /// that ran.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Collection loop started: {} collectors every {:?}",
            self.slots.len(),
            self.settings.interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            let report = self.run_tick(Some(&shutdown)).await;
            if report.interrupted {
                break;
            }
        }

        info!("Collection loop stopped after {} ticks", self.ticks);
        self.close();
        self.ticks
    }

    /// Releases collector resources. A collector still stuck in a timed-out
    /// invocation cannot be closed and is left to process exit.
    pub fn close(&mut self) {
        for slot in &self.slots {
            match slot.collector.try_lock() {
                Ok(mut guard) => guard.close(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().close(),
                Err(TryLockError::WouldBlock) => {
                    warn!("Collector {} is still running, not closing it", slot.id)
                }
            }
            debug!("Closed collector {}", slot.id);
        }
    }
}

/// Runs one collect-once on the blocking pool under `timeout`.
async fn invoke(collector: &SharedCollector, timeout: Duration) -> Result<(), CollectError> {
    let collector = Arc::clone(collector);
    let task = tokio::task::spawn_blocking(move || {
        let mut guard = match collector.try_lock() {
            Ok(guard) => guard,
            // A panic in an earlier tick poisons the lock; the collector
            // stays registered and is invoked again.
            Err(TryLockError::Poisoned(poisoned)) => {
                collector.clear_poison();
                poisoned.into_inner()
            }
            Err(TryLockError::WouldBlock) => return Err(CollectError::Busy),
        };
        guard.collect()
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(CollectError::Panicked(panic_message(join_err))),
        Err(_) => Err(CollectError::Timeout(timeout)),
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
