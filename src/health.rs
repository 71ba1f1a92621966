//! Health statistics for the collection loop.
//!
//! Tracks per-collector invocation outcomes and timings plus loop-wide
//! counters, and renders them as the plain-text table served on `/health`.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::collector::CollectError;

/// Running statistics for a single metric.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// (last, avg, max, min, count)
    pub fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Outcome counters for one collector.
#[derive(Default)]
pub struct CollectorStats {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub duration_ms: Stat,
    last_error: RwLock<Option<String>>,
    last_ok: RwLock<Option<bool>>,
}

impl CollectorStats {
    pub fn record_success(&self, duration: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.duration_ms.add_sample(duration.as_secs_f64() * 1000.0);
        if let Ok(mut ok) = self.last_ok.write() {
            *ok = Some(true);
        }
    }

    pub fn record_failure(&self, duration: Duration, error: &CollectError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if matches!(error, CollectError::Timeout(_) | CollectError::Busy) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        self.duration_ms.add_sample(duration.as_secs_f64() * 1000.0);
        if let Ok(mut last) = self.last_error.write() {
            *last = Some(error.to_string());
        }
        if let Ok(mut ok) = self.last_ok.write() {
            *ok = Some(false);
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().ok().and_then(|e| e.clone())
    }

    /// `None` until the collector has been invoked once.
    pub fn last_ok(&self) -> Option<bool> {
        self.last_ok.read().ok().and_then(|ok| *ok)
    }
}

/// Health of the whole collection loop.
pub struct ExporterHealth {
    collectors: Vec<(String, CollectorStats)>,
    skipped: Vec<(String, String)>,
    pub ticks: AtomicU64,
    pub tick_duration_ms: Stat,
    pub start_time: Instant,
}

impl ExporterHealth {
    /// `collectors` are the identifiers of the running collectors, in
    /// execution order; `skipped` pairs identifiers with build errors.
    pub fn new(collectors: &[String], skipped: Vec<(String, String)>) -> Self {
        Self {
            collectors: collectors
                .iter()
                .map(|id| (id.clone(), CollectorStats::default()))
                .collect(),
            skipped,
            ticks: AtomicU64::new(0),
            tick_duration_ms: Stat::default(),
            start_time: Instant::now(),
        }
    }

    pub fn collector(&self, index: usize) -> Option<&CollectorStats> {
        self.collectors.get(index).map(|(_, stats)| stats)
    }

    pub fn collector_by_id(&self, id: &str) -> Option<&CollectorStats> {
        self.collectors
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, stats)| stats)
    }

    pub fn skipped(&self) -> &[(String, String)] {
        &self.skipped
    }

    pub fn record_tick(&self, duration: Duration) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.tick_duration_ms
            .add_sample(duration.as_secs_f64() * 1000.0);
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Identifiers whose most recent invocation failed.
    pub fn failing(&self) -> Vec<&str> {
        self.collectors
            .iter()
            .filter(|(_, stats)| stats.last_ok() == Some(false))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Renders the plain-text health table.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        writeln!(out, "COLLECTORS").ok();
        writeln!(out, "==========").ok();
        writeln!(out).ok();
        writeln!(
            out,
            "{:45} | {:>8} | {:>8} | {:>8} | {:>10} | {:>10}",
            "Collector", "OK", "Failed", "Timeout", "Last (ms)", "Avg (ms)"
        )
        .ok();
        writeln!(out, "{}", "-".repeat(104)).ok();

        for (id, stats) in &self.collectors {
            let (last, avg, _, _, _) = stats.duration_ms.snapshot();
            writeln!(
                out,
                "{:45} | {:>8} | {:>8} | {:>8} | {:>10.2} | {:>10.2}",
                id,
                stats.successes.load(Ordering::Relaxed),
                stats.failures.load(Ordering::Relaxed),
                stats.timeouts.load(Ordering::Relaxed),
                last,
                avg
            )
            .ok();
            if let Some(err) = stats.last_error() {
                writeln!(out, "    last error: {}", err).ok();
            }
        }

        if !self.skipped.is_empty() {
            writeln!(out).ok();
            writeln!(out, "SKIPPED AT STARTUP").ok();
            writeln!(out, "==================").ok();
            for (id, err) in &self.skipped {
                writeln!(out, "{:45} | {}", id, err).ok();
            }
        }

        let (last_tick, avg_tick, max_tick, _, _) = self.tick_duration_ms.snapshot();
        writeln!(out).ok();
        writeln!(
            out,
            "Ticks: {} | last {:.2} ms | avg {:.2} ms | max {:.2} ms",
            self.tick_count(),
            last_tick,
            avg_tick,
            max_tick
        )
        .ok();
        out
    }
}
