//! Collection loop behavior: fault isolation, timeouts, panics, ordering and
//! the stop signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dssg_monitor::collector::{CollectError, Collector};
use dssg_monitor::exporter::{Exporter, LoopSettings};
use dssg_monitor::registry::{BuildReport, NamedCollector};
use dssg_monitor::sink::MetricSink;
use tokio::sync::watch;

type Script = Box<dyn FnMut(u64) -> Result<(), CollectError> + Send>;

/// Collector driven by a closure that receives the 1-based call number.
struct Scripted {
    calls: u64,
    script: Script,
    closed: Arc<AtomicBool>,
}

impl Collector for Scripted {
    fn collect(&mut self) -> Result<(), CollectError> {
        self.calls += 1;
        (self.script)(self.calls)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn scripted<F>(script: F) -> (Box<dyn Collector>, Arc<AtomicBool>)
where
    F: FnMut(u64) -> Result<(), CollectError> + Send + 'static,
{
    let closed = Arc::new(AtomicBool::new(false));
    let collector = Scripted {
        calls: 0,
        script: Box::new(script),
        closed: closed.clone(),
    };
    (Box::new(collector), closed)
}

fn counting() -> (Box<dyn Collector>, Arc<AtomicU64>) {
    let count = Arc::new(AtomicU64::new(0));
    let c = count.clone();
    let (collector, _) = scripted(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (collector, count)
}

fn report(collectors: Vec<(&str, Box<dyn Collector>)>) -> BuildReport {
    BuildReport {
        collectors: collectors
            .into_iter()
            .map(|(id, collector)| NamedCollector {
                id: id.to_string(),
                collector,
            })
            .collect(),
        failures: Vec::new(),
    }
}

fn settings(interval_ms: u64, timeout_ms: u64) -> LoopSettings {
    LoopSettings {
        interval: Duration::from_millis(interval_ms),
        collect_timeout: Duration::from_millis(timeout_ms),
        telemetry: true,
    }
}

#[tokio::test]
async fn test_failure_on_one_tick_is_isolated() {
    let (flaky, _) = scripted(|call| {
        if call == 5 {
            Err(CollectError::Device("bus reset".into()))
        } else {
            Ok(())
        }
    });
    let (steady, steady_count) = counting();

    let mut exporter = Exporter::new(
        report(vec![("flaky", flaky), ("steady", steady)]),
        Arc::new(MetricSink::new()),
        settings(10, 1000),
    );

    for tick in 1..=10u64 {
        let report = exporter.tick().await;
        assert_eq!(report.tick, tick);
        if tick == 5 {
            assert_eq!(report.failed(), vec!["flaky"]);
            assert_eq!(report.succeeded(), vec!["steady"]);
        } else {
            assert_eq!(report.succeeded(), vec!["flaky", "steady"]);
        }
    }
    assert_eq!(steady_count.load(Ordering::SeqCst), 10);

    let health = exporter.health();
    let stats = health.collector_by_id("flaky").unwrap();
    assert_eq!(stats.failures.load(Ordering::Relaxed), 1);
    assert_eq!(stats.successes.load(Ordering::Relaxed), 9);
    assert!(health.failing().is_empty());
}

#[tokio::test]
async fn test_always_failing_collector_is_retried_every_tick() {
    let attempts = Arc::new(AtomicU64::new(0));
    let a = attempts.clone();
    let (broken, _) = scripted(move |_| {
        a.fetch_add(1, Ordering::SeqCst);
        Err(CollectError::parse("temperature", "\"\""))
    });

    let sink = Arc::new(MetricSink::new());
    let mut exporter = Exporter::new(report(vec![("broken", broken)]), sink.clone(), settings(10, 1000));
    for _ in 0..3 {
        exporter.tick().await;
    }

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(exporter.health().failing(), vec!["broken"]);
    assert_eq!(sink.value("dssg_monitor_collector_up", &["broken"]), Some(0.0));
}

#[tokio::test]
async fn test_collectors_run_in_configured_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut collectors = Vec::new();
    for id in ["c", "a", "b"] {
        let log = log.clone();
        let (collector, _) = scripted(move |_| {
            log.lock().unwrap().push(id);
            Ok(())
        });
        collectors.push((id, collector));
    }

    let mut exporter = Exporter::new(report(collectors), Arc::new(MetricSink::new()), settings(10, 1000));
    assert_eq!(exporter.collector_ids(), vec!["c", "a", "b"]);

    exporter.tick().await;
    exporter.tick().await;
    assert_eq!(*log.lock().unwrap(), vec!["c", "a", "b", "c", "a", "b"]);
}

#[tokio::test]
async fn test_hung_collector_times_out_then_reports_busy() {
    let (slow, _) = scripted(|call| {
        if call == 1 {
            std::thread::sleep(Duration::from_millis(400));
        }
        Ok(())
    });
    let (steady, steady_count) = counting();

    let mut exporter = Exporter::new(
        report(vec![("slow", slow), ("steady", steady)]),
        Arc::new(MetricSink::new()),
        settings(10, 50),
    );

    let first = exporter.tick().await;
    assert!(matches!(
        first.outcomes[0].result,
        Err(CollectError::Timeout(_))
    ));
    assert!(first.outcomes[1].result.is_ok());

    // Still stuck in the first invocation.
    let second = exporter.tick().await;
    assert!(matches!(second.outcomes[0].result, Err(CollectError::Busy)));
    assert!(second.outcomes[1].result.is_ok());

    tokio::time::sleep(Duration::from_millis(600)).await;
    let third = exporter.tick().await;
    assert!(third.outcomes[0].result.is_ok());

    assert_eq!(steady_count.load(Ordering::SeqCst), 3);
    let health = exporter.health();
    assert_eq!(
        health
            .collector_by_id("slow")
            .unwrap()
            .timeouts
            .load(Ordering::Relaxed),
        2
    );
}

#[tokio::test]
async fn test_panicking_collector_stays_registered() {
    let (fragile, _) = scripted(|call| {
        if call == 1 {
            panic!("sensor driver exploded");
        }
        Ok(())
    });
    let (steady, steady_count) = counting();

    let mut exporter = Exporter::new(
        report(vec![("fragile", fragile), ("steady", steady)]),
        Arc::new(MetricSink::new()),
        settings(10, 1000),
    );

    let first = exporter.tick().await;
    match &first.outcomes[0].result {
        Err(CollectError::Panicked(msg)) => assert!(msg.contains("sensor driver exploded")),
        other => panic!("expected panic outcome, got {other:?}"),
    }
    assert!(first.outcomes[1].result.is_ok());

    let second = exporter.tick().await;
    assert_eq!(second.succeeded(), vec!["fragile", "steady"]);
    assert_eq!(steady_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_run_stops_on_signal_and_closes_collectors() {
    let (collector, count) = counting();
    let (watched, closed) = scripted(|_| Ok(()));

    let exporter = Exporter::new(
        report(vec![("counting", collector), ("watched", watched)]),
        Arc::new(MetricSink::new()),
        settings(20, 1000),
    );
    let health = exporter.health();

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(exporter.run(rx));

    tokio::time::sleep(Duration::from_millis(150)).await;
    tx.send(true).unwrap();

    let ticks = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop did not stop")
        .unwrap();

    assert!(ticks >= 2, "only {ticks} ticks ran");
    // The signal may land between the tick boundary and the first collector.
    let count = count.load(Ordering::SeqCst);
    assert!(count == ticks || count + 1 == ticks, "{count} calls, {ticks} ticks");
    assert_eq!(health.tick_count(), ticks);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stop_mid_tick_skips_remaining_collectors() {
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);

    let stopper_tx = tx.clone();
    let (stopper, _) = scripted(move |_| {
        stopper_tx.send(true).ok();
        Ok(())
    });
    let (after, after_count) = counting();

    let exporter = Exporter::new(
        report(vec![("stopper", stopper), ("after", after)]),
        Arc::new(MetricSink::new()),
        settings(20, 1000),
    );

    let ticks = tokio::time::timeout(Duration::from_secs(2), exporter.run(rx))
        .await
        .expect("loop did not stop");

    assert_eq!(ticks, 1);
    assert_eq!(after_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_already_stopped_runs_no_tick() {
    let (collector, count) = counting();
    let exporter = Exporter::new(
        report(vec![("counting", collector)]),
        Arc::new(MetricSink::new()),
        settings(20, 1000),
    );

    let (tx, rx) = watch::channel(true);
    let ticks = exporter.run(rx).await;
    drop(tx);

    assert_eq!(ticks, 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dropped_sender_stops_loop() {
    let (collector, _) = counting();
    let exporter = Exporter::new(
        report(vec![("counting", collector)]),
        Arc::new(MetricSink::new()),
        settings(20, 1000),
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(exporter.run(rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(tx);

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_telemetry_tracks_build_failures() {
    use dssg_monitor::config::CollectorSpec;
    use dssg_monitor::registry::CollectorRegistry;
    use dssg_monitor::CollectorOptions;

    let sink = Arc::new(MetricSink::new());
    let registry = CollectorRegistry::with_builtins();
    let specs = vec![
        CollectorSpec::new("nope", CollectorOptions::empty()),
        CollectorSpec::new("temperature.Missing", CollectorOptions::empty()),
    ];
    let report = registry.build(&specs, &sink);

    let exporter = Exporter::new(report, sink.clone(), settings(20, 1000));
    assert_eq!(
        sink.value("dssg_monitor_collectors_failed_to_build", &[]),
        Some(2.0)
    );
    assert_eq!(exporter.health().skipped().len(), 2);
}
