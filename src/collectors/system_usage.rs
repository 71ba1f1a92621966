//! Host usage collector.

use prometheus::Gauge;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

use crate::collector::{BuildError, CollectError, Collector, CollectorOptions, Reading};
use crate::collectors::machine_label;
use crate::sink::MetricSink;
use crate::system::{self, CpuUsageTracker};

#[derive(Debug, Clone, Deserialize)]
pub struct SystemUsageOptions {
    #[serde(default)]
    pub machine: Option<String>,
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
    #[serde(default = "default_hwmon_root")]
    pub hwmon_root: PathBuf,
    #[serde(default = "default_pts_dir")]
    pub pts_dir: PathBuf,
}

fn default_disk_path() -> PathBuf {
    PathBuf::from("/")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_hwmon_root() -> PathBuf {
    PathBuf::from("/sys/class/hwmon")
}

fn default_pts_dir() -> PathBuf {
    PathBuf::from("/dev/pts")
}

struct Gauges {
    cpu_usage: Gauge,
    memory_usage: Gauge,
    disk_usage: Gauge,
    terminal_count: Gauge,
    user_count: Gauge,
    load_1m: Gauge,
    cpu_temp: Gauge,
}

impl Gauges {
    fn register(sink: &MetricSink, machine: &str) -> Result<Self, BuildError> {
        let gauge = |name: &str, help: &str| -> Result<Gauge, BuildError> {
            Ok(sink
                .register_gauge(name, help, &["machine"])?
                .with_labels(&[machine])?)
        };

        Ok(Self {
            cpu_usage: gauge("cpu_usage", "CPU usage percentage")?,
            memory_usage: gauge(
                "memory_usage",
                "Memory usage percentage, including buffer/cache",
            )?,
            disk_usage: gauge("disk_usage", "Disk space usage percentage")?,
            terminal_count: gauge("terminal_count", "Number of open terminals")?,
            user_count: gauge("user_count", "Number of users connected")?,
            load_1m: gauge("load_1m", "System load average over 1 minute")?,
            cpu_temp: gauge("cpu_temp", "CPU temperature in Celsius")?,
        })
    }
}

/// Samples CPU, memory, disk, session counts, load and CPU temperature.
///
/// Each quantity is read independently: a failing source leaves its gauge
/// at the previous value, the others are still updated, and the first
/// error is returned once all sources were tried.
pub struct SystemUsageCollector {
    machine: String,
    options: SystemUsageOptions,
    cpu: CpuUsageTracker,
    gauges: Gauges,
}

impl SystemUsageCollector {
    pub fn new(options: &CollectorOptions, sink: &MetricSink) -> Result<Self, BuildError> {
        let options: SystemUsageOptions = options.parse()?;
        let machine = machine_label(options.machine.as_deref());
        let gauges = Gauges::register(sink, &machine)?;

        debug!(
            "System usage collector for machine {} (proc {}, disk {})",
            machine,
            options.proc_root.display(),
            options.disk_path.display()
        );

        Ok(Self {
            machine,
            options,
            cpu: CpuUsageTracker::new(),
            gauges,
        })
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }
}

impl Collector for SystemUsageCollector {
    fn collect(&mut self) -> Result<(), CollectError> {
        let opts = &self.options;
        let mut first_error: Option<CollectError> = None;
        let mut record = |result: Result<(), CollectError>| {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        };

        let cpu = &mut self.cpu;
        let gauges = &self.gauges;

        record(system::read_cpu_stat(&opts.proc_root).map(|stat| {
            let reading = cpu.sample(stat);
            if !reading.is_available() {
                debug!("cpu_usage has no baseline yet");
            }
            gauges.cpu_usage.set(reading.or_sentinel());
        }));
        record(
            system::read_memory_info(&opts.proc_root)
                .map(|mem| gauges.memory_usage.set(mem.usage_percent())),
        );
        record(system::read_disk_usage(&opts.disk_path).map(|pct| gauges.disk_usage.set(pct)));
        record(
            system::count_terminals(&opts.pts_dir)
                .map(|n| gauges.terminal_count.set(n as f64)),
        );
        record(
            system::count_shell_users(&opts.proc_root).map(|n| gauges.user_count.set(n as f64)),
        );
        record(
            system::read_load_average(&opts.proc_root)
                .map(|load| gauges.load_1m.set(load.one_min)),
        );

        let temp = system::read_cpu_temperature(&opts.hwmon_root);
        if temp == Reading::Unavailable {
            debug!("No CPU temperature sensor under {}", opts.hwmon_root.display());
        }
        gauges.cpu_temp.set(temp.or_sentinel());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    struct FakeHost {
        root: TempDir,
    }

    impl FakeHost {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            let proc = root.path().join("proc");
            fs::create_dir_all(proc.join("42")).unwrap();
            fs::write(proc.join("stat"), "cpu  100 0 100 800 0 0 0 0\n").unwrap();
            fs::write(
                proc.join("meminfo"),
                "MemTotal: 2000 kB\nMemAvailable: 500 kB\n",
            )
            .unwrap();
            fs::write(proc.join("loadavg"), "1.25 0.80 0.50 1/100 42\n").unwrap();
            fs::write(proc.join("42").join("comm"), "bash\n").unwrap();
            fs::write(proc.join("42").join("status"), "Uid:\t1000\t1000\t1000\t1000\n").unwrap();

            let pts = root.path().join("pts");
            fs::create_dir_all(&pts).unwrap();
            fs::write(pts.join("0"), "").unwrap();
            fs::write(pts.join("ptmx"), "").unwrap();

            let hwmon = root.path().join("hwmon").join("hwmon0");
            fs::create_dir_all(&hwmon).unwrap();
            fs::write(hwmon.join("name"), "cpu_thermal\n").unwrap();
            fs::write(hwmon.join("temp1_input"), "48312\n").unwrap();

            Self { root }
        }

        fn options(&self) -> CollectorOptions {
            let p = self.root.path();
            CollectorOptions::new(json!({
                "machine": "testbox.lab",
                "disk_path": p,
                "proc_root": p.join("proc"),
                "hwmon_root": p.join("hwmon"),
                "pts_dir": p.join("pts"),
            }))
        }
    }

    #[test]
    fn test_gauges_exist_before_first_collect() {
        let host = FakeHost::new();
        let sink = MetricSink::new();
        let collector = SystemUsageCollector::new(&host.options(), &sink).unwrap();
        assert_eq!(collector.machine(), "testbox");

        for name in [
            "cpu_usage",
            "memory_usage",
            "disk_usage",
            "terminal_count",
            "user_count",
            "load_1m",
            "cpu_temp",
        ] {
            assert_eq!(sink.value(name, &["testbox"]), Some(0.0), "{name}");
        }
    }

    #[test]
    fn test_collect_updates_gauges() {
        let host = FakeHost::new();
        let sink = MetricSink::new();
        let mut collector = SystemUsageCollector::new(&host.options(), &sink).unwrap();

        collector.collect().unwrap();

        assert_eq!(sink.value("cpu_usage", &["testbox"]), Some(0.0));
        assert_eq!(sink.value("memory_usage", &["testbox"]), Some(75.0));
        assert_eq!(sink.value("terminal_count", &["testbox"]), Some(1.0));
        assert_eq!(sink.value("user_count", &["testbox"]), Some(1.0));
        assert_eq!(sink.value("load_1m", &["testbox"]), Some(1.25));
        assert_eq!(sink.value("cpu_temp", &["testbox"]), Some(48.312));

        fs::write(
            host.root.path().join("proc").join("stat"),
            "cpu  200 0 200 1400 0 0 0 0\n",
        )
        .unwrap();
        collector.collect().unwrap();
        // 800 ticks elapsed, 200 of them busy
        assert_eq!(sink.value("cpu_usage", &["testbox"]), Some(25.0));
    }

    #[test]
    fn test_missing_source_fails_but_updates_others() {
        let host = FakeHost::new();
        fs::remove_file(host.root.path().join("proc").join("meminfo")).unwrap();

        let sink = MetricSink::new();
        let mut collector = SystemUsageCollector::new(&host.options(), &sink).unwrap();
        let err = collector.collect().unwrap_err();

        assert!(matches!(err, CollectError::Io { .. }));
        assert_eq!(sink.value("load_1m", &["testbox"]), Some(1.25));
    }

    #[test]
    fn test_second_instance_rejected_by_sink() {
        let host = FakeHost::new();
        let sink = MetricSink::new();
        SystemUsageCollector::new(&host.options(), &sink).unwrap();
        let err = SystemUsageCollector::new(&host.options(), &sink).err().unwrap();
        assert!(matches!(err, BuildError::Sink(_)));
    }
}
