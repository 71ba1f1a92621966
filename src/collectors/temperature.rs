//! Temperature sensor collectors.
//!
//! DS18B20 probes are read from the w1-therm sysfs interface, one directory
//! per probe (`28-*`). The BME280 is read through the kernel IIO driver.
//! Both expose millidegrees Celsius in a single text file that is opened at
//! construction and re-read from offset 0 on every tick.

use ahash::AHashSet as HashSet;
use once_cell::sync::Lazy;
use prometheus::Gauge;
use regex::Regex;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::collector::{BuildError, CollectError, Collector, CollectorOptions};
use crate::collectors::machine_label;
use crate::sink::MetricSink;
use crate::system::parse_millidegrees;

/// Default w1 bus directory.
pub const W1_DEVICES_DIR: &str = "/sys/bus/w1/devices";

/// Default IIO bus directory.
pub const IIO_DEVICES_DIR: &str = "/sys/bus/iio/devices";

/// DS18B20 family code prefix on the w1 bus.
const DS18B20_PREFIX: &str = "28-";

/// Suffix allowed after `temp_` in a metric name.
static PROBE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_:]+$").expect("probe name pattern is valid"));

/// IIO driver names that expose a BME280-compatible temperature channel.
const BME280_DRIVER_NAMES: &[&str] = &["bme280", "bmp280"];

/// A sysfs attribute kept open for repeated reads.
struct SysfsReader {
    path: PathBuf,
    file: Option<File>,
    buf: String,
}

impl SysfsReader {
    fn open(path: PathBuf) -> Result<Self, BuildError> {
        let file = File::open(&path).map_err(|source| BuildError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            path,
            file: Some(file),
            buf: String::new(),
        })
    }

    fn read_celsius(&mut self) -> Result<f64, CollectError> {
        let path = self.path.display().to_string();
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CollectError::Device(format!("{path} is closed")))?;

        self.buf.clear();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut self.buf))
            .map_err(|e| CollectError::io(path.clone(), e))?;

        parse_millidegrees(&self.buf)
            .ok_or_else(|| CollectError::parse(path, format!("{:?}", self.buf.trim())))
    }

    fn close(&mut self) {
        self.file = None;
    }
}

// ---------------------------------------------------------------------------
// DS18B20
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DS18B20Options {
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default = "default_w1_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub allow_partial: bool,
    #[serde(default)]
    pub machine: Option<String>,
}

fn default_w1_dir() -> PathBuf {
    PathBuf::from(W1_DEVICES_DIR)
}

struct Probe {
    name: String,
    reader: SysfsReader,
    gauge: Gauge,
}

/// Reads every DS18B20 probe on the w1 bus.
///
/// Probes are discovered once, sorted by device id, and paired with the
/// configured `names` in order. Each probe publishes `temp_<name>`.
pub struct DS18B20TemperatureCollector {
    probes: Vec<Probe>,
}

impl DS18B20TemperatureCollector {
    pub fn new(options: &CollectorOptions, sink: &MetricSink) -> Result<Self, BuildError> {
        let options: DS18B20Options = options.parse()?;
        let names = options.names.ok_or(BuildError::MissingOption("names"))?;
        let devices = discover_ds18b20(&options.base_dir)?;

        let paired = if devices.len() == names.len() {
            devices.len()
        } else if options.allow_partial {
            let n = devices.len().min(names.len());
            warn!(
                "Found {} DS18B20 device(s) for {} name(s), using the first {}",
                devices.len(),
                names.len(),
                n
            );
            n
        } else {
            return Err(BuildError::NameMismatch {
                devices: devices.len(),
                names: names.len(),
            });
        };

        let names: Vec<String> = names.into_iter().take(paired).collect();
        check_probe_names(&names)?;

        // Open every device before touching the sink.
        let mut readers = Vec::with_capacity(paired);
        for device in devices.iter().take(paired) {
            readers.push(SysfsReader::open(device.join("temperature"))?);
        }

        let machine = machine_label(options.machine.as_deref());
        let mut probes = Vec::with_capacity(paired);
        for ((device, name), reader) in devices.iter().zip(names).zip(readers) {
            let gauge = sink
                .register_gauge(
                    &format!("temp_{name}"),
                    "Temperature reading on DS18B20",
                    &["machine"],
                )?
                .with_labels(&[&machine])?;
            info!("DS18B20 {} mapped to temp_{}", device.display(), name);
            probes.push(Probe {
                name,
                reader,
                gauge,
            });
        }

        Ok(Self { probes })
    }

    /// Configured names of the probes being read, in device order.
    pub fn probe_names(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Probe names must be distinct and yield valid metric names.
fn check_probe_names(names: &[String]) -> Result<(), BuildError> {
    let mut seen = HashSet::new();
    for name in names {
        if !PROBE_NAME_RE.is_match(name) {
            return Err(BuildError::InvalidOptions(format!(
                "'temp_{name}' is not a valid metric name"
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(BuildError::InvalidOptions(format!(
                "probe name '{name}' is configured more than once"
            )));
        }
    }
    Ok(())
}

/// `28-*` directories under `base_dir`, sorted.
pub fn discover_ds18b20(base_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let entries = fs::read_dir(base_dir).map_err(|source| BuildError::Io {
        path: base_dir.display().to_string(),
        source,
    })?;

    let mut devices: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(DS18B20_PREFIX))
        .map(|e| e.path())
        .collect();
    devices.sort();
    Ok(devices)
}

impl Collector for DS18B20TemperatureCollector {
    fn collect(&mut self) -> Result<(), CollectError> {
        let mut first_error = None;
        for probe in &mut self.probes {
            match probe.reader.read_celsius() {
                Ok(celsius) => probe.gauge.set(celsius),
                Err(e) => {
                    debug!("DS18B20 {} read failed: {}", probe.name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        for probe in &mut self.probes {
            probe.reader.close();
        }
    }
}

// ---------------------------------------------------------------------------
// BME280
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BME280Options {
    #[serde(default = "default_iio_dir")]
    pub iio_dir: PathBuf,
    #[serde(default)]
    pub device: Option<PathBuf>,
    #[serde(default)]
    pub machine: Option<String>,
}

fn default_iio_dir() -> PathBuf {
    PathBuf::from(IIO_DEVICES_DIR)
}

/// Reads the BME280 temperature channel into `temp_bme280`.
pub struct BME280TemperatureCollector {
    device: PathBuf,
    reader: SysfsReader,
    gauge: Gauge,
}

impl BME280TemperatureCollector {
    pub fn new(options: &CollectorOptions, sink: &MetricSink) -> Result<Self, BuildError> {
        let options: BME280Options = options.parse()?;
        let device = match options.device {
            Some(device) => device,
            None => find_bme280(&options.iio_dir)?.ok_or_else(|| {
                BuildError::Device(format!(
                    "no bme280/bmp280 IIO device under {}",
                    options.iio_dir.display()
                ))
            })?,
        };

        let reader = SysfsReader::open(device.join("in_temp_input"))?;
        let machine = machine_label(options.machine.as_deref());
        let gauge = sink
            .register_gauge("temp_bme280", "Temperature reading on BME280", &["machine"])?
            .with_labels(&[&machine])?;
        info!("BME280 found at {}", device.display());

        Ok(Self {
            device,
            reader,
            gauge,
        })
    }

    pub fn device(&self) -> &Path {
        &self.device
    }
}

/// First `iio:device*` under `iio_dir` whose driver name is a BME280 variant.
pub fn find_bme280(iio_dir: &Path) -> Result<Option<PathBuf>, BuildError> {
    let entries = fs::read_dir(iio_dir).map_err(|source| BuildError::Io {
        path: iio_dir.display().to_string(),
        source,
    })?;

    let mut devices: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("iio:device"))
        .map(|e| e.path())
        .collect();
    devices.sort();

    Ok(devices.into_iter().find(|dev| {
        fs::read_to_string(dev.join("name"))
            .map(|n| BME280_DRIVER_NAMES.contains(&n.trim()))
            .unwrap_or(false)
    }))
}

impl Collector for BME280TemperatureCollector {
    fn collect(&mut self) -> Result<(), CollectError> {
        let celsius = self.reader.read_celsius()?;
        self.gauge.set(celsius);
        Ok(())
    }

    fn close(&mut self) {
        self.reader.close();
    }
}
