//! Configuration management for dssg-monitor.
//!
//! This module handles loading, merging, and validating configuration from
//! files and CLI arguments. It supports YAML, JSON, and TOML formats; the
//! format is picked from the file extension and defaults to YAML.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::cli::{Args, ConfigFormat};
use crate::collector::CollectorOptions;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9105;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_COLLECT_TIMEOUT_MS: u64 = 5000;
pub const MIN_TICK_INTERVAL_MS: u64 = 100;

/// Locations probed when no `--config` is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 4] = [
    "/etc/dssg-monitor/dssg-monitor.yaml",
    "/etc/dssg-monitor/dssg-monitor.yml",
    "./dssg-monitor.yaml",
    "./dssg-monitor.yml",
];

/// Fatal configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("{0}")]
    Invalid(String),
}

/// One configured collector: identifier plus its options blob.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSpec {
    pub id: String,
    pub options: CollectorOptions,
}

impl CollectorSpec {
    pub fn new(id: impl Into<String>, options: CollectorOptions) -> Self {
        Self {
            id: id.into(),
            options,
        }
    }
}

/// Ordered list of configured collectors.
///
/// Accepts either a mapping (`identifier: options`) or a plain list of
/// identifiers. Mapping order is preserved so collectors run in the order
/// they appear in the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectorList(pub Vec<CollectorSpec>);

impl<'de> Deserialize<'de> for CollectorList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = CollectorList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of collector identifiers to options, or a list of identifiers")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(CollectorList::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(CollectorList::default())
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut specs = Vec::new();
                while let Some(id) = seq.next_element::<String>()? {
                    specs.push(CollectorSpec::new(id, CollectorOptions::empty()));
                }
                Ok(CollectorList(specs))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut specs = Vec::new();
                while let Some((id, options)) = map.next_entry::<String, Value>()? {
                    specs.push(CollectorSpec::new(id, CollectorOptions::new(options)));
                }
                Ok(CollectorList(specs))
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

impl Serialize for CollectorList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for spec in &self.0 {
            let options = match spec.options.as_value() {
                Value::Null => Value::Object(Default::default()),
                other => other.clone(),
            };
            map.serialize_entry(&spec.id, &options)?;
        }
        map.end()
    }
}

/// `server_port` may be written as a number or a numeric string.
#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(i64),
    Text(String),
}

fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
    let raw = Option::<PortValue>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(PortValue::Number(n)) => u16::try_from(n)
            .map(Some)
            .map_err(|_| de::Error::custom(format!("server_port {} is out of range", n))),
        Some(PortValue::Text(s)) => s
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("server_port '{}' is not a valid port", s))),
    }
}

/// Exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    #[serde(alias = "server-ip")]
    pub server_ip: Option<String>,
    #[serde(default, alias = "server-port", deserialize_with = "deserialize_port")]
    pub server_port: Option<u16>,

    /// Names for DS18B20 devices when the collector entry carries none.
    #[serde(alias = "ds18b20-names")]
    pub ds18b20_names: Option<Vec<String>>,

    // Collection loop
    #[serde(alias = "tick-interval-ms")]
    pub tick_interval_ms: Option<u64>,
    #[serde(alias = "collect-timeout-ms")]
    pub collect_timeout_ms: Option<u64>,

    // Feature flags
    #[serde(alias = "enable-telemetry")]
    pub enable_telemetry: Option<bool>,
    #[serde(alias = "enable-health")]
    pub enable_health: Option<bool>,

    // Collectors, in execution order. Kept last so TOML output places the
    // table after all plain values.
    #[serde(default)]
    pub collectors: CollectorList,
}

impl Config {
    pub fn bind_addr(&self) -> &str {
        self.server_ip.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    pub fn port(&self) -> u16 {
        self.server_port.unwrap_or(DEFAULT_PORT)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind_addr().parse().map_err(|_| {
            ConfigError::Invalid(format!("server_ip '{}' is not an IP address", self.bind_addr()))
        })?;
        Ok(SocketAddr::new(ip, self.port()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS))
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms.unwrap_or(DEFAULT_COLLECT_TIMEOUT_MS))
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.enable_telemetry.unwrap_or(true)
    }

    pub fn health_enabled(&self) -> bool {
        self.enable_health.unwrap_or(true)
    }

    /// Collector specs in configuration order, with the top-level
    /// `ds18b20_names` applied to DS18B20 entries that carry no `names`.
    pub fn collector_specs(&self) -> Vec<CollectorSpec> {
        self.collectors
            .0
            .iter()
            .cloned()
            .map(|mut spec| {
                if let Some(names) = &self.ds18b20_names {
                    if is_ds18b20(&spec.id) {
                        spec.options.set_default("names", Value::from(names.clone()));
                    }
                }
                spec
            })
            .collect()
    }
}

fn is_ds18b20(id: &str) -> bool {
    id == "ds18b20_temperature" || id.ends_with(".DS18B20TemperatureCollector")
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    cfg.socket_addr()?;

    let interval = cfg.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS);
    if interval < MIN_TICK_INTERVAL_MS {
        return Err(ConfigError::Invalid(format!(
            "tick_interval_ms must be at least {}, got {}",
            MIN_TICK_INTERVAL_MS, interval
        )));
    }

    if cfg.collect_timeout_ms == Some(0) {
        return Err(ConfigError::Invalid(
            "collect_timeout_ms must be greater than 0".into(),
        ));
    }

    if cfg.collectors.0.is_empty() {
        warn!("No collectors configured - only the scrape endpoint will be served");
    }

    Ok(())
}

/// Resolves configuration from CLI args and the config file.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(bind_ip) = args.bind {
        config.server_ip = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.server_port = Some(cli_port);
    }

    Ok(config)
}

/// Finds the configuration file: the explicit path, or the first default
/// location that exists.
pub fn locate_config(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match path {
        Some(p) if p.exists() => Ok(p.to_path_buf()),
        Some(p) => Err(ConfigError::NotFound(p.display().to_string())),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .ok_or_else(|| ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", "))),
    }
}

/// Loads configuration with multiple format support.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = locate_config(path)?;
    let path_str = path.display().to_string();

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path_str.clone(),
        source,
    })?;

    let config = parse_config(&content, path.extension().and_then(|s| s.to_str()))
        .map_err(|detail| ConfigError::Parse {
            path: path_str.clone(),
            detail,
        })?;
    info!("Loaded configuration from: {}", path_str);
    Ok(config)
}

/// Parses configuration text; `extension` picks the format.
pub fn parse_config(content: &str, extension: Option<&str>) -> Result<Config, String> {
    match extension {
        Some("json") => serde_json::from_str(content).map_err(|e| e.to_string()),
        Some("toml") => toml::from_str(content).map_err(|e| e.to_string()),
        _ => {
            // An empty YAML document deserializes to unit; treat it as empty config.
            if content.trim().is_empty() {
                return Ok(Config::default());
            }
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        }
    }
}

/// Renders configuration in the requested format.
pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String, String> {
    match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
    }
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), ConfigError> {
    let output = render_config(config, format).map_err(ConfigError::Invalid)?;
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_form_preserves_order() {
        let yaml = r#"
server_ip: "127.0.0.1"
server_port: 9100
collectors:
  system_usage: {}
  ds18b20_temperature:
    names: ["tank", "room"]
  bme280_temperature:
"#;
        let cfg = parse_config(yaml, None).unwrap();
        let ids: Vec<&str> = cfg.collectors.0.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["system_usage", "ds18b20_temperature", "bme280_temperature"]
        );
        assert_eq!(
            cfg.collectors.0[1].options.get("names"),
            Some(&serde_json::json!(["tank", "room"]))
        );
        assert!(cfg.collectors.0[2].options.is_empty());
        assert_eq!(cfg.port(), 9100);
    }

    #[test]
    fn test_list_form() {
        let yaml = "server_ip: 0.0.0.0\nserver_port: 8000\ncollectors: [system_usage, bme280_temperature]\n";
        let cfg = parse_config(yaml, Some("yaml")).unwrap();
        assert_eq!(cfg.collectors.0.len(), 2);
        assert!(cfg.collectors.0.iter().all(|s| s.options.is_empty()));
    }

    #[test]
    fn test_port_as_string() {
        let cfg = parse_config("server_port: \"9200\"\n", None).unwrap();
        assert_eq!(cfg.port(), 9200);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        assert!(parse_config("server_port: \"ninety\"\n", None).is_err());
        assert!(parse_config("server_port: 70000\n", None).is_err());
    }

    #[test]
    fn test_json_and_toml() {
        let json = r#"{"server_ip":"127.0.0.1","server_port":"9300","collectors":{"system_usage":{}}}"#;
        let cfg = parse_config(json, Some("json")).unwrap();
        assert_eq!(cfg.port(), 9300);
        assert_eq!(cfg.collectors.0[0].id, "system_usage");

        let toml_src = "server_ip = \"127.0.0.1\"\nserver_port = 9400\n\n[collectors.system_usage]\n";
        let cfg = parse_config(toml_src, Some("toml")).unwrap();
        assert_eq!(cfg.port(), 9400);
        assert_eq!(cfg.collectors.0[0].id, "system_usage");
    }

    #[test]
    fn test_legacy_ds18b20_names_applied() {
        let yaml = r#"
collectors: [ds18b20_temperature, system_usage]
ds18b20_names: ["a", "b"]
"#;
        let cfg = parse_config(yaml, None).unwrap();
        let specs = cfg.collector_specs();
        assert_eq!(specs[0].options.get("names"), Some(&serde_json::json!(["a", "b"])));
        assert!(specs[1].options.is_empty());
    }

    #[test]
    fn test_validate() {
        let mut cfg = Config::default();
        assert!(validate_effective_config(&cfg).is_ok());

        cfg.server_ip = Some("not-an-ip".into());
        assert!(matches!(
            validate_effective_config(&cfg),
            Err(ConfigError::Invalid(_))
        ));

        cfg.server_ip = None;
        cfg.tick_interval_ms = Some(10);
        assert!(validate_effective_config(&cfg).is_err());

        cfg.tick_interval_ms = None;
        cfg.collect_timeout_ms = Some(0);
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_defaults() {
        let cfg = parse_config("", None).unwrap();
        assert_eq!(cfg.bind_addr(), DEFAULT_BIND_ADDR);
        assert_eq!(cfg.port(), DEFAULT_PORT);
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
        assert!(cfg.telemetry_enabled());
        assert!(cfg.health_enabled());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/dssg.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
