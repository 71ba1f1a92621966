//! Config command implementation.
//!
//! Generates a sample configuration file in the requested format.

use anyhow::Context;
use serde_json::json;
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::collector::CollectorOptions;
use crate::config::{
    render_config, CollectorList, CollectorSpec, Config, DEFAULT_BIND_ADDR,
    DEFAULT_COLLECT_TIMEOUT_MS, DEFAULT_PORT, DEFAULT_TICK_INTERVAL_MS,
};

const YAML_HEADER: &str = "# dssg-monitor configuration
#
# collectors: ordered mapping of collector identifier to its options.
# Identifiers are short aliases (see `dssg-monitor list-collectors`) or
# qualified <group>.<TypeName> names. Collectors run in the order listed.
";

/// A configuration with every built-in collector and default settings.
pub fn sample_config() -> Config {
    Config {
        server_ip: Some(DEFAULT_BIND_ADDR.to_string()),
        server_port: Some(DEFAULT_PORT),
        ds18b20_names: None,
        tick_interval_ms: Some(DEFAULT_TICK_INTERVAL_MS),
        collect_timeout_ms: Some(DEFAULT_COLLECT_TIMEOUT_MS),
        enable_telemetry: Some(true),
        enable_health: Some(true),
        collectors: CollectorList(vec![
            CollectorSpec::new("system_usage", CollectorOptions::empty()),
            CollectorSpec::new(
                "ds18b20_temperature",
                CollectorOptions::new(json!({ "names": ["inlet", "outlet"] })),
            ),
            CollectorSpec::new("bme280_temperature", CollectorOptions::empty()),
        ]),
    }
}

/// Writes the sample configuration to `output`, or stdout when omitted or `-`.
pub fn command_config(output: Option<PathBuf>, format: ConfigFormat) -> anyhow::Result<()> {
    let mut content = render_config(&sample_config(), format)
        .map_err(anyhow::Error::msg)
        .context("rendering sample configuration")?;
    if format == ConfigFormat::Yaml {
        content = format!("{YAML_HEADER}{content}");
    }

    match output {
        Some(path) if path.to_string_lossy() != "-" => {
            fs::write(&path, content)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Configuration written to: {}", path.display());
        }
        _ => print!("{content}"),
    }
    Ok(())
}
