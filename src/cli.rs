//! CLI arguments and subcommands for dssg-monitor.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "dssg-monitor",
    about = "Pluggable Prometheus exporter for host usage and temperature sensors",
    long_about = "Pluggable Prometheus exporter for host usage and temperature sensors.\n\n\
                  Loads the collectors named in the configuration file, runs them on a fixed \
                  interval and serves their gauges on /metrics. A failing collector is logged \
                  and retried on the next tick without affecting the others.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port (overrides server_port)
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP (overrides server_ip)
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List every collector identifier that can be used in the config
    ListCollectors,

    /// Build the configured collectors, run a few ticks and print the metrics
    Test {
        /// Number of collection ticks to run
        #[arg(short = 'n', long, default_value_t = 2)]
        iterations: u32,

        /// Print per-collector outcomes for every tick
        #[arg(short = 'v', long)]
        verbose: bool,
    },

    /// Generate a sample configuration file
    Config {
        /// Output file path (stdout if omitted)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },
}
