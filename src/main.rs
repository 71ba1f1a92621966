//! dssg-monitor
//!
//! Entry point: parses the CLI, handles subcommands, and otherwise runs the
//! exporter until SIGINT or SIGTERM.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::{signal, sync::watch};
use tracing::{error, info, warn, Level};

use dssg_monitor::cli::{Args, Commands, LogLevel};
use dssg_monitor::commands::{command_config, command_list_collectors, command_test};
use dssg_monitor::config::{resolve_config, show_config, validate_effective_config, Config};
use dssg_monitor::exporter::{Exporter, LoopSettings};
use dssg_monitor::registry::CollectorRegistry;
use dssg_monitor::server;
use dssg_monitor::sink::MetricSink;
use dssg_monitor::state::AppState;

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => return,
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Tracing subscriber was already set");
        return;
    }

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Loads and validates configuration. Exits with code 1 on failure.
fn load_validated_config(args: &Args) -> Config {
    let config = match resolve_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("Configuration invalid: {}", e);
        std::process::exit(1);
    }
    config
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args);

    if args.show_config || args.check_config {
        let config = load_validated_config(&args);
        if args.check_config {
            println!("Configuration is valid");
            return Ok(());
        }
        show_config(&config, args.config_format)?;
        return Ok(());
    }

    if let Some(command) = &args.command {
        return match command {
            Commands::ListCollectors => command_list_collectors(),
            Commands::Config { output, format } => command_config(output.clone(), *format),
            Commands::Test {
                iterations,
                verbose,
            } => {
                let config = load_validated_config(&args);
                command_test(*iterations, *verbose, &config).await
            }
        };
    }

    let config = load_validated_config(&args);
    if let Err(e) = run(config).await {
        error!("{:#}", e);
        eprintln!("dssg-monitor: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// Builds the collectors, binds the listener and runs until a stop signal.
async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting dssg-monitor {}", env!("CARGO_PKG_VERSION"));

    let registry = CollectorRegistry::with_builtins();
    let sink = Arc::new(MetricSink::new());
    let report = registry.build(&config.collector_specs(), &sink);
    if report.collectors.is_empty() {
        warn!("No collector could be built; serving an empty metric set");
    }

    let addr = config.socket_addr()?;
    let listener = server::bind(addr).await?;

    let exporter = Exporter::new(report, Arc::clone(&sink), LoopSettings::from_config(&config));
    let state = AppState::new(sink, exporter.health(), Arc::new(config)).shared();

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut server_task = tokio::spawn(server::serve(listener, state, stop_rx.clone()));
    let loop_task = tokio::spawn(exporter.run(stop_rx));

    // The server ending on its own is an error; stop the loop as well.
    let early_exit = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut server_task => Some(result),
    };
    let _ = stop_tx.send(true);

    let ticks = loop_task.await.context("collection loop task failed")?;
    let server_result = match early_exit {
        Some(result) => result,
        None => server_task.await,
    };
    server_result.context("HTTP server task failed")??;

    info!("dssg-monitor stopped gracefully after {} ticks", ticks);
    Ok(())
}
