//! logpipe CLI
//!
//! Thin wrapper around logpipe-core for exercising a pipeline from the
//! command line.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a configuration file
//! logpipe check pipeline.json
//!
//! # Emit a single event
//! logpipe emit -c pipeline.json -l warning --context app.db "Pool {Size} exhausted" Size=20
//!
//! # Hammer the pipeline from several threads and print the counters
//! logpipe stress -c pipeline.json --producers 8 --events 1250
//!
//! # Turn a text log file into JSON lines
//! logpipe parse logs/app-20260121.log
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logpipe_core::{
    parse_text_line, Delivery, ExceptionInfo, Level, LoggerBuilder, PipelineConfig, SinkKind,
    Value,
};
use tracing::{debug, info};

/// logpipe - structured logging pipeline
#[derive(Parser)]
#[command(name = "logpipe")]
#[command(version = "0.1.0")]
#[command(about = "logpipe - structured logging pipeline")]
#[command(
    long_about = "Drive and inspect a structured logging pipeline: level overrides, enrichment, bounded queues and rolling files."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline configuration
    Check {
        /// Path to a JSON pipeline configuration
        config: PathBuf,
    },

    /// Emit one event through a configured pipeline
    Emit {
        /// Path to a JSON pipeline configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Event level
        #[arg(short, long, default_value = "information")]
        level: Level,

        /// Source context, e.g. app.db
        #[arg(long)]
        context: Option<String>,

        /// Attach an exception with this message
        #[arg(long)]
        exception: Option<String>,

        /// Message template, e.g. "User {User} logged in"
        template: String,

        /// Named values as KEY=VALUE (VALUE parsed as JSON when possible)
        values: Vec<String>,
    },

    /// Emit many events from several threads and print the diagnostics
    Stress {
        /// Path to a JSON pipeline configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Producer threads
        #[arg(short, long, default_value = "8")]
        producers: usize,

        /// Events per producer
        #[arg(short, long, default_value = "1250")]
        events: usize,
    },

    /// Parse a text-format log file into JSON lines
    Parse {
        /// Log file to read
        file: PathBuf,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Load a pipeline configuration from a JSON file
fn load_config(path: &Path) -> Result<PipelineConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: PipelineConfig = serde_json::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    debug!(path = %path.display(), sinks = config.sinks.len(), "Loaded config");
    Ok(config)
}

/// Parse a KEY=VALUE argument
fn parse_value(arg: &str) -> Result<(String, Value)> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected KEY=VALUE, got '{}'", arg))?;
    if key.is_empty() {
        anyhow::bail!("Empty key in '{}'", arg);
    }
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw));
    Ok((key.to_string(), value))
}

fn describe_delivery(delivery: Delivery) -> &'static str {
    match delivery {
        Delivery::Enqueued => "enqueued",
        Delivery::Filtered => "filtered (below minimum level)",
        Delivery::Dropped => "dropped (queue full)",
        Delivery::TimedOut => "dropped (queue full, timed out)",
        Delivery::Closed => "rejected (pipeline closed)",
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Check { config } => {
            let cfg = load_config(&config)?;
            cfg.validate()
                .with_context(|| format!("Invalid config {}", config.display()))?;

            println!("Configuration OK: {}", config.display());
            println!("  Minimum level: {}", cfg.minimum_level);
            for (prefix, level) in &cfg.overrides {
                println!("  Override: {} -> {}", prefix, level);
            }
            println!("  Sinks ({}):", cfg.sinks.len());
            for sink in &cfg.sinks {
                let (kind, detail) = match &sink.kind {
                    SinkKind::Console(_) => ("console", String::new()),
                    SinkKind::RollingFile(options) => ("rolling_file", format!(" {}", options.path_template)),
                };
                let minimum = sink
                    .minimum_level
                    .map(|l| format!(" (minimum {})", l))
                    .unwrap_or_default();
                println!(
                    "    - {}: {}{}{}",
                    sink.name.as_deref().unwrap_or(kind),
                    kind,
                    detail,
                    minimum
                );
            }
            println!("  Enrichers: {}", cfg.enrichers.len());
            println!("  Queue capacity: {}", cfg.queue_capacity);
        }

        Commands::Emit {
            config,
            level,
            context,
            exception,
            template,
            values,
        } => {
            let cfg = load_config(&config)?;
            let timeout = cfg.shutdown_timeout;
            let values = values
                .iter()
                .map(|arg| parse_value(arg))
                .collect::<Result<Vec<_>>>()?;

            let logger = LoggerBuilder::from_config(cfg)
                .build()
                .context("Failed to build pipeline")?;
            let logger = match context {
                Some(context) => logger.for_context(context),
                None => logger,
            };

            let exception = exception.map(|message| ExceptionInfo::new("Error", message));
            let delivery = logger.emit(level, template, values, exception);
            let report = logger.shutdown(timeout);

            println!("Event {}", describe_delivery(delivery));
            if !report.completed {
                anyhow::bail!("Shutdown timed out; {} events lost", report.lost);
            }
        }

        Commands::Stress {
            config,
            producers,
            events,
        } => {
            let cfg = load_config(&config)?;
            let timeout = cfg.shutdown_timeout;
            let logger = LoggerBuilder::from_config(cfg)
                .build()
                .context("Failed to build pipeline")?;

            info!(producers, events, "Starting stress run");
            let start = Instant::now();
            let barrier = Arc::new(Barrier::new(producers.max(1)));
            let handles: Vec<_> = (0..producers)
                .map(|p| {
                    let logger = logger.for_context(format!("stress.producer{}", p));
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        for i in 0..events {
                            logger.information(
                                "Stress event {Producer}/{Index}",
                                vec![
                                    ("Producer".to_string(), Value::from(p)),
                                    ("Index".to_string(), Value::from(i)),
                                ],
                            );
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("Producer thread panicked"))?;
            }
            let emitted = start.elapsed();
            let report = logger.shutdown(timeout);
            info!(
                emit_ms = emitted.as_millis() as u64,
                total_ms = start.elapsed().as_millis() as u64,
                completed = report.completed,
                "Stress run finished"
            );

            println!("{}", serde_json::to_string_pretty(&logger.diagnostics())?);
        }

        Commands::Parse { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let mut failures = 0;
            for (number, line) in text.lines().enumerate() {
                if line.is_empty() {
                    continue;
                }
                match parse_text_line(line) {
                    Ok(parsed) => println!("{}", serde_json::to_string(&parsed)?),
                    Err(e) => {
                        eprintln!("line {}: {}", number + 1, e);
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{} lines failed to parse", failures);
            }
        }
    }

    Ok(())
}
