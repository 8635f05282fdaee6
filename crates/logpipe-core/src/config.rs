//! Pipeline configuration and the builder that turns it into a [`Logger`].
//!
//! Configuration can be assembled fluently:
//!
//! ```ignore
//! let logger = LoggerBuilder::new()
//!     .minimum_level(Level::Information)
//!     .override_level("app.db", Level::Warning)
//!     .enrich(EnricherConfig::MachineName)
//!     .write_to_console(ConsoleConfig::default())
//!     .write_to_rolling_file(RollingFileConfig::new("logs/app-{Date}.log"))
//!     .build()?;
//! ```
//!
//! or deserialized from any serde format into a [`PipelineConfig`] first
//! (the CLI reads JSON) and passed to [`LoggerBuilder::from_config`]. The
//! core never reads configuration files itself.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::enrich::{
    Enricher, EnricherChain, EnvironmentVariableEnricher, FromLogContextEnricher,
    MachineNameEnricher, ProcessIdEnricher, PropertyEnricher, ThreadIdEnricher,
    ThreadNameEnricher,
};
use crate::error::{ConfigError, ConfigResult};
use crate::filter::LevelFilter;
use crate::level::Level;
use crate::pipeline::{Logger, PipelineParts, SinkRegistration};
use crate::queue::{duration_millis, OverflowPolicy};
use crate::sinks::{ConsoleConfig, ConsoleSink, RollingFileConfig, RollingFileSink, Sink};
use crate::value::Value;

/// Default capacity of the main queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default capacity of each sink's queue.
pub const DEFAULT_SINK_QUEUE_CAPACITY: usize = 10_000;

/// Default drain deadline at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Built-in sink kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkKind {
    Console(ConsoleConfig),
    RollingFile(RollingFileConfig),
}

impl SinkKind {
    fn default_name(&self) -> &'static str {
        match self {
            SinkKind::Console(_) => "console",
            SinkKind::RollingFile(_) => "rolling_file",
        }
    }
}

/// One configured sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Name used in diagnostics; defaults to the sink kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Extra per-sink threshold on top of the pipeline's levels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_level: Option<Level>,
    #[serde(flatten)]
    pub kind: SinkKind,
}

impl SinkConfig {
    pub fn console(options: ConsoleConfig) -> Self {
        Self {
            name: None,
            minimum_level: None,
            kind: SinkKind::Console(options),
        }
    }

    pub fn rolling_file(options: RollingFileConfig) -> Self {
        Self {
            name: None,
            minimum_level: None,
            kind: SinkKind::RollingFile(options),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn minimum_level(mut self, level: Level) -> Self {
        self.minimum_level = Some(level);
        self
    }
}

/// Built-in enrichers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnricherConfig {
    /// Fixed property on every event
    Property { name: String, value: Value },
    ThreadName,
    ThreadId,
    ProcessId,
    MachineName,
    /// Environment variable copied into `property` when set
    EnvironmentVariable { variable: String, property: String },
    /// Properties pushed with `LogContext` on the emitting thread
    FromLogContext,
}

impl EnricherConfig {
    pub fn build(&self) -> Arc<dyn Enricher> {
        match self {
            EnricherConfig::Property { name, value } => {
                Arc::new(PropertyEnricher::new(name.clone(), value.clone()))
            }
            EnricherConfig::ThreadName => Arc::new(ThreadNameEnricher),
            EnricherConfig::ThreadId => Arc::new(ThreadIdEnricher),
            EnricherConfig::ProcessId => Arc::new(ProcessIdEnricher::default()),
            EnricherConfig::MachineName => Arc::new(MachineNameEnricher::new()),
            EnricherConfig::EnvironmentVariable { variable, property } => {
                Arc::new(EnvironmentVariableEnricher::new(variable, property.clone()))
            }
            EnricherConfig::FromLogContext => Arc::new(FromLogContextEnricher),
        }
    }
}

/// Complete, serializable pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub minimum_level: Level,
    /// Source-context prefix → minimum level
    #[serde(default)]
    pub overrides: BTreeMap<String, Level>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub enrichers: Vec<EnricherConfig>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    #[serde(
        default = "default_shutdown_timeout",
        with = "duration_millis",
        rename = "shutdown_timeout_ms"
    )]
    pub shutdown_timeout: Duration,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_sink_queue_capacity() -> usize {
    DEFAULT_SINK_QUEUE_CAPACITY
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            minimum_level: Level::default(),
            overrides: BTreeMap::new(),
            sinks: Vec::new(),
            enrichers: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sink_queue_capacity: DEFAULT_SINK_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Check everything that can be checked without touching the filesystem.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("queue_capacity"));
        }
        if self.sink_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("sink_queue_capacity"));
        }
        for sink in &self.sinks {
            if let SinkKind::RollingFile(options) = &sink.kind {
                options.validate()?;
            }
        }
        Ok(())
    }
}

enum PendingSink {
    Configured(SinkConfig),
    Custom {
        name: String,
        minimum_level: Option<Level>,
        sink: Box<dyn Sink>,
    },
}

/// Builds a [`Logger`].
pub struct LoggerBuilder {
    config: PipelineConfig,
    sinks: Vec<PendingSink>,
    enrichers: Vec<Arc<dyn Enricher>>,
    clock: Arc<dyn Clock>,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            sinks: Vec::new(),
            enrichers: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Start from a deserialized configuration. Sinks and enrichers keep
    /// their configured order; more can be appended afterwards.
    pub fn from_config(mut config: PipelineConfig) -> Self {
        let sinks = std::mem::take(&mut config.sinks)
            .into_iter()
            .map(PendingSink::Configured)
            .collect();
        let enrichers = std::mem::take(&mut config.enrichers)
            .iter()
            .map(EnricherConfig::build)
            .collect();
        Self {
            config,
            sinks,
            enrichers,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn minimum_level(mut self, level: Level) -> Self {
        self.config.minimum_level = level;
        self
    }

    /// Minimum level for a source-context prefix.
    pub fn override_level(mut self, prefix: impl Into<String>, level: Level) -> Self {
        self.config.overrides.insert(prefix.into(), level);
        self
    }

    pub fn write_to(mut self, sink: SinkConfig) -> Self {
        self.sinks.push(PendingSink::Configured(sink));
        self
    }

    pub fn write_to_console(self, options: ConsoleConfig) -> Self {
        self.write_to(SinkConfig::console(options))
    }

    pub fn write_to_rolling_file(self, options: RollingFileConfig) -> Self {
        self.write_to(SinkConfig::rolling_file(options))
    }

    /// Register an externally supplied sink.
    pub fn write_to_sink(
        mut self,
        name: impl Into<String>,
        minimum_level: Option<Level>,
        sink: impl Sink + 'static,
    ) -> Self {
        self.sinks.push(PendingSink::Custom {
            name: name.into(),
            minimum_level,
            sink: Box::new(sink),
        });
        self
    }

    pub fn enrich(mut self, enricher: EnricherConfig) -> Self {
        self.enrichers.push(enricher.build());
        self
    }

    /// Register an externally supplied enricher.
    pub fn enrich_with(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn sink_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.sink_queue_capacity = capacity;
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow_policy = policy;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Time source for event timestamps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate, open sinks and start the background threads.
    pub fn build(self) -> ConfigResult<Logger> {
        self.config.validate()?;

        let mut filter = LevelFilter::new(self.config.minimum_level);
        for (prefix, level) in &self.config.overrides {
            filter = filter.with_override(prefix.clone(), *level);
        }

        let mut names = HashSet::new();
        let mut registrations = Vec::with_capacity(self.sinks.len());
        for pending in self.sinks {
            let (name, minimum_level, sink): (String, Option<Level>, Box<dyn Sink>) = match pending {
                PendingSink::Configured(config) => {
                    let name = match config.name {
                        Some(name) => name,
                        None => unique_name(config.kind.default_name(), &names),
                    };
                    let sink: Box<dyn Sink> = match config.kind {
                        SinkKind::Console(options) => Box::new(ConsoleSink::new(&options)),
                        SinkKind::RollingFile(options) => {
                            Box::new(RollingFileSink::new(options, self.clock.now())?)
                        }
                    };
                    (name, config.minimum_level, sink)
                }
                PendingSink::Custom {
                    name,
                    minimum_level,
                    sink,
                } => (name, minimum_level, sink),
            };
            if !names.insert(name.clone()) {
                return Err(ConfigError::DuplicateSink(name));
            }
            registrations.push(SinkRegistration {
                name,
                minimum_level,
                sink,
            });
        }

        Logger::start(PipelineParts {
            filter,
            sinks: registrations,
            enrichers: EnricherChain::new(self.enrichers),
            queue_capacity: self.config.queue_capacity,
            sink_queue_capacity: self.config.sink_queue_capacity,
            overflow_policy: self.config.overflow_policy,
            shutdown_timeout: self.config.shutdown_timeout,
            clock: self.clock,
        })
    }
}

fn unique_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}
