//! logpipe core library
//!
//! Structured logging pipeline: events carrying a message template and named
//! values flow from producers through a level filter, an enricher chain and
//! a bounded asynchronous queue into independent sinks.
//!
//! ## Overview
//!
//! - **Non-blocking producers**: `emit` only checks a level and pushes into a
//!   bounded queue; sinks run on their own threads
//! - **Per-context levels**: minimum levels can be overridden per
//!   source-context prefix (`app.db`, `my_crate::net`)
//! - **Sink isolation**: a slow or failing sink fills only its own queue
//! - **Accounted loss**: every dropped or discarded event is counted in the
//!   diagnostics
//!
//! ## Quick Start
//!
//! ```ignore
//! use logpipe_core::{values, ConsoleConfig, Level, LoggerBuilder, RollingFileConfig};
//! use std::time::Duration;
//!
//! let logger = LoggerBuilder::new()
//!     .minimum_level(Level::Information)
//!     .override_level("app.db", Level::Warning)
//!     .write_to_console(ConsoleConfig::default())
//!     .write_to_rolling_file(RollingFileConfig::new("logs/app-{Date}.log"))
//!     .build()?;
//!
//! logger
//!     .for_context("app.http")
//!     .information("User {User} logged in from {Ip}", values! {"User" => "alice", "Ip" => "10.0.0.7"});
//!
//! let report = logger.shutdown(Duration::from_secs(5));
//! assert!(report.completed);
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod enrich;
pub mod error;
pub mod event;
pub mod filter;
pub mod format;
pub mod global;
pub mod layer;
pub mod level;
pub mod pipeline;
pub mod queue;
pub mod sinks;
pub mod template;
pub mod value;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EnricherConfig, LoggerBuilder, PipelineConfig, SinkConfig, SinkKind};
pub use context::{ContextGuard, LogContext};
pub use diagnostics::{
    DiagnosticEvent, Diagnostics, DiagnosticsSnapshot, DropReason, DroppedCounts, SinkSnapshot,
};
pub use enrich::{Enricher, EnricherChain};
pub use error::{ConfigError, ConfigResult, EnrichError, ParseError, SinkError};
pub use event::{ExceptionInfo, LogEvent, ThreadInfo};
pub use filter::LevelFilter;
pub use format::{parse_text_line, OutputFormat, ParsedLine};
pub use layer::PipelineLayer;
pub use level::Level;
pub use pipeline::{Delivery, Logger, ShutdownReport};
pub use queue::OverflowPolicy;
pub use sinks::{
    ConsoleConfig, ConsoleSink, MemorySink, RollingFileConfig, RollingFileSink, RollingInterval,
    Sink,
};
pub use template::MessageTemplate;
pub use value::Value;

/// Build the named values for an event.
///
/// ```ignore
/// logger.information("Order {Id} shipped", values! {"Id" => 42, "Carrier" => "ups"});
/// ```
#[macro_export]
macro_rules! values {
    () => {
        ::std::vec::Vec::<(::std::string::String, $crate::Value)>::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        ::std::vec![$((::std::string::String::from($name), $crate::Value::from($value))),+]
    };
}
