//! Console sink.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use super::Sink;
use crate::error::SinkError;
use crate::event::LogEvent;
use crate::format::OutputFormat;
use crate::level::Level;

/// Options for [`ConsoleSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Events at or above this level go to standard error
    #[serde(default = "default_stderr_from")]
    pub stderr_from: Level,
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_stderr_from() -> Level {
    Level::Warning
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            stderr_from: default_stderr_from(),
            format: OutputFormat::default(),
        }
    }
}

/// Writes each event as one line to standard output, or to standard error
/// for events at or above `stderr_from`.
pub struct ConsoleSink {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    stderr_from: Level,
    format: OutputFormat,
}

impl ConsoleSink {
    /// Console sink on the process streams.
    pub fn new(config: &ConsoleConfig) -> Self {
        Self::with_writers(config, Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Console sink on arbitrary writers (used by tests).
    pub fn with_writers(
        config: &ConsoleConfig,
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            out,
            err,
            stderr_from: config.stderr_from,
            format: config.format,
        }
    }
}

impl Sink for ConsoleSink {
    fn emit(&mut self, event: &LogEvent) -> Result<(), SinkError> {
        let mut line = self.format.render(event);
        line.push('\n');

        let writer = if event.level() >= self.stderr_from {
            &mut self.err
        } else {
            &mut self.out
        };
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        self.err.flush()?;
        Ok(())
    }
}
