//! Destinations for finalized events.
//!
//! Built-in sinks:
//! - [`ConsoleSink`]: standard output / standard error
//! - [`RollingFileSink`]: date- and size-rolled files
//! - [`MemorySink`]: shared in-memory buffer
//!
//! Anything implementing [`Sink`] can be registered alongside them. Each
//! registered sink is owned by its own worker thread, so implementations
//! take `&mut self` and need only be `Send`.

pub mod console;
pub mod memory;
pub mod rolling;

use crate::error::SinkError;
use crate::event::LogEvent;

pub use console::{ConsoleConfig, ConsoleSink};
pub use memory::MemorySink;
pub use rolling::{RollingFileConfig, RollingFileSink, RollingInterval, DATE_TOKEN};

/// A destination for enriched events.
pub trait Sink: Send {
    /// Write one event. Errors are counted by the pipeline, never propagated
    /// to the code that logged the event.
    fn emit(&mut self, event: &LogEvent) -> Result<(), SinkError>;

    /// Push buffered output to its destination. Called at flush and shutdown.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
