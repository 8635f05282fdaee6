//! Process-wide default logger.
//!
//! A convenience for applications that want one pipeline reachable from
//! anywhere. The slot is filled once with [`set_global`], emptied by
//! [`shutdown`], and cannot be refilled afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;

use crate::event::ExceptionInfo;
use crate::level::Level;
use crate::pipeline::{Delivery, Logger, ShutdownReport};
use crate::value::Value;

static GLOBAL: OnceLock<RwLock<Option<Logger>>> = OnceLock::new();
static RETIRED: AtomicBool = AtomicBool::new(false);

fn slot() -> &'static RwLock<Option<Logger>> {
    GLOBAL.get_or_init(|| RwLock::new(None))
}

/// Install `logger` as the process-wide default.
///
/// Hands the logger back if one is already installed or the global logger
/// has been shut down.
pub fn set_global(logger: Logger) -> Result<(), Logger> {
    let mut slot = slot().write();
    if slot.is_some() || RETIRED.load(Ordering::SeqCst) {
        return Err(logger);
    }
    *slot = Some(logger);
    Ok(())
}

/// A handle to the installed logger.
pub fn logger() -> Option<Logger> {
    slot().read().clone()
}

pub fn is_installed() -> bool {
    slot().read().is_some()
}

/// Emit through the global logger. Returns [`Delivery::Closed`] when none is
/// installed.
pub fn emit(
    level: Level,
    template: impl Into<String>,
    values: Vec<(String, Value)>,
    exception: Option<ExceptionInfo>,
) -> Delivery {
    match slot().read().as_ref() {
        Some(logger) => logger.emit(level, template, values, exception),
        None => Delivery::Closed,
    }
}

/// Remove the global logger and shut it down. Later calls return `None`.
pub fn shutdown(timeout: Duration) -> Option<ShutdownReport> {
    let logger = {
        let mut slot = slot().write();
        RETIRED.store(true, Ordering::SeqCst);
        slot.take()
    };
    logger.map(|logger| logger.shutdown(timeout))
}
