//! In-memory sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::Sink;
use crate::error::SinkError;
use crate::event::LogEvent;

/// Collects events into a buffer shared by all clones.
///
/// Register one clone with the pipeline and keep another to inspect what
/// arrived. A per-write delay and failure injection make it useful for
/// exercising slow and broken destinations.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LogEvent>>>,
    delay: Option<Duration>,
    failing: Arc<AtomicBool>,
    flushes: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` before every write.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Copy of every event written so far, in arrival order.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Rendered messages of every event written so far.
    pub fn messages(&self) -> Vec<String> {
        self.events.lock().iter().map(LogEvent::render_message).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times the sink was flushed.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl Sink for MemorySink {
    fn emit(&mut self, event: &LogEvent) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Other("injected write failure".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use chrono::Utc;

    #[test]
    fn test_clones_share_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        let ev = LogEvent::new(Utc::now().fixed_offset(), Level::Information, "hi", vec![]);

        writer.emit(&ev).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.messages(), vec!["hi".to_string()]);

        sink.set_failing(true);
        assert!(writer.emit(&ev).is_err());
        assert_eq!(sink.len(), 1);

        writer.flush().unwrap();
        assert_eq!(sink.flush_count(), 1);
    }
}
