//! Internal counters and the diagnostic channel.
//!
//! Failures in the logging path never propagate to callers. They end up
//! here instead: as atomic counters that can be snapshotted at any time, and
//! as [`DiagnosticEvent`]s broadcast to whoever subscribed.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Diagnostics                                                  │
//! │  ├── pipeline counters: admitted, filtered, dropped[reason],  │
//! │  │   lost_on_shutdown, enricher_failures                      │
//! │  ├── sinks: Vec<SinkCounters> (indexed like registrations)    │
//! │  └── events_tx: broadcast::Sender<DiagnosticEvent>            │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

/// Buffer size for the diagnostic broadcast channel.
const DIAGNOSTIC_CHANNEL_SIZE: usize = 256;

/// Why an event was dropped before reaching the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Queue full under `DropNew`
    QueueFull,
    /// Oldest queued event evicted under `DropOldest`
    Evicted,
    /// `Block` policy timed out
    Timeout,
    /// Emitted after shutdown began
    AfterShutdown,
}

/// Notifications published on the diagnostic channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// A sink failed to write an event
    SinkWriteFailed { sink: String, error: String },
    /// An enricher failed; the event continued without its properties
    EnricherFailed { enricher: String, error: String },
    /// Events discarded because shutdown hit its deadline
    EventsLost { count: u64 },
}

/// Counters for a single sink.
#[derive(Debug)]
pub(crate) struct SinkCounters {
    name: String,
    delivered: AtomicU64,
    write_failures: AtomicU64,
    dropped: AtomicU64,
    lost: AtomicU64,
}

/// Shared counters for one pipeline.
#[derive(Debug)]
pub struct Diagnostics {
    admitted: AtomicU64,
    filtered: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_evicted: AtomicU64,
    dropped_timeout: AtomicU64,
    dropped_after_shutdown: AtomicU64,
    lost_on_shutdown: AtomicU64,
    enricher_failures: AtomicU64,
    sinks: Vec<SinkCounters>,
    events_tx: broadcast::Sender<DiagnosticEvent>,
}

impl Diagnostics {
    /// Create counters for the named sinks (in registration order).
    pub fn new(sink_names: impl IntoIterator<Item = String>) -> Self {
        let (events_tx, _) = broadcast::channel(DIAGNOSTIC_CHANNEL_SIZE);
        Self {
            admitted: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            dropped_queue_full: AtomicU64::new(0),
            dropped_evicted: AtomicU64::new(0),
            dropped_timeout: AtomicU64::new(0),
            dropped_after_shutdown: AtomicU64::new(0),
            lost_on_shutdown: AtomicU64::new(0),
            enricher_failures: AtomicU64::new(0),
            sinks: sink_names
                .into_iter()
                .map(|name| SinkCounters {
                    name,
                    delivered: AtomicU64::new(0),
                    write_failures: AtomicU64::new(0),
                    dropped: AtomicU64::new(0),
                    lost: AtomicU64::new(0),
                })
                .collect(),
            events_tx,
        }
    }

    /// Subscribe to diagnostic events.
    ///
    /// If the receiver falls behind, older events are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.events_tx.subscribe()
    }

    fn publish(&self, event: DiagnosticEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    pub(crate) fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::QueueFull => &self.dropped_queue_full,
            DropReason::Evicted => &self.dropped_evicted,
            DropReason::Timeout => &self.dropped_timeout,
            DropReason::AfterShutdown => &self.dropped_after_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enricher_failure(&self, enricher: &str, error: String) {
        self.enricher_failures.fetch_add(1, Ordering::Relaxed);
        self.publish(DiagnosticEvent::EnricherFailed {
            enricher: enricher.to_string(),
            error,
        });
    }

    pub(crate) fn record_delivered(&self, sink: usize) {
        if let Some(counters) = self.sinks.get(sink) {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_write_failure(&self, sink: usize, error: String) {
        if let Some(counters) = self.sinks.get(sink) {
            counters.write_failures.fetch_add(1, Ordering::Relaxed);
            self.publish(DiagnosticEvent::SinkWriteFailed {
                sink: counters.name.clone(),
                error,
            });
        }
    }

    pub(crate) fn record_sink_dropped(&self, sink: usize) {
        if let Some(counters) = self.sinks.get(sink) {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events still queued in the main queue when shutdown gave up.
    pub(crate) fn record_lost(&self, count: u64) {
        if count > 0 {
            self.lost_on_shutdown.fetch_add(count, Ordering::Relaxed);
            self.publish(DiagnosticEvent::EventsLost { count });
        }
    }

    /// Deliveries still queued for one sink when shutdown gave up.
    pub(crate) fn record_sink_lost(&self, sink: usize, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(counters) = self.sinks.get(sink) {
            counters.lost.fetch_add(count, Ordering::Relaxed);
        }
        self.publish(DiagnosticEvent::EventsLost { count });
    }

    /// Read-only copy of every counter.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DiagnosticsSnapshot {
            admitted: load(&self.admitted),
            filtered: load(&self.filtered),
            dropped: DroppedCounts {
                queue_full: load(&self.dropped_queue_full),
                evicted: load(&self.dropped_evicted),
                timeout: load(&self.dropped_timeout),
                after_shutdown: load(&self.dropped_after_shutdown),
            },
            lost_on_shutdown: load(&self.lost_on_shutdown),
            enricher_failures: load(&self.enricher_failures),
            sinks: self
                .sinks
                .iter()
                .map(|s| SinkSnapshot {
                    name: s.name.clone(),
                    delivered: load(&s.delivered),
                    write_failures: load(&s.write_failures),
                    dropped: load(&s.dropped),
                    lost: load(&s.lost),
                })
                .collect(),
        }
    }
}

/// Dropped-event counts by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DroppedCounts {
    pub queue_full: u64,
    pub evicted: u64,
    pub timeout: u64,
    pub after_shutdown: u64,
}

impl DroppedCounts {
    pub fn total(&self) -> u64 {
        self.queue_full + self.evicted + self.timeout + self.after_shutdown
    }
}

/// Per-sink counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkSnapshot {
    pub name: String,
    /// Events the sink wrote successfully
    pub delivered: u64,
    pub write_failures: u64,
    /// Events skipped because the sink's own queue was full
    pub dropped: u64,
    /// Events discarded from the sink's queue at shutdown
    pub lost: u64,
}

/// Point-in-time copy of all pipeline counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Events that passed the level pre-check and entered the main queue
    pub admitted: u64,
    /// Events rejected by the level pre-check
    pub filtered: u64,
    pub dropped: DroppedCounts,
    pub lost_on_shutdown: u64,
    pub enricher_failures: u64,
    pub sinks: Vec<SinkSnapshot>,
}

impl DiagnosticsSnapshot {
    pub fn sink(&self, name: &str) -> Option<&SinkSnapshot> {
        self.sinks.iter().find(|s| s.name == name)
    }
}
