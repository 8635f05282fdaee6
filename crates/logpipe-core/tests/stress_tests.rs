//! Stress tests for back-pressure, sink isolation and shutdown
//!
//! These tests push many events from several threads and check that every
//! event is either delivered or accounted for in the diagnostics.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use logpipe_core::{
    values, Delivery, EnrichError, Enricher, Level, LogEvent, LoggerBuilder, MemorySink,
    OverflowPolicy, Value,
};

const PRODUCERS: usize = 8;
const PER_PRODUCER: usize = 1250;

// ============================================================================
// Back-pressure
// ============================================================================

/// 8 producers × 1250 events into a 100-slot queue: nothing is silently lost.
#[test]
fn test_drop_new_accounts_for_every_event() {
    let sink = MemorySink::new();
    let logger = LoggerBuilder::new()
        .queue_capacity(100)
        .overflow_policy(OverflowPolicy::DropNew)
        .write_to_sink("mem", None, sink.clone())
        .build()
        .unwrap();

    let start = Instant::now();
    let barrier = Arc::new(Barrier::new(PRODUCERS));
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let logger = logger.for_context(format!("producer.{}", p));
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut dropped = 0;
                for i in 0..PER_PRODUCER {
                    if logger.information("Event {I}", values! {"I" => i as u64}) == Delivery::Dropped {
                        dropped += 1;
                    }
                }
                dropped
            })
        })
        .collect();
    let reported_drops: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let report = logger.shutdown(Duration::from_secs(30));
    assert!(report.completed);

    let diag = logger.diagnostics();
    let total = (PRODUCERS * PER_PRODUCER) as u64;
    assert_eq!(sink.len() as u64 + diag.dropped.total(), total);
    assert_eq!(diag.dropped.queue_full, reported_drops);
    assert_eq!(diag.admitted, sink.len() as u64);

    println!(
        "{} events, {} delivered, {} dropped in {:?}",
        total,
        sink.len(),
        reported_drops,
        start.elapsed()
    );
}

/// Under DropOldest every emit succeeds and the newest events survive.
#[test]
fn test_drop_oldest_keeps_newest() {
    let sink = MemorySink::new().with_delay(Duration::from_millis(1));
    let logger = LoggerBuilder::new()
        .queue_capacity(10)
        .overflow_policy(OverflowPolicy::DropOldest)
        .write_to_sink("mem", None, sink.clone())
        .build()
        .unwrap();

    for i in 0..500u64 {
        assert_eq!(
            logger.information("Event {I}", values! {"I" => i}),
            Delivery::Enqueued
        );
    }
    logger.shutdown(Duration::from_secs(30));

    let diag = logger.diagnostics();
    assert_eq!(diag.admitted, 500);
    assert_eq!(sink.len() as u64 + diag.dropped.evicted, 500);
    assert_eq!(sink.messages().last().map(String::as_str), Some("Event 499"));
}

/// Block waits for room instead of dropping while the consumer keeps up.
#[test]
fn test_block_policy_delivers_everything() {
    let sink = MemorySink::new();
    let logger = LoggerBuilder::new()
        .queue_capacity(4)
        .overflow_policy(OverflowPolicy::Block {
            timeout: Duration::from_secs(5),
        })
        .write_to_sink("mem", None, sink.clone())
        .build()
        .unwrap();

    for i in 0..1000u64 {
        assert_eq!(
            logger.information("Event {I}", values! {"I" => i}),
            Delivery::Enqueued
        );
    }
    logger.shutdown(Duration::from_secs(30));
    assert_eq!(sink.len(), 1000);
    assert_eq!(logger.diagnostics().dropped.total(), 0);
}

/// Holds the dispatcher for a while on every event.
struct SlowEnricher(Duration);

impl Enricher for SlowEnricher {
    fn name(&self) -> &str {
        "slow"
    }

    fn enrich(&self, _event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
        thread::sleep(self.0);
        Ok(Vec::new())
    }
}

/// Block gives up after its timeout when nothing drains.
#[test]
fn test_block_policy_times_out() {
    let sink = MemorySink::new();
    let logger = LoggerBuilder::new()
        .queue_capacity(1)
        .overflow_policy(OverflowPolicy::Block {
            timeout: Duration::from_millis(20),
        })
        .enrich_with(Arc::new(SlowEnricher(Duration::from_millis(100))))
        .write_to_sink("mem", None, sink.clone())
        .build()
        .unwrap();

    let outcomes: Vec<Delivery> = (0..10)
        .map(|_| logger.information("x", vec![]))
        .collect();
    assert!(outcomes.contains(&Delivery::TimedOut));
    assert!(logger.diagnostics().dropped.timeout > 0);
    logger.shutdown(Duration::from_millis(10));
}

// ============================================================================
// Sink isolation
// ============================================================================

/// A sink that needs 10ms per event does not hold back a fast sink.
#[test]
fn test_slow_sink_does_not_stall_fast_sink() {
    let fast = MemorySink::new();
    let slow = MemorySink::new().with_delay(Duration::from_millis(10));
    let logger = LoggerBuilder::new()
        .write_to_sink("fast", None, fast.clone())
        .write_to_sink("slow", None, slow.clone())
        .build()
        .unwrap();

    let start = Instant::now();
    for i in 0..100u64 {
        logger.information("Event {I}", values! {"I" => i});
    }
    let emit_time = start.elapsed();

    // Fast sink catches up long before the slow one could (100 × 10ms)
    let deadline = Instant::now() + Duration::from_millis(500);
    while fast.len() < 100 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(fast.len(), 100);
    assert!(slow.len() < 100);
    assert!(emit_time < Duration::from_millis(500));

    let report = logger.shutdown(Duration::from_secs(30));
    assert!(report.completed);
    assert_eq!(slow.len(), 100);
}

/// A failing sink is counted and does not affect its neighbour.
#[test]
fn test_failing_sink_is_isolated() {
    let good = MemorySink::new();
    let bad = MemorySink::new();
    bad.set_failing(true);
    let logger = LoggerBuilder::new()
        .write_to_sink("good", None, good.clone())
        .write_to_sink("bad", None, bad.clone())
        .build()
        .unwrap();

    for i in 0..50u64 {
        logger.warning("Event {I}", values! {"I" => i});
    }
    assert!(logger.flush(Duration::from_secs(10)));

    bad.set_failing(false);
    logger.warning("after recovery", vec![]);
    logger.shutdown(Duration::from_secs(10));

    let diag = logger.diagnostics();
    assert_eq!(good.len(), 51);
    assert_eq!(bad.len(), 1);
    assert_eq!(diag.sink("bad").unwrap().write_failures, 50);
    assert_eq!(diag.sink("good").unwrap().write_failures, 0);
    assert_eq!(diag.sink("good").unwrap().delivered, 51);
}

/// A full sink queue drops for that sink only.
#[test]
fn test_sink_queue_overflow_is_per_sink() {
    let fast = MemorySink::new();
    let stuck = MemorySink::new().with_delay(Duration::from_millis(50));
    let logger = LoggerBuilder::new()
        .sink_queue_capacity(5)
        .write_to_sink("fast", None, fast.clone())
        .write_to_sink("stuck", Some(Level::Verbose), stuck.clone())
        .build()
        .unwrap();

    for i in 0..100u64 {
        logger.information("Event {I}", values! {"I" => i});
        // Keep the fast sink's queue from overflowing
        if i % 4 == 3 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    logger.shutdown(Duration::from_secs(30));

    let diag = logger.diagnostics();
    let stuck_counts = diag.sink("stuck").unwrap();
    assert!(stuck_counts.dropped > 0);
    assert_eq!(stuck.len() as u64 + stuck_counts.dropped, 100);
    assert_eq!(
        fast.len() as u64 + diag.sink("fast").unwrap().dropped,
        100
    );
}

// ============================================================================
// Shutdown
// ============================================================================

/// Draining a backlog finishes within the deadline.
#[test]
fn test_shutdown_drains_backlog() {
    let sink = MemorySink::new().with_delay(Duration::from_micros(200));
    let logger = LoggerBuilder::new()
        .write_to_sink("mem", None, sink.clone())
        .build()
        .unwrap();

    for i in 0..1000u64 {
        logger.information("Event {I}", values! {"I" => i});
    }
    let report = logger.shutdown(Duration::from_secs(30));

    assert!(report.completed);
    assert_eq!(report.lost, 0);
    assert_eq!(sink.len(), 1000);
}

/// A sink too slow for the deadline: shutdown returns on time and the
/// remainder is counted as lost.
#[test]
fn test_shutdown_timeout_counts_lost_events() {
    let sink = MemorySink::new().with_delay(Duration::from_millis(20));
    let logger = LoggerBuilder::new()
        .write_to_sink("slow", None, sink.clone())
        .build()
        .unwrap();

    for i in 0..200u64 {
        logger.information("Event {I}", values! {"I" => i});
    }
    let report = logger.shutdown(Duration::from_millis(200));

    assert!(!report.completed);
    assert!(report.lost > 0);
    assert!(report.elapsed < Duration::from_secs(2));

    // Let the detached worker notice the abort
    thread::sleep(Duration::from_millis(100));
    let diag = logger.diagnostics();
    let slow = diag.sink("slow").unwrap();
    assert_eq!(
        slow.delivered + slow.lost + diag.lost_on_shutdown,
        200
    );
}
