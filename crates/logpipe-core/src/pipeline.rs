//! The dispatch pipeline.
//!
//! ```text
//!  producers ──emit──▶ main queue ──▶ dispatcher ──┬──▶ sink queue ──▶ worker ──▶ Sink
//!   (floor check,      (bounded,      (context      ├──▶ sink queue ──▶ worker ──▶ Sink
//!    overflow policy)   FIFO)          levels,      └──▶ ...
//!                                      enrichment)
//! ```
//!
//! Producers never touch a sink. A single dispatcher thread resolves the
//! per-context minimum, runs the enricher chain once per event and fans the
//! shared event out to one bounded queue per sink. Each sink is driven by its
//! own worker thread, so a slow or failing sink only ever fills its own queue.

use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::diagnostics::{DiagnosticEvent, Diagnostics, DiagnosticsSnapshot, DropReason};
use crate::enrich::{panic_message, EnricherChain};
use crate::error::{ConfigError, ConfigResult, SinkError};
use crate::event::{ExceptionInfo, LogEvent};
use crate::filter::{admit, LevelFilter};
use crate::level::Level;
use crate::queue::{BoundedQueue, Envelope, OverflowPolicy, PushOutcome};
use crate::sinks::Sink;
use crate::value::Value;

/// What happened to an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted into the main queue
    Enqueued,
    /// Below every configured minimum
    Filtered,
    /// Rejected because the queue was full
    Dropped,
    /// Waited for room under `Block` and gave up
    TimedOut,
    /// The pipeline is shut down
    Closed,
}

impl Delivery {
    pub fn is_enqueued(self) -> bool {
        self == Delivery::Enqueued
    }
}

/// Outcome of [`Logger::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every queued event was handed to its sinks before the deadline
    pub completed: bool,
    /// Events discarded because the deadline passed
    pub lost: u64,
    pub elapsed: Duration,
}

/// A sink ready to be started, as produced by the builder.
pub(crate) struct SinkRegistration {
    pub(crate) name: String,
    pub(crate) minimum_level: Option<Level>,
    pub(crate) sink: Box<dyn Sink>,
}

pub(crate) struct PipelineParts {
    pub(crate) filter: LevelFilter,
    pub(crate) sinks: Vec<SinkRegistration>,
    pub(crate) enrichers: EnricherChain,
    pub(crate) queue_capacity: usize,
    pub(crate) sink_queue_capacity: usize,
    pub(crate) overflow_policy: OverflowPolicy,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) clock: Arc<dyn Clock>,
}

struct SinkSlot {
    name: String,
    minimum_level: Option<Level>,
    queue: BoundedQueue<Arc<LogEvent>>,
}

/// State shared with the background threads.
struct Core {
    filter: LevelFilter,
    queue: BoundedQueue<LogEvent>,
    sinks: Vec<SinkSlot>,
    diagnostics: Diagnostics,
    /// Set when shutdown gives up waiting; threads stop writing
    abort: AtomicBool,
}

struct Lifecycle {
    done_rx: Option<mpsc::Receiver<()>>,
    threads: usize,
    report: Option<ShutdownReport>,
}

/// State owned by the logger handles. Dropping the last handle shuts the
/// pipeline down.
struct Shared {
    core: Arc<Core>,
    floor: Level,
    overflow_policy: OverflowPolicy,
    shutdown_timeout: Duration,
    clock: Arc<dyn Clock>,
    lifecycle: Mutex<Lifecycle>,
}

/// Sends on drop, so a thread reports its exit even when it unwinds.
struct DoneSignal(mpsc::Sender<()>);

impl Drop for DoneSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Handle to a running pipeline.
///
/// Cheap to clone. Clones share the pipeline; [`Logger::for_context`]
/// returns a clone that stamps a source context on everything it emits.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
    context: Option<Arc<str>>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("context", &self.context)
            .field("sinks", &self.sink_names())
            .finish()
    }
}

impl Logger {
    /// Start the dispatcher and one worker per sink.
    pub(crate) fn start(parts: PipelineParts) -> ConfigResult<Logger> {
        let PipelineParts {
            filter,
            sinks,
            enrichers,
            queue_capacity,
            sink_queue_capacity,
            overflow_policy,
            shutdown_timeout,
            clock,
        } = parts;

        let mut slots = Vec::with_capacity(sinks.len());
        let mut boxed = Vec::with_capacity(sinks.len());
        for registration in sinks {
            slots.push(SinkSlot {
                name: registration.name,
                minimum_level: registration.minimum_level,
                queue: BoundedQueue::new(sink_queue_capacity),
            });
            boxed.push(registration.sink);
        }

        let floor = filter.floor();
        let core = Arc::new(Core {
            diagnostics: Diagnostics::new(slots.iter().map(|s| s.name.clone())),
            filter,
            queue: BoundedQueue::new(queue_capacity),
            sinks: slots,
            abort: AtomicBool::new(false),
        });

        let (done_tx, done_rx) = mpsc::channel();
        let mut threads = 0;

        for (index, sink) in boxed.into_iter().enumerate() {
            let name = core.sinks[index].name.clone();
            let worker_core = core.clone();
            let done = DoneSignal(done_tx.clone());
            let spawned = thread::Builder::new()
                .name(format!("logpipe-sink-{}", name))
                .spawn(move || run_sink_worker(worker_core, index, sink, done));
            if let Err(source) = spawned {
                core.abandon();
                return Err(ConfigError::Spawn { name, source });
            }
            threads += 1;
        }

        let dispatcher_core = core.clone();
        let done = DoneSignal(done_tx);
        let spawned = thread::Builder::new()
            .name("logpipe-dispatcher".to_string())
            .spawn(move || run_dispatcher(dispatcher_core, enrichers, done));
        if let Err(source) = spawned {
            core.abandon();
            return Err(ConfigError::Spawn {
                name: "dispatcher".to_string(),
                source,
            });
        }
        threads += 1;

        debug!(
            sinks = core.sinks.len(),
            floor = %floor,
            queue_capacity,
            "Logging pipeline started"
        );

        Ok(Logger {
            shared: Arc::new(Shared {
                core,
                floor,
                overflow_policy,
                shutdown_timeout,
                clock,
                lifecycle: Mutex::new(Lifecycle {
                    done_rx: Some(done_rx),
                    threads,
                    report: None,
                }),
            }),
            context: None,
        })
    }

    /// A logger that tags every event with `source_context`.
    pub fn for_context(&self, source_context: impl Into<String>) -> Logger {
        Logger {
            shared: self.shared.clone(),
            context: Some(Arc::from(source_context.into())),
        }
    }

    pub fn source_context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Whether an event at `level` from this logger's context would pass
    /// the pipeline's level filter.
    pub fn is_enabled(&self, level: Level) -> bool {
        self.shared.core.filter.admits(level, self.source_context())
    }

    /// Hand an event to the pipeline.
    ///
    /// Never blocks on a sink. Under the `Block` overflow policy it may wait
    /// for room in the queue, up to the configured timeout.
    pub fn emit(
        &self,
        level: Level,
        template: impl Into<String>,
        values: Vec<(String, Value)>,
        exception: Option<ExceptionInfo>,
    ) -> Delivery {
        self.emit_in(self.source_context(), level, template, values, exception)
    }

    /// Like [`Logger::emit`] with an explicit source context.
    pub(crate) fn emit_in(
        &self,
        source_context: Option<&str>,
        level: Level,
        template: impl Into<String>,
        values: Vec<(String, Value)>,
        exception: Option<ExceptionInfo>,
    ) -> Delivery {
        let shared = &self.shared;
        let diagnostics = &shared.core.diagnostics;
        if level < shared.floor {
            diagnostics.record_filtered();
            return Delivery::Filtered;
        }

        let event = LogEvent::new(shared.clock.now(), level, template, values)
            .with_exception(exception)
            .with_source_context(source_context.map(str::to_string));

        match shared.core.queue.push(event, shared.overflow_policy) {
            PushOutcome::Queued => {
                diagnostics.record_admitted();
                Delivery::Enqueued
            }
            PushOutcome::Evicted => {
                diagnostics.record_admitted();
                diagnostics.record_dropped(DropReason::Evicted);
                Delivery::Enqueued
            }
            PushOutcome::Full => {
                diagnostics.record_dropped(DropReason::QueueFull);
                Delivery::Dropped
            }
            PushOutcome::TimedOut => {
                diagnostics.record_dropped(DropReason::Timeout);
                Delivery::TimedOut
            }
            PushOutcome::Closed => {
                diagnostics.record_dropped(DropReason::AfterShutdown);
                Delivery::Closed
            }
        }
    }

    /// Emit an event carrying `err` and its cause chain.
    pub fn emit_error<E: Error + 'static>(
        &self,
        level: Level,
        err: &E,
        template: impl Into<String>,
        values: Vec<(String, Value)>,
    ) -> Delivery {
        self.emit(level, template, values, Some(ExceptionInfo::from_error(err)))
    }

    pub fn verbose(&self, template: impl Into<String>, values: Vec<(String, Value)>) -> Delivery {
        self.emit(Level::Verbose, template, values, None)
    }

    pub fn debug(&self, template: impl Into<String>, values: Vec<(String, Value)>) -> Delivery {
        self.emit(Level::Debug, template, values, None)
    }

    pub fn information(
        &self,
        template: impl Into<String>,
        values: Vec<(String, Value)>,
    ) -> Delivery {
        self.emit(Level::Information, template, values, None)
    }

    pub fn warning(&self, template: impl Into<String>, values: Vec<(String, Value)>) -> Delivery {
        self.emit(Level::Warning, template, values, None)
    }

    pub fn error(&self, template: impl Into<String>, values: Vec<(String, Value)>) -> Delivery {
        self.emit(Level::Error, template, values, None)
    }

    pub fn fatal(&self, template: impl Into<String>, values: Vec<(String, Value)>) -> Delivery {
        self.emit(Level::Fatal, template, values, None)
    }

    /// Wait until everything emitted before this call has been written and
    /// every sink flushed. Returns `false` on timeout or after shutdown.
    pub fn flush(&self, timeout: Duration) -> bool {
        let core = &self.shared.core;
        let (ack_tx, ack_rx) = mpsc::channel();
        if core.queue.push_marker(ack_tx) == PushOutcome::Closed {
            return false;
        }

        // One ack from the dispatcher plus one per sink worker
        let deadline = Instant::now().checked_add(timeout);
        (0..=core.sinks.len()).all(|_| recv_before(&ack_rx, deadline).is_ok())
    }

    /// Stop accepting events, drain queued ones into the sinks and close
    /// them, waiting at most `timeout`.
    ///
    /// Anything still queued at the deadline is discarded and counted as
    /// lost. Calling this again returns the first report.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.shared.shutdown(timeout)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lifecycle.lock().report.is_some()
    }

    /// Point-in-time copy of the pipeline counters.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.core.diagnostics.snapshot()
    }

    /// Receive sink failures, enricher failures and shutdown losses as they
    /// happen.
    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.shared.core.diagnostics.subscribe()
    }

    /// Sink names in registration order.
    pub fn sink_names(&self) -> Vec<String> {
        self.shared
            .core
            .sinks
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Events waiting in the main queue.
    pub fn queued(&self) -> usize {
        self.shared.core.queue.len()
    }
}

impl Shared {
    fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(report) = &lifecycle.report {
            return report.clone();
        }

        let start = Instant::now();
        let deadline = start.checked_add(timeout);
        let core = &self.core;
        core.queue.close();

        let mut completed = true;
        if let Some(done_rx) = lifecycle.done_rx.take() {
            let mut finished = 0;
            while finished < lifecycle.threads {
                match recv_before(&done_rx, deadline) {
                    Ok(()) => finished += 1,
                    Err(_) => {
                        completed = false;
                        break;
                    }
                }
            }
        }

        let mut lost = 0;
        if !completed {
            core.abort.store(true, Ordering::SeqCst);
            let pending = core.queue.discard();
            core.diagnostics.record_lost(pending);
            lost += pending;
            for (index, slot) in core.sinks.iter().enumerate() {
                slot.queue.close();
                let pending = slot.queue.discard();
                core.diagnostics.record_sink_lost(index, pending);
                lost += pending;
            }
            error!(
                lost,
                timeout_ms = timeout.as_millis() as u64,
                "Shutdown deadline passed; discarded pending events"
            );
        }

        let report = ShutdownReport {
            completed,
            lost,
            elapsed: start.elapsed(),
        };
        debug!(
            completed,
            lost,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Logging pipeline shut down"
        );
        lifecycle.report = Some(report.clone());
        report
    }
}

/// Receive before `deadline`; `None` waits until a message or disconnect.
fn recv_before<T>(
    rx: &mpsc::Receiver<T>,
    deadline: Option<Instant>,
) -> Result<T, mpsc::RecvTimeoutError> {
    match deadline {
        Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown(self.shutdown_timeout);
    }
}

impl Core {
    /// Close every queue so already started threads exit.
    fn abandon(&self) {
        self.queue.close();
        for slot in &self.sinks {
            slot.queue.close();
        }
    }
}

fn run_dispatcher(core: Arc<Core>, enrichers: EnricherChain, _done: DoneSignal) {
    debug!(enrichers = enrichers.len(), "Dispatcher started");
    let mut targets = Vec::with_capacity(core.sinks.len());

    while let Some(envelope) = core.queue.pop() {
        match envelope {
            Envelope::Event(mut event) => {
                if core.abort.load(Ordering::SeqCst) {
                    core.diagnostics.record_lost(1);
                    continue;
                }

                let context_minimum = core.filter.minimum_for(event.source_context());
                if !admit(event.level(), context_minimum) {
                    core.diagnostics.record_filtered();
                    continue;
                }

                targets.clear();
                targets.extend(core.sinks.iter().enumerate().filter_map(|(index, slot)| {
                    let minimum = slot
                        .minimum_level
                        .map_or(context_minimum, |m| m.max(context_minimum));
                    admit(event.level(), minimum).then_some(index)
                }));
                if targets.is_empty() {
                    continue;
                }

                enrichers.apply(&mut event, &core.diagnostics);
                let event = Arc::new(event);
                for &index in &targets {
                    match core.sinks[index]
                        .queue
                        .push(event.clone(), OverflowPolicy::DropNew)
                    {
                        PushOutcome::Queued | PushOutcome::Evicted => {}
                        PushOutcome::Full | PushOutcome::TimedOut => {
                            core.diagnostics.record_sink_dropped(index)
                        }
                        PushOutcome::Closed => core.diagnostics.record_sink_lost(index, 1),
                    }
                }
            }
            Envelope::Flush(ack) => {
                for slot in &core.sinks {
                    slot.queue.push_marker(ack.clone());
                }
                let _ = ack.send(());
            }
        }
    }

    for slot in &core.sinks {
        slot.queue.close();
    }
    debug!("Dispatcher stopped");
}

fn run_sink_worker(core: Arc<Core>, index: usize, mut sink: Box<dyn Sink>, _done: DoneSignal) {
    let slot = &core.sinks[index];
    let diagnostics = &core.diagnostics;
    let mut failing = false;

    while let Some(envelope) = slot.queue.pop() {
        if core.abort.load(Ordering::SeqCst) {
            if let Envelope::Event(_) = envelope {
                diagnostics.record_sink_lost(index, 1);
            }
            break;
        }

        match envelope {
            Envelope::Event(event) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.emit(&event)))
                    .unwrap_or_else(|payload| Err(SinkError::Other(panic_message(payload))));
                match outcome {
                    Ok(()) => {
                        diagnostics.record_delivered(index);
                        if failing {
                            info!(sink = %slot.name, "Sink recovered");
                            failing = false;
                        }
                    }
                    Err(err) => {
                        if !failing {
                            warn!(sink = %slot.name, error = %err, "Sink write failed; dropping event");
                            failing = true;
                        }
                        diagnostics.record_write_failure(index, err.to_string());
                    }
                }
            }
            Envelope::Flush(ack) => {
                flush_sink(&slot.name, sink.as_mut());
                let _ = ack.send(());
            }
        }
    }

    if !core.abort.load(Ordering::SeqCst) {
        flush_sink(&slot.name, sink.as_mut());
    }
    debug!(sink = %slot.name, "Sink worker stopped");
}

fn flush_sink(name: &str, sink: &mut dyn Sink) {
    match panic::catch_unwind(AssertUnwindSafe(|| sink.flush())) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(sink = %name, error = %err, "Sink flush failed"),
        Err(payload) => warn!(sink = %name, error = %panic_message(payload), "Sink flush panicked"),
    }
}
