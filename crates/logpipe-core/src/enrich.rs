//! Enrichers attach contextual properties to events before delivery.
//!
//! The [`EnricherChain`] runs enrichers in registration order on the
//! dispatcher thread, once per event. Later enrichers overwrite keys written
//! by earlier ones; this last-write-wins order is intentional, so a
//! specific enricher registered late can refine a generic one registered
//! early.
//!
//! A failing enricher (an `Err` or a panic) never stops the event. Its
//! contribution is skipped, the failure is counted and broadcast, and the
//! first failure of each enricher is written to the self-log.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::diagnostics::Diagnostics;
use crate::error::EnrichError;
use crate::event::LogEvent;
use crate::value::Value;

/// Adds properties to an event.
///
/// Implementations return the properties to add instead of mutating the
/// event, which keeps the captured template and values read-only.
pub trait Enricher: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Properties to add to `event`.
    fn enrich(&self, event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError>;
}

/// A fixed property added to every event.
pub struct PropertyEnricher {
    name: String,
    value: Value,
}

impl PropertyEnricher {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Enricher for PropertyEnricher {
    fn name(&self) -> &str {
        "property"
    }

    fn enrich(&self, _event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
        Ok(vec![(self.name.clone(), self.value.clone())])
    }
}

/// `ThreadName` of the thread that emitted the event, when it has one.
pub struct ThreadNameEnricher;

impl Enricher for ThreadNameEnricher {
    fn name(&self) -> &str {
        "thread_name"
    }

    fn enrich(&self, event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
        Ok(event
            .thread()
            .name
            .as_ref()
            .map(|name| vec![("ThreadName".to_string(), Value::from(name))])
            .unwrap_or_default())
    }
}

/// `ThreadId` of the thread that emitted the event.
pub struct ThreadIdEnricher;

impl Enricher for ThreadIdEnricher {
    fn name(&self) -> &str {
        "thread_id"
    }

    fn enrich(&self, event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
        Ok(vec![("ThreadId".to_string(), Value::from(event.thread().id))])
    }
}

/// `ProcessId` of the current process.
pub struct ProcessIdEnricher {
    pid: u32,
}

impl Default for ProcessIdEnricher {
    fn default() -> Self {
        Self {
            pid: std::process::id(),
        }
    }
}

impl Enricher for ProcessIdEnricher {
    fn name(&self) -> &str {
        "process_id"
    }

    fn enrich(&self, _event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
        Ok(vec![("ProcessId".to_string(), Value::from(self.pid))])
    }
}

/// `MachineName`, resolved once at construction.
pub struct MachineNameEnricher {
    machine: String,
}

impl MachineNameEnricher {
    pub fn new() -> Self {
        Self {
            machine: machine_name(),
        }
    }
}

impl Default for MachineNameEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl Enricher for MachineNameEnricher {
    fn name(&self) -> &str {
        "machine_name"
    }

    fn enrich(&self, _event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
        Ok(vec![("MachineName".to_string(), Value::from(&self.machine))])
    }
}

fn machine_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .chain(
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string()),
        )
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Copies an environment variable into a property, read once at construction.
/// Nothing is added when the variable is unset.
pub struct EnvironmentVariableEnricher {
    property: String,
    value: Option<String>,
}

impl EnvironmentVariableEnricher {
    pub fn new(variable: &str, property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: std::env::var(variable).ok(),
        }
    }
}

impl Enricher for EnvironmentVariableEnricher {
    fn name(&self) -> &str {
        "environment_variable"
    }

    fn enrich(&self, _event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
        Ok(self
            .value
            .as_ref()
            .map(|v| vec![(self.property.clone(), Value::from(v))])
            .unwrap_or_default())
    }
}

/// Properties pushed with [`LogContext`](crate::context::LogContext) on the
/// emitting thread. Inner pushes of the same name win over outer ones.
pub struct FromLogContextEnricher;

impl Enricher for FromLogContextEnricher {
    fn name(&self) -> &str {
        "log_context"
    }

    fn enrich(&self, event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
        Ok(event.ambient().to_vec())
    }
}

struct Slot {
    enricher: Arc<dyn Enricher>,
    reported: AtomicBool,
}

/// Ordered list of enrichers.
#[derive(Default)]
pub struct EnricherChain {
    slots: Vec<Slot>,
}

impl EnricherChain {
    pub fn new(enrichers: Vec<Arc<dyn Enricher>>) -> Self {
        Self {
            slots: enrichers
                .into_iter()
                .map(|enricher| Slot {
                    enricher,
                    reported: AtomicBool::new(false),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Run every enricher against `event`, in order.
    pub fn apply(&self, event: &mut LogEvent, diagnostics: &Diagnostics) {
        for slot in &self.slots {
            let enricher = &slot.enricher;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| enricher.enrich(event)))
                .unwrap_or_else(|payload| Err(EnrichError::Panicked(panic_message(payload))));

            match outcome {
                Ok(properties) => {
                    for (name, value) in properties {
                        event.set_property(name, value);
                    }
                }
                Err(err) => {
                    if !slot.reported.swap(true, Ordering::Relaxed) {
                        warn!(
                            enricher = enricher.name(),
                            error = %err,
                            "Enricher failed; events continue without its properties"
                        );
                    }
                    diagnostics.record_enricher_failure(enricher.name(), err.to_string());
                }
            }
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LogContext;
    use crate::level::Level;
    use chrono::{FixedOffset, TimeZone};

    fn event() -> LogEvent {
        let ts = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .unwrap();
        LogEvent::new(
            ts,
            Level::Information,
            "Job {JobId} done",
            vec![("JobId".to_string(), Value::from(7u32))],
        )
    }

    struct Failing;

    impl Enricher for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn enrich(&self, _event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
            Err(EnrichError::Failed("lookup service down".to_string()))
        }
    }

    struct Panicking;

    impl Enricher for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn enrich(&self, _event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
            panic!("enricher bug")
        }
    }

    #[test]
    fn test_chain_applies_in_order_last_write_wins() {
        let chain = EnricherChain::new(vec![
            Arc::new(PropertyEnricher::new("Env", "dev")),
            Arc::new(PropertyEnricher::new("Region", "eu")),
            Arc::new(PropertyEnricher::new("Env", "prod")),
        ]);
        let diag = Diagnostics::new(Vec::new());
        let mut ev = event();
        chain.apply(&mut ev, &diag);

        assert_eq!(ev.properties().len(), 2);
        assert_eq!(ev.properties()["Env"], Value::from("prod"));
        assert_eq!(ev.properties()["Region"], Value::from("eu"));
    }

    #[test]
    fn test_chain_twice_is_idempotent() {
        let chain = EnricherChain::new(vec![
            Arc::new(PropertyEnricher::new("Env", "prod")),
            Arc::new(ProcessIdEnricher::default()),
            Arc::new(ThreadIdEnricher),
        ]);
        let diag = Diagnostics::new(Vec::new());
        let mut once = event();
        chain.apply(&mut once, &diag);
        let mut twice = once.clone();
        chain.apply(&mut twice, &diag);

        assert_eq!(once.properties(), twice.properties());
        assert_eq!(twice.values(), once.values());
    }

    #[test]
    fn test_failures_are_isolated() {
        let chain = EnricherChain::new(vec![
            Arc::new(Failing),
            Arc::new(Panicking),
            Arc::new(PropertyEnricher::new("After", true)),
        ]);
        let diag = Diagnostics::new(Vec::new());
        let mut rx = diag.subscribe();

        let mut first = event();
        chain.apply(&mut first, &diag);
        let mut second = event();
        chain.apply(&mut second, &diag);

        assert_eq!(first.properties().len(), 1);
        assert_eq!(first.properties()["After"], Value::from(true));
        assert_eq!(first.render_message(), "Job 7 done");
        assert_eq!(diag.snapshot().enricher_failures, 4);

        match rx.try_recv().unwrap() {
            crate::diagnostics::DiagnosticEvent::EnricherFailed { enricher, error } => {
                assert_eq!(enricher, "failing");
                assert_eq!(error, "lookup service down");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_builtin_enrichers() {
        let _guard = LogContext::push_property("RequestId", "r-42");
        std::env::set_var("LOGPIPE_TEST_ENRICH_ENV", "staging");

        let chain = EnricherChain::new(vec![
            Arc::new(MachineNameEnricher::new()),
            Arc::new(EnvironmentVariableEnricher::new(
                "LOGPIPE_TEST_ENRICH_ENV",
                "Environment",
            )),
            Arc::new(EnvironmentVariableEnricher::new(
                "LOGPIPE_TEST_ENRICH_UNSET",
                "Unset",
            )),
            Arc::new(FromLogContextEnricher),
        ]);
        let diag = Diagnostics::new(Vec::new());
        let mut ev = event();
        chain.apply(&mut ev, &diag);

        assert!(ev.properties().contains_key("MachineName"));
        assert_eq!(ev.properties()["Environment"], Value::from("staging"));
        assert!(!ev.properties().contains_key("Unset"));
        assert_eq!(ev.properties()["RequestId"], Value::from("r-42"));
    }
}
