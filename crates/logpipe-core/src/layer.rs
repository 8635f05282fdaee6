//! Bridge from `tracing` into a pipeline.
//!
//! Installing [`PipelineLayer`] on a `tracing_subscriber` registry routes
//! every `tracing` event through a [`Logger`]: the event target becomes the
//! source context (so level overrides apply per module), the `message` field
//! becomes the message and all other fields become event values.
//!
//! Events from this crate itself are skipped so the pipeline's own
//! diagnostics cannot feed back into it.

use std::fmt::Write as FmtWrite;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::level::Level;
use crate::pipeline::Logger;
use crate::value::Value;

/// Targets starting with this prefix are never forwarded.
const SELF_TARGET: &str = "logpipe_core";

/// A tracing Layer that emits into a [`Logger`].
pub struct PipelineLayer {
    logger: Logger,
}

impl PipelineLayer {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if target.starts_with(SELF_TARGET) {
            return;
        }

        let level = Level::from(metadata.level());
        let mut visitor = ValueVisitor::default();
        event.record(&mut visitor);

        // tracing messages are already formatted; keep their braces literal
        let template = visitor
            .message
            .unwrap_or_default()
            .replace('{', "{{")
            .replace('}', "}}");
        let mut values = visitor.fields;

        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                values.push(("Span".to_string(), Value::from(spans.join(" > "))));
            }
        }

        self.logger.emit_in(Some(target), level, template, values, None);
    }
}

/// Collects the message and typed field values of a tracing event.
#[derive(Default)]
struct ValueVisitor {
    message: Option<String>,
    fields: Vec<(String, Value)>,
}

impl ValueVisitor {
    fn push(&mut self, field: &Field, value: Value) {
        self.fields.push((field.name().to_string(), value));
    }
}

impl Visit for ValueVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);

        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.push(field, Value::Str(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push(field, Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, Value::I64(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, Value::U64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, Value::F64(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, Value::Str(value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggerBuilder;
    use crate::sinks::MemorySink;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_tracing_events_are_forwarded() {
        let sink = MemorySink::new();
        let logger = LoggerBuilder::new()
            .minimum_level(Level::Debug)
            .override_level("noisy", Level::Error)
            .write_to_sink("mem", None, sink.clone())
            .build()
            .unwrap();

        let subscriber = tracing_subscriber::registry().with(PipelineLayer::new(logger.clone()));
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("request");
            let _enter = span.enter();
            tracing::info!(target: "app.web", user = "alice", attempts = 3u64, "Signed in {{braces}}");
            tracing::warn!(target: "noisy", "suppressed");
            tracing::trace!(target: "app.web", "too fine");
        });
        logger.shutdown(Duration::from_secs(5));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.level(), Level::Information);
        assert_eq!(event.source_context(), Some("app.web"));
        assert_eq!(event.render_message(), "Signed in {braces}");

        let values: Vec<(&str, &Value)> = event.values().iter().map(|(k, v)| (k.as_str(), v)).collect();
        assert!(values.contains(&("user", &Value::from("alice"))));
        assert!(values.contains(&("attempts", &Value::U64(3))));
        assert!(values.contains(&("Span", &Value::from("request"))));
    }

    #[test]
    fn test_own_events_are_skipped() {
        let sink = MemorySink::new();
        let logger = LoggerBuilder::new()
            .write_to_sink("mem", None, sink.clone())
            .build()
            .unwrap();

        let subscriber = tracing_subscriber::registry().with(PipelineLayer::new(logger.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "logpipe_core::pipeline", "internal");
        });
        logger.shutdown(Duration::from_secs(5));
        assert!(sink.is_empty());
    }
}
