//! The immutable log event and its attached failure record.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::context::LogContext;
use crate::level::Level;
use crate::template::MessageTemplate;
use crate::value::Value;

/// A failure record attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Short type name of the error, e.g. `Error` for `std::io::Error`
    pub kind: String,
    /// Display text of the error
    pub message: String,
    /// Display text of each `source()` in the chain, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ExceptionInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Capture an error and its source chain.
    pub fn from_error<E: std::error::Error + 'static>(err: &E) -> Self {
        let full = std::any::type_name::<E>();
        let path = full.split('<').next().unwrap_or(full);
        let kind = path.rsplit("::").next().unwrap_or(path);
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: kind.to_string(),
            message: err.to_string(),
            causes,
        }
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for cause in &self.causes {
            write!(f, "\n  caused by: {}", cause)?;
        }
        Ok(())
    }
}

/// Identity of the thread that created an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: u64,
    pub name: Option<String>,
}

impl ThreadInfo {
    /// Describe the calling thread.
    pub fn current() -> Self {
        let thread = std::thread::current();
        // ThreadId has no stable integer accessor; its Debug form is `ThreadId(N)`.
        let id = format!("{:?}", thread.id())
            .trim_start_matches("ThreadId(")
            .trim_end_matches(')')
            .parse()
            .unwrap_or(0);
        Self {
            id,
            name: thread.name().map(str::to_string),
        }
    }
}

/// One log occurrence.
///
/// Everything set at construction is read-only afterwards. Enrichment only
/// inserts into the property map, where the last write for a key wins.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    timestamp: DateTime<FixedOffset>,
    level: Level,
    template: String,
    values: Vec<(String, Value)>,
    exception: Option<ExceptionInfo>,
    source_context: Option<String>,
    thread: ThreadInfo,
    ambient: Vec<(String, Value)>,
    properties: BTreeMap<String, Value>,
}

impl LogEvent {
    /// Create an event on the calling thread, capturing the thread identity
    /// and the current [`LogContext`] stack.
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        level: Level,
        template: impl Into<String>,
        values: Vec<(String, Value)>,
    ) -> Self {
        Self {
            timestamp,
            level,
            template: template.into(),
            values,
            exception: None,
            source_context: None,
            thread: ThreadInfo::current(),
            ambient: LogContext::snapshot(),
            properties: BTreeMap::new(),
        }
    }

    /// Attach a failure record.
    pub fn with_exception(mut self, exception: Option<ExceptionInfo>) -> Self {
        self.exception = exception;
        self
    }

    /// Set the source context (usually a module or component path).
    pub fn with_source_context(mut self, context: Option<String>) -> Self {
        self.source_context = context;
        self
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Captured values in call-site order.
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    pub fn source_context(&self) -> Option<&str> {
        self.source_context.as_deref()
    }

    pub fn thread(&self) -> &ThreadInfo {
        &self.thread
    }

    /// Ambient properties captured from the creating thread.
    pub fn ambient(&self) -> &[(String, Value)] {
        &self.ambient
    }

    /// Enrichment properties, ordered by key.
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// Look up a captured value first, then an enrichment property.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| self.properties.get(name))
    }

    /// Insert an enrichment property. An existing key is overwritten.
    pub(crate) fn set_property(&mut self, name: String, value: Value) {
        self.properties.insert(name, value);
    }

    /// The template with captured values substituted.
    pub fn render_message(&self) -> String {
        MessageTemplate::parse(&self.template).render(&self.values)
    }

    /// Captured values the template does not reference, followed by
    /// enrichment properties that do not shadow a captured value.
    pub fn extra_properties(&self) -> Vec<(&str, &Value)> {
        let template = MessageTemplate::parse(&self.template);
        let mut extra: Vec<(&str, &Value)> = self
            .values
            .iter()
            .filter(|(name, _)| !template.references(name))
            .map(|(name, value)| (name.as_str(), value))
            .collect();
        extra.extend(
            self.properties
                .iter()
                .filter(|(name, _)| !self.values.iter().any(|(n, _)| n == *name))
                .map(|(name, value)| (name.as_str(), value)),
        );
        extra
    }
}
