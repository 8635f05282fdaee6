//! Rendering events to text and JSON lines, and parsing text lines back.
//!
//! Text line layout (one event per line):
//!
//! ```text
//! 2026-01-21T14:30:45.123Z [INF] User 42 signed in<TAB>Peer=p1 MachineName=host-a<TAB>!Error: boom
//! └─ timestamp (ms) ─────┘ └lvl┘ └─ message ──────┘    └─ extra properties ───────┘    └exception┘
//! ```
//!
//! The properties segment is present whenever there are extra properties or
//! an exception; the exception segment starts with `!`. Tabs, newlines and
//! backslashes inside any segment are escaped so a rendered event never
//! spans lines.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::event::LogEvent;
use crate::level::Level;
use crate::value::Value;

/// Output encoding for file and console sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Human-readable text, see module docs
    #[default]
    Text,
    /// Compact JSON, one object per line
    Json,
}

impl OutputFormat {
    /// Render an event without a line terminator.
    pub fn render(&self, event: &LogEvent) -> String {
        match self {
            OutputFormat::Text => render_text(event),
            OutputFormat::Json => render_json(event),
        }
    }
}

const SOURCE_CONTEXT: &str = "SourceContext";

fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render an event as a single text line (no terminator).
pub fn render_text(event: &LogEvent) -> String {
    let mut line = format!(
        "{} [{}] {}",
        format_timestamp(&event.timestamp()),
        event.level().short_code(),
        escape(&event.render_message())
    );

    // The event's own source context owns the `SourceContext` key
    let context = event.source_context();
    let mut properties: Vec<String> = Vec::new();
    if let Some(context) = context {
        properties.push(format!("{}={}", SOURCE_CONTEXT, property_text(&Value::from(context))));
    }
    properties.extend(
        event
            .extra_properties()
            .into_iter()
            .filter(|(name, _)| context.is_none() || *name != SOURCE_CONTEXT)
            .map(|(name, value)| format!("{}={}", name, property_text(value))),
    );

    if !properties.is_empty() || event.exception().is_some() {
        line.push('\t');
        line.push_str(&escape(&properties.join(" ")));
    }
    if let Some(exception) = event.exception() {
        line.push_str("\t!");
        line.push_str(&escape(&exception.to_string()));
    }
    line
}

/// Strings with spaces or quotes are JSON-quoted so `k=v` pairs stay readable.
fn property_text(value: &Value) -> String {
    match value {
        Value::Str(s) if s.is_empty() || s.contains([' ', '"', '=']) => {
            serde_json::Value::String(s.clone()).to_string()
        }
        other => other.to_string(),
    }
}

/// Render an event as a compact JSON object (no terminator).
pub fn render_json(event: &LogEvent) -> String {
    let mut map = serde_json::Map::new();
    map.insert(
        "@t".to_string(),
        serde_json::Value::String(format_timestamp(&event.timestamp())),
    );
    map.insert(
        "@l".to_string(),
        serde_json::Value::String(event.level().as_str().to_string()),
    );
    map.insert(
        "@mt".to_string(),
        serde_json::Value::String(event.template().to_string()),
    );
    map.insert(
        "@m".to_string(),
        serde_json::Value::String(event.render_message()),
    );
    if let Some(exception) = event.exception() {
        map.insert(
            "@x".to_string(),
            serde_json::Value::String(exception.to_string()),
        );
    }
    if let Some(context) = event.source_context() {
        map.insert(
            SOURCE_CONTEXT.to_string(),
            serde_json::Value::String(context.to_string()),
        );
    }
    // Values never replace the reserved keys above
    for (name, value) in event.values() {
        map.entry(name.clone()).or_insert_with(|| value.to_json());
    }
    for (name, value) in event.properties() {
        map.entry(name.clone()).or_insert_with(|| value.to_json());
    }
    serde_json::Value::Object(map).to_string()
}

/// A text line split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLine {
    pub timestamp: DateTime<FixedOffset>,
    pub level: Level,
    pub message: String,
    /// Raw `k=v` listing, unescaped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

/// Parse a line produced by [`render_text`].
pub fn parse_text_line(line: &str) -> Result<ParsedLine, ParseError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let (ts, rest) = line
        .split_once(' ')
        .ok_or_else(|| ParseError::MissingHeader(line.to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(ts)
        .map_err(|e| ParseError::InvalidTimestamp(format!("{}: {}", ts, e)))?;

    let rest = rest
        .strip_prefix('[')
        .ok_or_else(|| ParseError::MissingHeader(line.to_string()))?;
    let (code, rest) = rest
        .split_once("] ")
        .or_else(|| rest.strip_suffix(']').map(|code| (code, "")))
        .ok_or_else(|| ParseError::MissingHeader(line.to_string()))?;
    let level = Level::from_short_code(code).ok_or_else(|| ParseError::InvalidLevel(code.to_string()))?;

    let mut segments = rest.split('\t');
    let message = unescape(segments.next().unwrap_or(""));
    let properties = segments
        .next()
        .filter(|s| !s.is_empty())
        .map(unescape);
    let exception = segments
        .next()
        .and_then(|s| s.strip_prefix('!'))
        .map(unescape);

    Ok(ParsedLine {
        timestamp,
        level,
        message,
        properties,
        exception,
    })
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
