//! Level filtering with per-source-context overrides.
//!
//! Resolution order for a source context:
//! 1. an override registered for exactly that context
//! 2. the longest override that is a namespace prefix of the context
//! 3. the global default
//!
//! A prefix `app.db` covers `app.db`, `app.db.pool` and `app.db::pool`, but
//! not `app.dbx`.

use std::collections::BTreeMap;

use crate::level::Level;

/// Whether an event at `level` passes a threshold.
pub fn admit(level: Level, effective_minimum: Level) -> bool {
    level >= effective_minimum
}

/// Global minimum level plus namespace overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelFilter {
    default: Level,
    overrides: BTreeMap<String, Level>,
}

impl LevelFilter {
    pub fn new(default: Level) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Add or replace an override for a context prefix.
    pub fn with_override(mut self, prefix: impl Into<String>, level: Level) -> Self {
        self.overrides.insert(prefix.into(), level);
        self
    }

    pub fn default_level(&self) -> Level {
        self.default
    }

    pub fn overrides(&self) -> &BTreeMap<String, Level> {
        &self.overrides
    }

    /// Effective minimum for a source context.
    pub fn minimum_for(&self, source_context: Option<&str>) -> Level {
        let Some(context) = source_context else {
            return self.default;
        };
        if let Some(level) = self.overrides.get(context) {
            return *level;
        }
        self.overrides
            .iter()
            .filter(|(prefix, _)| is_namespace_prefix(prefix, context))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, level)| *level)
            .unwrap_or(self.default)
    }

    /// The lowest level any context can admit.
    pub fn floor(&self) -> Level {
        self.overrides
            .values()
            .copied()
            .fold(self.default, std::cmp::min)
    }

    /// Full check for an event level in a context.
    pub fn admits(&self, level: Level, source_context: Option<&str>) -> bool {
        admit(level, self.minimum_for(source_context))
    }
}

fn is_namespace_prefix(prefix: &str, context: &str) -> bool {
    match context.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || rest.starts_with("::"),
        None => false,
    }
}
