//! Message template parsing and rendering.
//!
//! Templates carry named holes such as `User {UserId} signed in from {Address}`.
//! `{{` and `}}` are literal braces. A hole may carry a capture hint
//! (`{@Order}`, `{$Order}`) or a format suffix (`{Elapsed:0.00}`); both are
//! accepted and render the same as the bare name.

use crate::value::Value;

/// A parsed template token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal text, braces already unescaped
    Text(String),
    /// A named hole; `raw` is the original text including braces
    Hole { name: String, raw: String },
}

/// A message template split into tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    tokens: Vec<Token>,
}

impl MessageTemplate {
    /// Parse a template string. Malformed holes are kept as literal text.
    pub fn parse(template: &str) -> Self {
        let mut tokens = Vec::new();
        let mut text = String::new();
        let mut rest = template;

        while let Some(c) = rest.chars().next() {
            if rest.starts_with("{{") {
                text.push('{');
                rest = &rest[2..];
                continue;
            }
            if rest.starts_with("}}") {
                text.push('}');
                rest = &rest[2..];
                continue;
            }
            if c == '{' {
                if let Some(end) = rest.find('}') {
                    let raw = &rest[..=end];
                    if let Some(name) = hole_name(&raw[1..raw.len() - 1]) {
                        if !text.is_empty() {
                            tokens.push(Token::Text(std::mem::take(&mut text)));
                        }
                        tokens.push(Token::Hole {
                            name: name.to_string(),
                            raw: raw.to_string(),
                        });
                        rest = &rest[end + 1..];
                        continue;
                    }
                }
            }
            text.push(c);
            rest = &rest[c.len_utf8()..];
        }

        if !text.is_empty() {
            tokens.push(Token::Text(text));
        }

        Self { tokens }
    }

    /// Parsed tokens in template order.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Names of all holes, in order of appearance (may repeat).
    pub fn hole_names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Hole { name, .. } => Some(name.as_str()),
            Token::Text(_) => None,
        })
    }

    /// Whether the template has a hole with this name.
    pub fn references(&self, name: &str) -> bool {
        self.hole_names().any(|n| n == name)
    }

    /// Substitute captured values into the holes.
    ///
    /// Holes with no matching value are rendered as written.
    pub fn render(&self, values: &[(String, Value)]) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::Hole { name, raw } => {
                    match values.iter().find(|(n, _)| n == name) {
                        Some((_, value)) => out.push_str(&value.to_string()),
                        None => out.push_str(raw),
                    }
                }
            }
        }
        out
    }
}

/// Extract the property name from the inside of a hole, or `None` when the
/// contents are not a valid hole.
fn hole_name(inner: &str) -> Option<&str> {
    let inner = inner
        .strip_prefix('@')
        .or_else(|| inner.strip_prefix('$'))
        .unwrap_or(inner);
    let name = inner.split([':', ',']).next().unwrap_or("");
    let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some(name)
}
