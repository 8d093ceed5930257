//! Data types for emitted log records.

use serde_json::{Map, Value};
use tracing::Level;

/// Field group key holding the request metadata
pub const HTTP_REQUEST: &str = "http_request";
/// Field group key holding the response metadata
pub const HTTP_RESPONSE: &str = "http_response";

/// A single structured log record handed to a [`LogSink`](crate::LogSink).
///
/// `fields` holds the logger's accumulated context merged with the fields
/// given at the emission site; nested groups such as [`HTTP_REQUEST`] and
/// [`HTTP_RESPONSE`] are JSON objects.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Severity the record was emitted at
    pub level: Level,
    /// Free-text message, e.g. `Response: 404 Client Error`
    pub message: String,
    /// Structured fields
    pub fields: Map<String, Value>,
}

impl LogRecord {
    /// Look up a field by a dotted path, e.g. `http_response.status`.
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Render the record as a flat JSON object with `level` and `message`
    /// alongside the structured fields.
    ///
    /// ```rust
    /// use httplog::LogRecord;
    /// use serde_json::{json, Map};
    ///
    /// let record = LogRecord {
    ///     level: tracing::Level::WARN,
    ///     message: "Response: 404 Client Error".into(),
    ///     fields: Map::new(),
    /// };
    /// assert_eq!(
    ///     record.to_json(),
    ///     json!({"level": "warn", "message": "Response: 404 Client Error"})
    /// );
    /// ```
    pub fn to_json(&self) -> Value {
        let mut out = Map::with_capacity(self.fields.len() + 2);
        out.insert(
            "level".into(),
            Value::String(self.level.as_str().to_ascii_lowercase()),
        );
        out.insert("message".into(), Value::String(self.message.clone()));
        for (key, value) in &self.fields {
            out.insert(key.clone(), value.clone());
        }
        Value::Object(out)
    }
}
