//! Structured logger handle and log sinks.
//!
//! A [`Logger`] is a cheap-to-clone handle that carries accumulated key/value
//! context and forwards finished records to a [`LogSink`]. Deriving a logger
//! with [`Logger::with_field`] never mutates the original, so request-scoped
//! loggers can be built from a shared base logger.
//!
//! The default sink, [`TracingSink`], relays records to `tracing` so they end
//! up wherever the application's subscriber sends them. [`MemorySink`] keeps
//! them in memory, and [`NopSink`] drops them.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tracing::field::display;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;
use crate::types::{LogRecord, HTTP_REQUEST, HTTP_RESPONSE};
use crate::Options;

/// Destination for finished log records.
///
/// # Examples
///
/// ```rust
/// use httplog::{LogRecord, LogSink, Logger};
///
/// struct StdoutSink;
///
/// impl LogSink for StdoutSink {
///     fn emit(&self, record: LogRecord) {
///         println!("{}", record.to_json());
///     }
/// }
///
/// let logger = Logger::new(StdoutSink).with_field("service", "billing");
/// logger.info("ready");
/// ```
pub trait LogSink: Send + Sync + 'static {
    /// Accept one record. Sinks must not panic.
    fn emit(&self, record: LogRecord);
}

/// Relays records to `tracing` events on the `httplog` target.
///
/// `tracing` fields are flat, so each group travels as its own JSON-encoded
/// value: `http_request`, `http_response`, and `context` for everything else.
/// Empty groups are left out.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

macro_rules! forward_event {
    ($level:expr, $message:expr, $request:expr, $response:expr, $context:expr) => {
        tracing::event!(
            target: "httplog",
            $level,
            http_request = $request,
            http_response = $response,
            context = $context,
            "{}",
            $message
        )
    };
}

impl LogSink for TracingSink {
    fn emit(&self, record: LogRecord) {
        let LogRecord {
            level,
            message,
            mut fields,
        } = record;
        let request = fields.remove(HTTP_REQUEST).map(display);
        let response = fields.remove(HTTP_RESPONSE).map(display);
        let context = (!fields.is_empty()).then(|| display(Value::Object(fields)));

        match level {
            Level::ERROR => forward_event!(Level::ERROR, message, request, response, context),
            Level::WARN => forward_event!(Level::WARN, message, request, response, context),
            Level::INFO => forward_event!(Level::INFO, message, request, response, context),
            Level::DEBUG => forward_event!(Level::DEBUG, message, request, response, context),
            _ => forward_event!(Level::TRACE, message, request, response, context),
        }
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSink;

impl LogSink for NopSink {
    fn emit(&self, _record: LogRecord) {}
}

/// Collects records in memory.
///
/// Clones share the same buffer, so a test can keep one clone and hand the
/// other to the logger.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records emitted so far, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: LogRecord) {
        self.lock().push(record);
    }
}

/// Structured logger handle with accumulated context.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    context: Map<String, Value>,
    max_level: LevelFilter,
}

impl Logger {
    /// Create a logger writing to `sink`, with no context and every level enabled.
    pub fn new<S: LogSink>(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
            context: Map::new(),
            max_level: LevelFilter::TRACE,
        }
    }

    /// A logger that discards everything.
    pub fn nop() -> Self {
        Self {
            sink: Arc::new(NopSink),
            context: Map::new(),
            max_level: LevelFilter::OFF,
        }
    }

    /// Only emit records at `max_level` or more severe.
    pub fn with_max_level(mut self, max_level: LevelFilter) -> Self {
        self.max_level = max_level;
        self
    }

    /// Derive a logger that additionally carries `key = value`.
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut derived = self.clone();
        derived.context.insert(key.into(), value.into());
        derived
    }

    /// Derive a logger that additionally carries every pair in `fields`.
    pub fn with_fields<I, K>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut derived = self.clone();
        derived
            .context
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v)));
        derived
    }

    /// Accumulated context fields.
    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.max_level
    }

    /// Emit one record combining the accumulated context with `fields`.
    ///
    /// Fields given here win over context fields with the same key.
    pub fn log(&self, level: Level, message: impl Into<String>, fields: Map<String, Value>) {
        if !self.enabled(level) {
            return;
        }
        let mut all = self.context.clone();
        all.extend(fields);
        self.sink.emit(LogRecord {
            level,
            message: message.into(),
            fields: all,
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::ERROR, message, Map::new());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::WARN, message, Map::new());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::INFO, message, Map::new());
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::DEBUG, message, Map::new());
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(TracingSink)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("context", &self.context)
            .field("max_level", &self.max_level)
            .finish_non_exhaustive()
    }
}

/// Build a base logger for `service` writing to `sink`.
///
/// The logger is filtered at the configured `log_level` and carries a
/// `service` field plus every configured tag.
///
/// # Examples
///
/// ```rust
/// use httplog::{new_logger, MemorySink, Options};
///
/// let sink = MemorySink::new();
/// let mut options = Options::default();
/// options.tags.insert("env".into(), "staging".into());
///
/// let logger = new_logger("billing", &options, sink.clone()).unwrap();
/// logger.debug("filtered out");
/// logger.info("kept");
///
/// let records = sink.records();
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].fields["service"], "billing");
/// assert_eq!(records[0].fields["env"], "staging");
/// ```
pub fn new_logger<S: LogSink>(
    service: &str,
    options: &Options,
    sink: S,
) -> Result<Logger, ConfigError> {
    let logger = Logger::new(sink)
        .with_max_level(options.level_filter()?)
        .with_field("service", service);
    Ok(logger.with_fields(
        options
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone()))),
    ))
}

/// Install a global `tracing` subscriber matching `options`.
///
/// JSON output when `options.json` is set, human-readable output otherwise.
/// `RUST_LOG` takes precedence over the configured level.
///
/// Records relayed by [`TracingSink`] keep their field groups apart, but each
/// group is a JSON-encoded string inside the event's `fields`, not a nested
/// object. Use a custom [`LogSink`] for fully nested JSON records.
pub fn init_tracing(options: &Options) -> Result<(), ConfigError> {
    let level = options.level_filter()?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if options.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| ConfigError::SubscriberInit(e.to_string()))
}
