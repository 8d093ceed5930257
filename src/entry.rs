//! Request-scoped log entry and the accessors handlers use to enrich it.
//!
//! The middleware creates one [`LogEntry`] per request and stores a
//! [`LogEntryHandle`] in the request extensions. Anything further down the
//! chain can reach it through [`get_logger`], [`set_field`], [`set_fields`],
//! or the [`RequestLog`] extractor. When no entry is present these degrade to
//! a discarding logger and no-ops.
//!
//! The handle is shared with the middleware so it can emit the final record,
//! but fields are meant to be added sequentially from the request's own call
//! chain. Enriching the same entry from several concurrently running sub-tasks
//! is not ordered: the last write of a key wins.

use std::convert::Infallible;
use std::io::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use serde_json::{Map, Value};
use tracing::Level;

use crate::fields::{request_log_fields, response_log_fields};
use crate::logger::Logger;
use crate::status::{status_label, status_level};
use crate::types::{HTTP_REQUEST, HTTP_RESPONSE};
use crate::Options;

/// Placeholder for `stacktrace` when the stack goes to the console instead
const STACK_PLACEHOLDER: &str = "#";

/// Log state for a single request.
#[derive(Debug)]
pub struct LogEntry {
    logger: Logger,
    panic_message: Option<String>,
    options: Arc<Options>,
}

impl LogEntry {
    /// Create the entry for `request`, deriving its logger from `base` with
    /// the request field group attached.
    pub fn new(base: &Logger, request: &Request, options: Arc<Options>) -> Self {
        let request_fields = request_log_fields(request, &options.skip_headers);
        Self {
            logger: base.with_field(HTTP_REQUEST, Value::Object(request_fields)),
            panic_message: None,
            options,
        }
    }

    /// The accumulated logger, including the request field group and any
    /// fields added since.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.logger = self.logger.with_field(key, value);
    }

    pub fn set_fields(&mut self, fields: Map<String, Value>) {
        self.logger = self.logger.with_fields(fields);
    }

    /// Record a panic raised while handling the request.
    ///
    /// Attaches `panic` and `stacktrace` fields and appends the panic value to
    /// the final response message. Outside JSON mode the stack is printed to
    /// stderr and the structured field only carries a placeholder.
    pub fn capture_panic(&mut self, value: &str, stack: &str) {
        let stacktrace = if self.options.json {
            stack
        } else {
            STACK_PLACEHOLDER
        };
        self.logger = self
            .logger
            .with_field("stacktrace", stacktrace)
            .with_field("panic", value);
        self.panic_message = Some(value.to_string());

        if !self.options.json {
            print_pretty_stack(value, stack);
        }
    }

    /// Pending panic message, if a panic was captured.
    pub fn panic_message(&self) -> Option<&str> {
        self.panic_message.as_deref()
    }

    /// Emit the final response record.
    ///
    /// In concise mode the response headers are included, and for statuses
    /// of 400 and above so is the captured `body` (empty when none was given).
    pub fn write(
        &self,
        status: i32,
        bytes: usize,
        headers: &HeaderMap,
        elapsed: Duration,
        body: Option<&[u8]>,
    ) {
        let (level, message, fields) = self.response_record(status, bytes, headers, elapsed, body);
        self.logger.log(level, message, fields);
    }

    fn response_record(
        &self,
        status: i32,
        bytes: usize,
        headers: &HeaderMap,
        elapsed: Duration,
        body: Option<&[u8]>,
    ) -> (Level, String, Map<String, Value>) {
        let mut message = format!("Response: {status} {}", status_label(status));
        if let Some(panic) = &self.panic_message {
            message = format!("{message} - {panic}");
        }

        let (headers, body) = if self.options.concise {
            let body = (status >= 400).then(|| body.unwrap_or_default());
            (Some(headers), body)
        } else {
            (None, None)
        };
        let response = response_log_fields(
            status,
            bytes,
            elapsed,
            headers,
            body,
            &self.options.skip_headers,
        );

        let mut fields = Map::new();
        fields.insert(HTTP_RESPONSE.into(), Value::Object(response));
        (status_level(status), message, fields)
    }
}

/// Shared handle to a request's [`LogEntry`], stored in request extensions.
#[derive(Debug, Clone)]
pub struct LogEntryHandle(Arc<Mutex<LogEntry>>);

impl LogEntryHandle {
    pub fn new(entry: LogEntry) -> Self {
        Self(Arc::new(Mutex::new(entry)))
    }

    /// Snapshot of the entry's current logger.
    pub fn logger(&self) -> Logger {
        self.lock().logger.clone()
    }

    pub fn set_field(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.lock().set_field(key, value);
    }

    pub fn set_fields(&self, fields: Map<String, Value>) {
        self.lock().set_fields(fields);
    }

    pub fn capture_panic(&self, value: &str, stack: &str) {
        self.lock().capture_panic(value, stack);
    }

    pub fn write(
        &self,
        status: i32,
        bytes: usize,
        headers: &HeaderMap,
        elapsed: Duration,
        body: Option<&[u8]>,
    ) {
        // The sink runs unlocked so it may call back into this handle
        let (logger, (level, message, fields)) = {
            let entry = self.lock();
            let record = entry.response_record(status, bytes, headers, elapsed, body);
            (entry.logger.clone(), record)
        };
        logger.log(level, message, fields);
    }

    /// Lock the entry. A poisoned lock is recovered: the entry holds no
    /// invariants that a panicking writer could break halfway.
    pub fn lock(&self) -> MutexGuard<'_, LogEntry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The request's logger, or a discarding logger when the request is not
/// being logged.
///
/// # Examples
///
/// ```rust
/// use axum::extract::Request;
///
/// async fn handler(request: Request) -> &'static str {
///     httplog::get_logger(request.extensions()).info("loading items");
///     "ok"
/// }
/// ```
pub fn get_logger(extensions: &Extensions) -> Logger {
    extensions
        .get::<LogEntryHandle>()
        .map(LogEntryHandle::logger)
        .unwrap_or_else(Logger::nop)
}

/// Add `key = value` to the request's log entry. No-op without an entry.
pub fn set_field(extensions: &Extensions, key: impl Into<String>, value: impl Into<Value>) {
    if let Some(entry) = extensions.get::<LogEntryHandle>() {
        entry.set_field(key, value);
    }
}

/// Add every field in `fields` to the request's log entry. No-op without an entry.
pub fn set_fields(extensions: &Extensions, fields: Map<String, Value>) {
    if let Some(entry) = extensions.get::<LogEntryHandle>() {
        entry.set_fields(fields);
    }
}

/// Extractor giving handlers access to the request's log entry.
///
/// Extraction never fails; outside the logging middleware every operation is
/// a no-op.
///
/// ```rust
/// use httplog::RequestLog;
///
/// async fn create_order(log: RequestLog) -> &'static str {
///     log.set_field("order_id", "ord_42");
///     log.logger().info("order accepted");
///     "created"
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Option<LogEntryHandle>);

impl RequestLog {
    pub fn logger(&self) -> Logger {
        self.0
            .as_ref()
            .map(LogEntryHandle::logger)
            .unwrap_or_else(Logger::nop)
    }

    pub fn set_field(&self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(entry) = &self.0 {
            entry.set_field(key, value);
        }
    }

    pub fn set_fields(&self, fields: Map<String, Value>) {
        if let Some(entry) = &self.0 {
            entry.set_fields(fields);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }
}

impl<S> FromRequestParts<S> for RequestLog
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<LogEntryHandle>().cloned()))
    }
}

/// Write a human-readable panic report to stderr.
pub(crate) fn print_pretty_stack(value: &str, stack: &str) {
    let mut out = std::io::stderr().lock();
    let _ = writeln!(out, "\n panic: {value}\n");
    for line in stack.lines() {
        let _ = writeln!(out, "   {}", line.trim_end());
    }
    let _ = writeln!(out);
}
