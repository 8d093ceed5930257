//! # httplog
//!
//! Structured request/response logging middleware for axum and tower.
//!
//! Every request gets one structured log record when its response has been
//! written, at a level derived from the status code:
//!
//! ```text
//! level=warn message="Response: 404 Client Error"
//!   http_request  = {request_url, request_method, request_path, remote_ip, proto, request_id, scheme, header}
//!   http_response = {status, bytes, elapsed, header, body}
//! ```
//!
//! ## Features
//!
//! - **Redaction**: `authorization`, `cookie` and `set-cookie` are always
//!   logged as `***`, plus any header named in [`Options::skip_headers`]
//! - **Bounded error capture**: the first 512 bytes of error response bodies
//!   are kept for the log, without touching what the client receives
//! - **Enrichment**: handlers add fields to the in-flight record through
//!   [`set_field`], [`set_fields`] or the [`RequestLog`] extractor
//! - **Panic annotation**: with [`RecoverLayer`] a panicking handler turns into
//!   a `500` whose record carries the panic value and stack
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use httplog::{init_tracing, new_logger, request_logger, Options, RequestLog, TracingSink};
//!
//! async fn hello(log: RequestLog) -> &'static str {
//!     log.set_field("greeting", "english");
//!     "Hello, World!"
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = Options {
//!         concise: true,
//!         skip_headers: vec!["x-api-key".into()],
//!         ..Options::default()
//!     };
//!     init_tracing(&options)?;
//!     let logger = new_logger("hello-service", &options, TracingSink)?;
//!
//!     let app = Router::new()
//!         .route("/hello", get(hello))
//!         .layer(request_logger(logger, options));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Layer order
//!
//! [`request_logger`] assembles request ids, logging and recovery in the
//! right order. When composing by hand, [`RecoverLayer`] must sit *inside*
//! [`RequestLoggerLayer`] so it can annotate the entry before the record is
//! emitted, and the request id layer must sit outside it:
//!
//! ```rust
//! use axum::{routing::get, Router};
//! use httplog::{Logger, MemorySink, Options, RecoverLayer, RequestLoggerLayer};
//! use tower::ServiceBuilder;
//! use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
//!
//! let logger = Logger::new(MemorySink::new());
//! let app: Router = Router::new().route("/", get(|| async { "ok" })).layer(
//!     ServiceBuilder::new()
//!         .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
//!         .layer(RequestLoggerLayer::new(logger, Options::default()))
//!         .layer(RecoverLayer::new()),
//! );
//! ```

use std::collections::BTreeMap;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{body::Body, extract::Request, response::Response};
use serde::Deserialize;
use tower::layer::util::{Identity, Stack};
use tower::{Layer, Service};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tracing::level_filters::LevelFilter;
use tracing::{debug, instrument};

pub mod types;
pub use types::{LogRecord, HTTP_REQUEST, HTTP_RESPONSE};

pub mod body_wrapper;
use body_wrapper::{create_recording_body, ResponseRecorder};
pub use body_wrapper::{ResponseTee, DEFAULT_TEE_CAPACITY};

pub mod entry;
pub use entry::{get_logger, set_field, set_fields, LogEntry, LogEntryHandle, RequestLog};

pub mod error;
pub use error::ConfigError;

pub mod fields;
pub use fields::TlsTerminated;

pub mod headers;
pub use headers::REDACTED;

pub mod logger;
pub use logger::{init_tracing, new_logger, LogSink, Logger, MemorySink, NopSink, TracingSink};

pub mod recover;
pub use recover::{RecoverLayer, RecoverService};

pub mod status;
pub use status::{status_label, status_level};

/// Configuration for the request logging middleware.
///
/// Deserializable so it can live in an application's config file; missing
/// keys take their defaults.
///
/// # Examples
///
/// ```rust
/// use httplog::Options;
///
/// let options: Options = serde_json::from_str(
///     r#"{"concise": true, "skip_headers": ["X-Api-Key"]}"#,
/// ).unwrap();
/// assert!(options.concise);
/// assert!(!options.json);
/// assert_eq!(options.response_body_limit, 512);
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Minimum level for loggers built by [`new_logger`] and [`init_tracing`]
    pub log_level: String,
    /// Log panic stacks raw inside the record instead of printing them to stderr
    pub json: bool,
    /// Log a `Request: <METHOD> <PATH>` line up front, and include response
    /// headers and error bodies in the final record
    pub concise: bool,
    /// Static fields added by [`new_logger`]
    pub tags: BTreeMap<String, String>,
    /// Extra header names to redact, case-insensitive
    pub skip_headers: Vec<String>,
    /// How many response body bytes to keep for error records
    pub response_body_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            concise: false,
            tags: BTreeMap::new(),
            skip_headers: Vec::new(),
            response_body_limit: DEFAULT_TEE_CAPACITY,
        }
    }
}

impl Options {
    /// Parse [`Options::log_level`].
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(self.log_level.trim())
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }
}

/// Tower layer for the request logging middleware.
///
/// # Examples
///
/// ```rust
/// use axum::{routing::get, Router};
/// use httplog::{Logger, Options, RequestLoggerLayer, TracingSink};
///
/// let layer = RequestLoggerLayer::new(Logger::new(TracingSink), Options::default());
/// let app: Router = Router::new()
///     .route("/hello", get(|| async { "Hello" }))
///     .layer(layer);
/// ```
#[derive(Clone, Debug)]
pub struct RequestLoggerLayer {
    logger: Logger,
    options: Arc<Options>,
}

impl RequestLoggerLayer {
    /// Create a layer logging through `logger`.
    ///
    /// `logger` is the base for every request's entry; fields it already
    /// carries (service name, tags) appear on every record.
    pub fn new(logger: Logger, options: Options) -> Self {
        Self {
            logger,
            options: Arc::new(options),
        }
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggerService {
            inner,
            logger: self.logger.clone(),
            options: self.options.clone(),
        }
    }
}

/// Tower service implementation for the request logging middleware.
///
/// For every request it creates a [`LogEntry`], makes it available to the
/// downstream service through the request extensions, and wraps the response
/// body so its size and, for errors, its first bytes are known once it has
/// been written. The final record is emitted exactly once per request, when
/// the wrapped body is dropped.
///
/// Users typically don't interact with this type directly - it's created by [`RequestLoggerLayer`].
#[derive(Clone, Debug)]
pub struct RequestLoggerService<S> {
    inner: S,
    logger: Logger,
    options: Arc<Options>,
}

impl<S> Service<Request> for RequestLoggerService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, mut request: Request) -> Self::Future {
        let entry = LogEntry::new(&self.logger, &request, self.options.clone());
        if self.options.concise {
            entry.logger().info(format!(
                "Request: {} {}",
                request.method(),
                fields::original_uri(&request).path()
            ));
        }

        let entry = LogEntryHandle::new(entry);
        request.extensions_mut().insert(entry.clone());
        let mut recorder = ResponseRecorder::new(entry, self.options.response_body_limit);

        debug!(method = %request.method(), uri = %request.uri(), "Dispatching request");
        let future = self.inner.call(request);

        Box::pin(async move {
            let mut response = future.await?;
            recorder.record_head(response.status(), response.headers());

            let body = std::mem::replace(response.body_mut(), Body::empty());
            *response.body_mut() = create_recording_body(body, recorder);
            Ok(response)
        })
    }
}

/// Layer stack returned by [`request_logger`].
pub type RequestLoggerStack =
    Stack<RecoverLayer, Stack<RequestLoggerLayer, Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>>>;

/// Complete logging chain: request ids, request logging and panic recovery.
///
/// Requests without an `x-request-id` header get a fresh UUID, which shows up
/// as `request_id` in the record.
pub fn request_logger(logger: Logger, options: Options) -> RequestLoggerStack {
    tower::ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RequestLoggerLayer::new(logger, options))
        .layer(RecoverLayer::new())
        .into_inner()
}
