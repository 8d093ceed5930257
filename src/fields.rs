//! Builders for the `http_request` and `http_response` field groups.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, OriginalUri, Request};
use axum::http::{header, HeaderMap, Uri};
use serde_json::{Map, Value};
use tower_http::request_id::RequestId;

use crate::headers::header_log_field;

/// Marker extension for requests that arrived over TLS.
///
/// Insert it from the TLS acceptor (or a layer that knows about it) so the
/// logged `scheme` is `https`. Requests whose URI carries an `https` scheme,
/// as HTTP/2 requests do, are detected without it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsTerminated;

/// The URI the client sent, before any router nesting stripped a prefix.
pub(crate) fn original_uri(request: &Request) -> &Uri {
    request
        .extensions()
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or_else(|| request.uri())
}

/// Build the request field group for `request`.
///
/// Returns the inner mapping; callers nest it under
/// [`HTTP_REQUEST`](crate::types::HTTP_REQUEST).
pub fn request_log_fields(request: &Request, skip_headers: &[String]) -> Map<String, Value> {
    let uri = original_uri(request);

    let scheme = if is_tls(request) { "https" } else { "http" };
    let host = host(request.headers(), uri);
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let remote_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let mut fields = Map::new();
    fields.insert(
        "request_url".into(),
        Value::String(format!("{scheme}://{host}{target}")),
    );
    fields.insert(
        "request_method".into(),
        Value::String(request.method().to_string()),
    );
    fields.insert("request_path".into(), Value::String(uri.path().to_string()));
    fields.insert("remote_ip".into(), Value::String(remote_ip));
    fields.insert(
        "proto".into(),
        Value::String(format!("{:?}", request.version())),
    );
    if let Some(id) = request_id(request) {
        fields.insert("request_id".into(), Value::String(id));
    }
    fields.insert("scheme".into(), Value::String(scheme.into()));

    if !request.headers().is_empty() {
        fields.insert(
            "header".into(),
            Value::Object(header_log_field(request.headers(), skip_headers)),
        );
    }
    fields
}

/// Build the response field group.
///
/// `headers` and `body` are only included when given; an empty header map is
/// left out entirely. `elapsed` is logged as fractional milliseconds.
pub fn response_log_fields(
    status: i32,
    bytes: usize,
    elapsed: Duration,
    headers: Option<&HeaderMap>,
    body: Option<&[u8]>,
    skip_headers: &[String],
) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("status".into(), Value::from(status));
    fields.insert("bytes".into(), Value::from(bytes));
    fields.insert("elapsed".into(), Value::from(elapsed_millis(elapsed)));

    if let Some(body) = body {
        fields.insert(
            "body".into(),
            Value::String(String::from_utf8_lossy(body).into_owned()),
        );
    }
    if let Some(headers) = headers.filter(|h| !h.is_empty()) {
        fields.insert(
            "header".into(),
            Value::Object(header_log_field(headers, skip_headers)),
        );
    }
    fields
}

fn elapsed_millis(elapsed: Duration) -> f64 {
    elapsed.as_nanos() as f64 / 1_000_000.0
}

fn is_tls(request: &Request) -> bool {
    request.extensions().get::<TlsTerminated>().is_some()
        || request.uri().scheme_str() == Some("https")
}

fn host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

fn request_id(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}
