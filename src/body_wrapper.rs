//! Response body tracking and bounded capture.
//!
//! This module wraps an outgoing response body so every data frame is counted
//! and mirrored into a fixed-size [`ResponseTee`] as it streams to the client.
//! Frames, size hints and end-of-stream signals pass through untouched, so
//! `Content-Length` and trailers survive the wrapper.
//! A [`ResponseRecorder`] owns that state and emits the request's log record
//! exactly once, when it is dropped.

use std::fmt;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes, HttpBody};
use axum::http::{HeaderMap, StatusCode};
use axum::BoxError;
use http_body::{Frame, SizeHint};
use tracing::debug;

use crate::entry::LogEntryHandle;

/// Default number of response body bytes kept for error logging
pub const DEFAULT_TEE_CAPACITY: usize = 512;

/// Byte buffer that mirrors at most `capacity` bytes.
///
/// Writes never fail and never short-write: bytes past the capacity are
/// accepted and dropped, so the tee cannot push back on the real response.
#[derive(Debug, Clone)]
pub struct ResponseTee {
    buf: Vec<u8>,
    capacity: usize,
}

impl ResponseTee {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity.min(DEFAULT_TEE_CAPACITY)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.capacity
    }

    /// Captured bytes, without consuming them.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for ResponseTee {
    fn default() -> Self {
        Self::new(DEFAULT_TEE_CAPACITY)
    }
}

impl Write for ResponseTee {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.capacity.saturating_sub(self.buf.len());
        let take = room.min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for ResponseTee {
    /// Drains captured bytes from the front of the buffer.
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.drain(..n);
        Ok(n)
    }
}

/// Response tracking state for one request.
///
/// Created before the downstream service is called, so the start time covers
/// the whole dispatch. The record is emitted on drop: after the body has been
/// fully streamed, when the connection is abandoned, or, if no response was
/// ever produced, with status 0.
pub(crate) struct ResponseRecorder {
    entry: Option<LogEntryHandle>,
    status: i32,
    headers: HeaderMap,
    bytes_written: usize,
    tee: ResponseTee,
    started: Instant,
}

impl ResponseRecorder {
    pub(crate) fn new(entry: LogEntryHandle, tee_capacity: usize) -> Self {
        Self {
            entry: Some(entry),
            status: 0,
            headers: HeaderMap::new(),
            bytes_written: 0,
            tee: ResponseTee::new(tee_capacity),
            started: Instant::now(),
        }
    }

    pub(crate) fn record_head(&mut self, status: StatusCode, headers: &HeaderMap) {
        self.status = i32::from(status.as_u16());
        self.headers = headers.clone();
    }

    fn observe(&mut self, chunk: &Bytes) {
        self.bytes_written += chunk.len();
        // Infallible, see ResponseTee
        let _ = self.tee.write(chunk);
    }

    fn finish(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        let elapsed = self.started.elapsed();

        let body = if self.status >= 400 {
            let mut body = Vec::with_capacity(self.tee.len());
            if let Err(e) = self.tee.read_to_end(&mut body) {
                debug!(error = %e, "Failed to drain response tee");
                body.clear();
            }
            Some(body)
        } else {
            None
        };

        entry.write(
            self.status,
            self.bytes_written,
            &self.headers,
            elapsed,
            body.as_deref(),
        );
    }
}

impl Drop for ResponseRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Response body that reports its data frames to a [`ResponseRecorder`].
pub(crate) struct RecordingBody<B> {
    inner: B,
    recorder: ResponseRecorder,
}

impl<B> HttpBody for RecordingBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.recorder.observe(data);
                }
            }
            Poll::Ready(Some(Err(e))) => debug!(error = %e, "Response body stream error"),
            Poll::Ready(None) | Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Wrap `body` so its data frames flow through `recorder` on their way out.
///
/// The recorder lives inside the returned body and finishes when the body is
/// dropped.
pub(crate) fn create_recording_body<B>(body: B, recorder: ResponseRecorder) -> Body
where
    B: HttpBody<Data = Bytes> + Unpin + Send + 'static,
    B::Error: Into<BoxError> + fmt::Display,
{
    Body::new(RecordingBody {
        inner: body,
        recorder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogEntry;
    use crate::logger::{Logger, MemorySink};
    use crate::Options;
    use axum::http::{header, HeaderValue};
    use futures::stream;
    use http_body_util::{BodyExt, StreamBody};
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::Arc;

    fn handle(concise: bool) -> (LogEntryHandle, MemorySink) {
        let sink = MemorySink::new();
        let request = axum::http::Request::builder()
            .uri("/items")
            .body(Body::empty())
            .unwrap();
        let options = Options {
            concise,
            ..Options::default()
        };
        let entry = LogEntry::new(&Logger::new(sink.clone()), &request, Arc::new(options));
        (LogEntryHandle::new(entry), sink)
    }

    #[test]
    fn test_tee_fill_then_stop() {
        let mut tee = ResponseTee::new(8);
        assert_eq!(tee.write(b"hello").unwrap(), 5);
        assert_eq!(tee.write(b" world").unwrap(), 6);
        assert!(tee.is_full());
        assert_eq!(tee.as_bytes(), b"hello wo");
        assert_eq!(tee.write(b"more").unwrap(), 4);
        assert_eq!(tee.len(), 8);
    }

    #[test]
    fn test_tee_drain() {
        let mut tee = ResponseTee::default();
        assert_eq!(tee.capacity(), DEFAULT_TEE_CAPACITY);
        tee.write_all(b"abc").unwrap();

        let mut out = Vec::new();
        tee.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        assert!(tee.is_empty());
    }

    #[test]
    fn test_zero_capacity_tee() {
        let mut tee = ResponseTee::new(0);
        assert_eq!(tee.write(b"abc").unwrap(), 3);
        assert!(tee.is_empty());
    }

    #[test]
    fn test_recorder_emits_once_on_drop() {
        let (entry, sink) = handle(false);
        let mut recorder = ResponseRecorder::new(entry, 16);
        recorder.record_head(StatusCode::OK, &HeaderMap::new());
        recorder.observe(&Bytes::from_static(b"0123456789"));
        recorder.finish();
        drop(recorder);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "Response: 200 OK");
        assert_eq!(records[0].field("http_response.bytes"), Some(&json!(10)));
    }

    #[test]
    fn test_recorder_without_response_logs_status_zero() {
        let (entry, sink) = handle(false);
        drop(ResponseRecorder::new(entry, 16));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "Response: 0 Unknown");
        assert_eq!(records[0].level, tracing::Level::WARN);
    }

    #[tokio::test]
    async fn test_recording_body_truncates_error_capture() {
        let (entry, sink) = handle(true);
        let mut recorder = ResponseRecorder::new(entry, 4);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        recorder.record_head(StatusCode::BAD_GATEWAY, &headers);

        let chunks = stream::iter(vec![
            Ok::<_, Infallible>(Bytes::from("up")),
            Ok(Bytes::from("stream ")),
            Ok(Bytes::from("failed")),
        ]);
        let body = create_recording_body(Body::from_stream(chunks), recorder);

        // Full content reaches the client
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, "upstream failed");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.message, "Response: 502 Server Error");
        assert_eq!(record.field("http_response.bytes"), Some(&json!(15)));
        assert_eq!(record.field("http_response.body"), Some(&json!("upst")));
        assert_eq!(
            record.field("http_response.header"),
            Some(&json!({"content-type": "text/plain"}))
        );
    }

    #[tokio::test]
    async fn test_recording_body_keeps_framing() {
        let (entry, sink) = handle(false);
        let mut recorder = ResponseRecorder::new(entry, 16);
        recorder.record_head(StatusCode::OK, &HeaderMap::new());

        let body = create_recording_body(Body::from("0123456789"), recorder);
        assert_eq!(body.size_hint().exact(), Some(10));
        assert!(!body.is_end_stream());

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, "0123456789");
        assert_eq!(sink.records()[0].field("http_response.bytes"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn test_recording_body_forwards_trailers() {
        let (entry, sink) = handle(false);
        let mut recorder = ResponseRecorder::new(entry, 16);
        recorder.record_head(StatusCode::OK, &HeaderMap::new());

        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", "0".parse().unwrap());
        let frames = stream::iter(vec![
            Ok::<_, Infallible>(Frame::data(Bytes::from("payload"))),
            Ok(Frame::trailers(trailers)),
        ]);
        let body = create_recording_body(Body::new(StreamBody::new(frames)), recorder);

        let collected = body.collect().await.unwrap();
        assert_eq!(
            collected.trailers().and_then(|t| t.get("grpc-status")),
            Some(&HeaderValue::from_static("0"))
        );
        assert_eq!(collected.to_bytes(), "payload");
        assert_eq!(sink.records()[0].field("http_response.bytes"), Some(&json!(7)));
    }
}
