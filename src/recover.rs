//! Panic recovery for the logging chain.
//!
//! [`RecoverLayer`] sits inside [`RequestLoggerLayer`](crate::RequestLoggerLayer).
//! When the downstream service panics it records the panic on the request's
//! log entry, stops the unwind, and answers `500 Internal Server Error`, so
//! the final response record carries the panic message.

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use tower::{Layer, Service};
use tracing::debug;

use crate::entry::{print_pretty_stack, LogEntryHandle};

/// Tower layer that turns downstream panics into logged 500 responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverLayer;

impl RecoverLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RecoverLayer {
    type Service = RecoverService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoverService { inner }
    }
}

/// Service created by [`RecoverLayer`].
#[derive(Debug, Clone)]
pub struct RecoverService<S> {
    inner: S,
}

impl<S> Service<Request> for RecoverService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let entry = request.extensions().get::<LogEntryHandle>().cloned();

        let inner = &mut self.inner;
        let future = match panic::catch_unwind(AssertUnwindSafe(|| inner.call(request))) {
            Ok(future) => future,
            Err(payload) => {
                let response = recovered(entry.as_ref(), payload);
                return Box::pin(async move { Ok(response) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Ok(recovered(entry.as_ref(), payload)),
            }
        })
    }
}

fn recovered(entry: Option<&LogEntryHandle>, payload: Box<dyn Any + Send>) -> Response {
    let message = panic_message(payload.as_ref());
    let stack = Backtrace::force_capture().to_string();
    debug!(panic = %message, "Recovered from handler panic");

    match entry {
        Some(entry) => entry.capture_panic(&message, &stack),
        None => print_pretty_stack(&message, &stack),
    }
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Render a panic payload the way `panic!` formatted it.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::convert::Infallible;
    use tower::ServiceExt;

    #[test]
    fn test_panic_message_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("divide by zero");
        assert_eq!(panic_message(payload.as_ref()), "divide by zero");

        let payload: Box<dyn Any + Send> = Box::new(format!("index {} out of range", 7));
        assert_eq!(panic_message(payload.as_ref()), "index 7 out of range");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_async_panic_becomes_500() {
        let svc = RecoverLayer::new().layer(tower::service_fn(|_req: Request| async {
            if true {
                panic!("async boom");
            }
            Ok::<_, Infallible>(Response::new(Body::empty()))
        }));

        let request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = svc.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_passthrough() {
        let svc = RecoverLayer::new().layer(tower::service_fn(|_req: Request| async {
            Ok::<_, Infallible>(StatusCode::ACCEPTED.into_response())
        }));

        let request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = svc.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
