use axum::{
    body::Body,
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use httplog::{init_tracing, new_logger, request_logger, Options, RequestLog, TracingSink};
use serde_json::json;
use std::{net::SocketAddr, time::Duration};
use tokio::{net::TcpListener, time::sleep};
use tracing::info;

// Demo handlers
async fn hello_handler() -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    "Hello, World!"
}

async fn user_handler(Path(id): Path<u64>, log: RequestLog) -> impl IntoResponse {
    log.set_field("user_id", id);
    if id == 0 {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "no such user"}))).into_response();
    }
    log.logger().info("user loaded");
    Json(json!({"id": id, "name": "Ada"})).into_response()
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

async fn large_error_handler() -> impl IntoResponse {
    // Only the first 512 bytes end up in the log
    (StatusCode::BAD_GATEWAY, "x".repeat(2048))
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            sleep(Duration::from_millis(200)).await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap_or_default()
}

async fn panic_handler() -> &'static str {
    panic!("divide by zero");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options {
        concise: true,
        skip_headers: vec!["x-api-key".into()],
        ..Options::default()
    };
    init_tracing(&options)?;
    let logger = new_logger("httplog-demo", &options, TracingSink)?;

    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/users/{id}", get(user_handler))
        .route("/echo", post(echo_handler))
        .route("/large-error", get(large_error_handler))
        .route("/streaming", get(streaming_handler))
        .route("/panic", get(panic_handler))
        .layer(request_logger(logger, options));

    info!("Demo server endpoints:");
    info!("  GET  /hello        - Simple greeting");
    info!("  GET  /users/:id    - Enriched record (id 0 is a 404)");
    info!("  POST /echo         - Echo request body");
    info!("  GET  /large-error  - 502 with a body larger than the capture window");
    info!("  GET  /streaming    - Streaming response");
    info!("  GET  /panic        - Panicking handler, logged and turned into a 500");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello");
    info!("  curl -H 'Authorization: Bearer secret' http://localhost:3000/users/7");
    info!("  curl http://localhost:3000/users/0");
    info!("  curl -X POST -d 'Hello from client' http://localhost:3000/echo");
    info!("  curl http://localhost:3000/panic");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
