//! HTTP and WebSocket transport for the playground.
//!
//! ## Endpoints
//!
//! - `POST /run` - compile and run the request body
//! - `POST /format` - format the request body
//! - `GET /ws` - language server session over a WebSocket
//! - `GET /health` - Health check

use crate::error::ApiError;
use axum::{
    extract::{
        ws::{
            rejection::WebSocketUpgradeRejection, CloseFrame, Message as WsMessage, WebSocket,
            WebSocketUpgrade,
        },
        DefaultBodyLimit, State,
    },
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use cjbox_core::{ClientFrame, CloseReason, Playground};
use cjbox_protocol::{FormatResult, RunResult};
use futures::{future, SinkExt, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router for the playground.
///
/// The returned router can be served directly with axum or composed
/// into a larger application.
pub fn build_router(playground: Playground, max_body_bytes: usize) -> Router {
    tracing::debug!(max_body_bytes, "Building HTTP router");

    Router::new()
        // One-shot jobs
        .route("/run", post(run_handler))
        .route("/format", post(format_handler))
        .route("/ws", get(ws_handler))
        // Health check
        .route("/health", get(health_handler))
        .with_state(playground)
        // Add middleware
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

fn source_from(body: Bytes) -> Result<String, ApiError> {
    String::from_utf8(body.to_vec()).map_err(|_| ApiError::InvalidUtf8)
}

async fn run_handler(
    State(playground): State<Playground>,
    body: Bytes,
) -> Result<Json<RunResult>, ApiError> {
    let source = source_from(body)?;
    tracing::debug!(source_len = source.len(), "Run request");
    Ok(Json(playground.run(source).await?))
}

async fn format_handler(
    State(playground): State<Playground>,
    body: Bytes,
) -> Result<Json<FormatResult>, ApiError> {
    let source = source_from(body)?;
    tracing::debug!(source_len = source.len(), "Format request");
    Ok(Json(playground.format(source).await?))
}

/// Admission runs before the handshake so a loaded host answers 503
/// instead of accepting a socket it cannot serve.
async fn ws_handler(
    State(playground): State<Playground>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    playground.admit().await?;
    // Not a WebSocket request: hand axum's own 4xx back
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    Ok(upgrade.on_upgrade(move |socket| serve_socket(playground, socket)))
}

async fn serve_socket(playground: Playground, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let stream = stream.map(|message| message.map(client_frame));
    let sink = sink.with(|frame: ClientFrame| future::ready(Ok::<_, axum::Error>(ws_message(frame))));

    match playground.serve_lsp(stream, sink).await {
        Ok(summary) => tracing::info!(
            session = %summary.session,
            messages_in = summary.messages_in,
            messages_out = summary.messages_out,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Language server session closed"
        ),
        Err(e) => tracing::warn!(error = %e, "Language server session failed"),
    }
}

fn client_frame(message: WsMessage) -> ClientFrame {
    match message {
        WsMessage::Text(text) => ClientFrame::Text(text),
        WsMessage::Binary(data) => ClientFrame::Binary(Bytes::from(data)),
        WsMessage::Ping(data) => ClientFrame::Ping(Bytes::from(data)),
        WsMessage::Pong(data) => ClientFrame::Pong(Bytes::from(data)),
        WsMessage::Close(frame) => ClientFrame::Close(frame.map(|frame| CloseReason {
            code: frame.code,
            reason: frame.reason.into_owned(),
        })),
    }
}

fn ws_message(frame: ClientFrame) -> WsMessage {
    match frame {
        ClientFrame::Text(text) => WsMessage::Text(text),
        ClientFrame::Binary(data) => WsMessage::Binary(data.to_vec()),
        ClientFrame::Ping(data) => WsMessage::Ping(data.to_vec()),
        ClientFrame::Pong(data) => WsMessage::Pong(data.to_vec()),
        ClientFrame::Close(reason) => WsMessage::Close(reason.map(|reason| CloseFrame {
            code: reason.code,
            reason: reason.reason.into(),
        })),
    }
}

/// Health check endpoint.
async fn health_handler(State(playground): State<Playground>) -> impl IntoResponse {
    tracing::trace!("Health check request");
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cjbox-server",
        "stats": playground.stats().snapshot(),
    }))
}

/// Start the HTTP server.
///
/// This function runs until the server is shut down via the provided
/// shutdown signal.
pub async fn serve(
    router: Router,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use cjbox_core::{AdmissionGate, SessionConfig, StaticProbe};
    use cjbox_engine::{FailAt, LifecycleManager, MockEngine, MockProcess, SandboxPolicy};
    use cjbox_protocol::{JobRequest, JobResult};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tower::ServiceExt;

    const MIB: u64 = 1024 * 1024;

    /// Agent double answering run and format jobs.
    async fn fake_agent(process: MockProcess) -> i64 {
        let (stdin, output) = process.split();
        let mut lines = BufReader::new(stdin).lines();
        let Ok(Some(line)) = lines.next_line().await else {
            return 2;
        };
        let result = match serde_json::from_str::<JobRequest>(&line) {
            Ok(JobRequest::Run { source }) => JobResult::Run(RunResult {
                compiler_output: String::new(),
                compiler_code: 0,
                bin_output: Some(format!("{} bytes\n", source.len())),
                bin_code: Some(0),
            }),
            Ok(JobRequest::Format { source }) => JobResult::Format(FormatResult {
                formatted: source.trim().to_string(),
                formatter_output: String::new(),
                formatter_code: 0,
            }),
            _ => return 2,
        };
        let mut encoded = serde_json::to_string(&result).unwrap();
        encoded.push('\n');
        output.stdout(encoded);
        0
    }

    fn router(engine: &MockEngine, available: u64) -> Router {
        let lifecycle = LifecycleManager::new(Arc::new(engine.clone()), SandboxPolicy::default());
        let gate = AdmissionGate::new(Arc::new(StaticProbe::new(available)), 512 * MIB);
        let playground = Playground::new(lifecycle, gate, SessionConfig::default());
        build_router(playground, 1024)
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(body.into())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_run_returns_result_json() {
        let engine = MockEngine::new(fake_agent);
        let response = router(&engine, 4096 * MIB)
            .oneshot(post("/run", "main() {}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["compiler_code"], 0);
        assert_eq!(json["bin_output"], "9 bytes\n");
        assert!(json.get("kind").is_none());
        assert_eq!(engine.container_count(), 0);
    }

    #[tokio::test]
    async fn test_format_returns_result_json() {
        let engine = MockEngine::new(fake_agent);
        let response = router(&engine, 4096 * MIB)
            .oneshot(post("/format", "  main() {}\n"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["formatted"], "main() {}");
        assert_eq!(json["formatter_code"], 0);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_bad_request() {
        let engine = MockEngine::new(fake_agent);
        let response = router(&engine, 4096 * MIB)
            .oneshot(post("/run", vec![0xff, 0xfe, 0x00]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(engine.created_specs().is_empty());
    }

    #[tokio::test]
    async fn test_low_memory_is_service_unavailable() {
        let engine = MockEngine::new(fake_agent);
        let response = router(&engine, 100 * MIB)
            .oneshot(post("/run", "main() {}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_text(response).await.contains("admission rejected"));
        assert!(engine.created_specs().is_empty());
    }

    #[tokio::test]
    async fn test_orchestration_failure_is_server_error() {
        let engine = MockEngine::new(fake_agent).failing_at(FailAt::Start);
        let response = router(&engine, 4096 * MIB)
            .oneshot(post("/run", "main() {}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(engine.container_count(), 0);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let engine = MockEngine::new(fake_agent);
        let response = router(&engine, 4096 * MIB)
            .oneshot(post("/run", "x".repeat(4096)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(engine.created_specs().is_empty());
    }

    #[tokio::test]
    async fn test_ws_rejected_before_upgrade() {
        let engine = MockEngine::new(fake_agent);
        let request = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let response = router(&engine, 100 * MIB).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(engine.created_specs().is_empty());
    }

    #[tokio::test]
    async fn test_ws_without_upgrade_headers() {
        let engine = MockEngine::new(fake_agent);
        let request = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let response = router(&engine, 4096 * MIB).oneshot(request).await.unwrap();

        assert!(response.status().is_client_error());
        assert!(engine.created_specs().is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_stats() {
        let engine = MockEngine::new(fake_agent);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router(&engine, 4096 * MIB).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["stats"]["active_sessions"], 0);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let engine = MockEngine::new(fake_agent);
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "https://example.org")
            .body(Body::empty())
            .unwrap();
        let response = router(&engine, 4096 * MIB).oneshot(request).await.unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[test]
    fn test_frame_mapping() {
        assert_eq!(
            client_frame(WsMessage::Text("{}".into())),
            ClientFrame::Text("{}".into())
        );
        assert_eq!(
            client_frame(WsMessage::Binary(vec![1, 2])),
            ClientFrame::Binary(Bytes::from_static(&[1, 2]))
        );
        assert_eq!(client_frame(WsMessage::Close(None)), ClientFrame::Close(None));
        assert!(matches!(ws_message(ClientFrame::Close(None)), WsMessage::Close(None)));
        let failed = ClientFrame::Close(Some(CloseReason {
            code: cjbox_core::CLOSE_INTERNAL_ERROR,
            reason: "sandbox unavailable".into(),
        }));
        match ws_message(failed) {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(frame.code, 1011);
                assert_eq!(frame.reason, "sandbox unavailable");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(matches!(
            ws_message(ClientFrame::Ping(Bytes::new())),
            WsMessage::Ping(data) if data.is_empty()
        ));
    }
}
