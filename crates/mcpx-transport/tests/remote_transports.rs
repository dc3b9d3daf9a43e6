//! Remote transports against in-process stub servers

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use mcpx_core::{BackendError, BackendTransport, Implementation, InitializeRequest};
use mcpx_transport::streamable::SESSION_HEADER;
use mcpx_transport::{SseTransport, StreamableHttpTransport};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

// =============================================================================
// Stub backend
// =============================================================================

fn answer(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let result = match request["method"].as_str() {
        Some("initialize") => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "stub", "version": "1.0"}
        }),
        Some("tools/list") => json!({"tools": [{"name": "search"}, {"name": "fetch"}]}),
        Some("ping") => json!({}),
        _ => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            }))
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

const API_KEY_HEADER: &str = "x-api-key";

fn api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn with_api_key(key: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("X-Api-Key".to_string(), key.to_string())])
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone)]
struct SseStub {
    outbox: mpsc::UnboundedSender<Value>,
    inbox: Arc<Mutex<Option<mpsc::UnboundedReceiver<Value>>>>,
    /// `x-api-key` of every request, stream first
    api_keys: Arc<Mutex<Vec<Option<String>>>>,
    /// Swallow requests instead of answering them
    silent: bool,
}

async fn sse_stream(
    State(stub): State<SseStub>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    stub.api_keys.lock().await.push(api_key(&headers));
    let mut inbox = stub.inbox.lock().await.take().expect("single connection");
    let stream = async_stream::stream! {
        yield Ok(Event::default().event("endpoint").data("/message?sessionId=stub"));
        while let Some(message) = inbox.recv().await {
            yield Ok(Event::default().event("message").data(message.to_string()));
        }
    };
    Sse::new(stream)
}

async fn sse_message(
    State(stub): State<SseStub>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> StatusCode {
    stub.api_keys.lock().await.push(api_key(&headers));
    if stub.silent {
        return StatusCode::ACCEPTED;
    }
    if let Some(response) = answer(&request) {
        let _ = stub.outbox.send(response);
    }
    StatusCode::ACCEPTED
}

async fn sse_backend_with(silent: bool) -> (String, SseStub) {
    let (outbox, inbox) = mpsc::unbounded_channel();
    let stub = SseStub {
        outbox,
        inbox: Arc::new(Mutex::new(Some(inbox))),
        api_keys: Arc::new(Mutex::new(Vec::new())),
        silent,
    };
    let app = Router::new()
        .route("/sse", get(sse_stream))
        .route("/message", post(sse_message))
        .with_state(stub.clone());
    (serve(app).await, stub)
}

async fn sse_backend() -> String {
    sse_backend_with(false).await.0
}

#[derive(Clone, Default)]
struct StreamableStub {
    deleted: Arc<Mutex<Vec<String>>>,
    seen_sessions: Arc<Mutex<Vec<Option<String>>>>,
    api_keys: Arc<Mutex<Vec<Option<String>>>>,
}

async fn streamable_post(
    State(stub): State<StreamableStub>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    let session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    stub.seen_sessions.lock().await.push(session);
    stub.api_keys.lock().await.push(api_key(&headers));

    let Some(response) = answer(&request) else {
        return StatusCode::ACCEPTED.into_response();
    };

    match request["method"].as_str() {
        Some("initialize") => {
            ([(SESSION_HEADER, "session-1")], Json(response)).into_response()
        }
        // Listing answers arrive as a one-event SSE body
        Some("tools/list") => (
            [("content-type", "text/event-stream")],
            format!("event: message\ndata: {}\n\n", response),
        )
            .into_response(),
        _ => Json(response).into_response(),
    }
}

async fn streamable_delete(State(stub): State<StreamableStub>, headers: HeaderMap) -> StatusCode {
    stub.api_keys.lock().await.push(api_key(&headers));
    if let Some(session) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        stub.deleted.lock().await.push(session.to_string());
    }
    StatusCode::OK
}

async fn streamable_stall() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(30)).await;
    StatusCode::OK
}

fn client_info() -> InitializeRequest {
    InitializeRequest::new(Implementation::new("mcpx", "test"))
}

// =============================================================================
// SSE
// =============================================================================

#[tokio::test]
async fn test_sse_handshake_and_listing() {
    let base = sse_backend().await;
    let transport = SseTransport::new(
        "stub",
        &format!("{}/sse", base),
        &BTreeMap::new(),
        Duration::from_secs(5),
    )
    .unwrap();

    transport.start().await.unwrap();
    assert_eq!(
        transport.endpoint().unwrap().as_str(),
        format!("{}/message?sessionId=stub", base)
    );

    let init = transport.initialize(client_info()).await.unwrap();
    assert_eq!(init.server_info.name, "stub");

    let page = transport.list_tools(None).await.unwrap();
    let names: Vec<_> = page.items.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["search", "fetch"]);
    assert_eq!(page.next_cursor, None);

    transport.ping().await.unwrap();
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_sse_sends_configured_headers() {
    let (base, stub) = sse_backend_with(false).await;
    let transport = SseTransport::new(
        "stub",
        &format!("{}/sse", base),
        &with_api_key("k-123"),
        Duration::from_secs(5),
    )
    .unwrap();

    transport.start().await.unwrap();
    transport.initialize(client_info()).await.unwrap();
    transport.ping().await.unwrap();
    transport.close().await.unwrap();

    // Event stream, initialize, initialized notification, ping
    let keys = stub.api_keys.lock().await.clone();
    assert_eq!(keys.len(), 4);
    assert!(keys.iter().all(|k| k.as_deref() == Some("k-123")), "{:?}", keys);
}

#[tokio::test]
async fn test_sse_unanswered_request_times_out() {
    let (base, _stub) = sse_backend_with(true).await;
    let transport = SseTransport::new(
        "stub",
        &format!("{}/sse", base),
        &BTreeMap::new(),
        Duration::from_millis(200),
    )
    .unwrap();
    transport.start().await.unwrap();

    let started = std::time::Instant::now();
    let err = transport.ping().await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_sse_request_before_start_fails() {
    let transport = SseTransport::new(
        "stub",
        "http://127.0.0.1:9/sse",
        &BTreeMap::new(),
        Duration::from_secs(1),
    )
    .unwrap();
    assert!(transport.ping().await.is_err());
}

#[tokio::test]
async fn test_sse_unreachable_backend() {
    let transport = SseTransport::new(
        "down",
        "http://127.0.0.1:9/sse",
        &BTreeMap::new(),
        Duration::from_secs(1),
    )
    .unwrap();
    assert!(transport.start().await.is_err());
}

// =============================================================================
// Streamable HTTP
// =============================================================================

#[tokio::test]
async fn test_streamable_session_lifecycle() {
    let stub = StreamableStub::default();
    let app = Router::new()
        .route("/mcp", post(streamable_post).delete(streamable_delete))
        .with_state(stub.clone());
    let base = serve(app).await;

    let transport = StreamableHttpTransport::new(
        "stub",
        &format!("{}/mcp", base),
        &BTreeMap::new(),
        Duration::from_secs(5),
    )
    .unwrap();
    transport.start().await.unwrap();

    let init = transport.initialize(client_info()).await.unwrap();
    assert_eq!(init.protocol_version, "2024-11-05");
    assert_eq!(transport.session_id().as_deref(), Some("session-1"));

    let page = transport.list_tools(None).await.unwrap();
    assert_eq!(page.items.len(), 2);

    // initialize carried no session; the notification and listing did
    let seen = stub.seen_sessions.lock().await.clone();
    assert_eq!(seen[0], None);
    assert!(seen[1..].iter().all(|s| s.as_deref() == Some("session-1")));

    transport.close().await.unwrap();
    assert_eq!(stub.deleted.lock().await.clone(), vec!["session-1".to_string()]);

    // Second close has no session left to end
    transport.close().await.unwrap();
    assert_eq!(stub.deleted.lock().await.len(), 1);
}

#[tokio::test]
async fn test_streamable_rpc_error_passes_through() {
    let app = Router::new()
        .route("/mcp", post(streamable_post))
        .with_state(StreamableStub::default());
    let base = serve(app).await;

    let transport = StreamableHttpTransport::new(
        "stub",
        &format!("{}/mcp", base),
        &BTreeMap::new(),
        Duration::from_secs(5),
    )
    .unwrap();

    let err = transport.call_tool(json!({"name": "x"})).await.unwrap_err();
    assert_eq!(err.rpc_code(), -32601);
}

#[tokio::test]
async fn test_streamable_sends_configured_headers() {
    let stub = StreamableStub::default();
    let app = Router::new()
        .route("/mcp", post(streamable_post).delete(streamable_delete))
        .with_state(stub.clone());
    let base = serve(app).await;

    let transport = StreamableHttpTransport::new(
        "stub",
        &format!("{}/mcp", base),
        &with_api_key("k-456"),
        Duration::from_secs(5),
    )
    .unwrap();
    transport.initialize(client_info()).await.unwrap();
    transport.list_tools(None).await.unwrap();
    transport.close().await.unwrap();

    // initialize, initialized notification, tools/list, session delete
    let keys = stub.api_keys.lock().await.clone();
    assert_eq!(keys.len(), 4);
    assert!(keys.iter().all(|k| k.as_deref() == Some("k-456")), "{:?}", keys);
}

#[tokio::test]
async fn test_streamable_stalled_server_times_out() {
    let app = Router::new().route("/mcp", post(streamable_stall));
    let base = serve(app).await;

    let transport = StreamableHttpTransport::new(
        "stub",
        &format!("{}/mcp", base),
        &BTreeMap::new(),
        Duration::from_millis(200),
    )
    .unwrap();

    let started = std::time::Instant::now();
    let err = transport.ping().await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
}
