//! Integration tests for the chat relay.
//!
//! Exercises the full HTTP surface: access guard, blocking and streaming
//! relays, session reset, and the info endpoints.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use relay_common::config::Config;
use relay_gateway::{
    build_router, AppState, ChatRequest, ChatResponse, FragmentStream, Message, OpenAIProvider,
    Provider, ProviderError, TokenUsage,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

/// Upstream stand-in that records every request it receives.
struct StubProvider {
    reply: Result<Vec<&'static str>, u16>,
    delay: Duration,
    seen: Mutex<Vec<ChatRequest>>,
}

impl StubProvider {
    fn replying(fragments: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(fragments),
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(status),
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn slow(fragments: Vec<&'static str>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(fragments),
            delay,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().unwrap().clone()
    }

    async fn respond(&self, request: &ChatRequest) -> Result<Vec<&'static str>, ProviderError> {
        self.seen.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(|status| ProviderError {
            provider: "stub".into(),
            model: request.model.clone(),
            message: "upstream said: key sk-live-123 is over quota".into(),
            status_code: Some(status),
        })
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let fragments = self.respond(&request).await?;
        Ok(ChatResponse {
            provider: "stub".into(),
            model: request.model,
            content: fragments.concat(),
            usage: TokenUsage::default(),
            finish_reason: Some("stop".into()),
            latency_ms: 1,
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream, ProviderError> {
        let fragments = self.respond(&request).await?;
        Ok(futures_util::stream::iter(fragments.into_iter().map(|f| Ok(f.to_string()))).boxed())
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    _ui_dir: TempDir,
}

fn test_config(ui_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.upstream.api_key = Some("sk-test-0123456789".into());
    config.session.system_prompt = Some("You are a helpful assistant.".into());
    config.ui.static_dir = ui_dir.path().to_path_buf();
    config
}

fn create_test_app(provider: Arc<dyn Provider>, secret: Option<&str>) -> TestApp {
    let ui_dir = TempDir::new().unwrap();
    std::fs::write(ui_dir.path().join("chat.html"), "<html>relay chat</html>").unwrap();

    let mut config = test_config(&ui_dir);
    config.auth.shared_secret = secret.map(String::from);

    let state = AppState::from_config(&config, provider);
    let router = build_router(state.clone(), &config).unwrap();
    TestApp {
        router,
        state,
        _ui_dir: ui_dir,
    }
}

fn json_request(method: Method, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
        request = request.header("x-relay-token", t);
    }
    request
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Send a request and decode the JSON response.
async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Info Endpoints
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app(StubProvider::replying(vec!["x"]), None);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send_json(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    let time = json["time"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok());
}

#[tokio::test]
async fn test_env_check_reports_length_only() {
    let app = create_test_app(StubProvider::replying(vec!["x"]), Some("s3cret"));

    let request = Request::builder()
        .uri("/env-check")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(!text.contains("sk-test"));

    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json, json!({"hasKey": true, "length": 18}));
}

#[tokio::test]
async fn test_root_serves_chat_ui() {
    let app = create_test_app(StubProvider::replying(vec!["x"]), None);

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"<html>relay chat</html>");
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_round_trip() {
    let provider = StubProvider::replying(vec!["Hi there"]);
    let app = create_test_app(provider.clone(), None);

    let (status, json) = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/chat",
            json!({"sessionId": "a", "userMessage": "hello"}),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"reply": "Hi there"}));

    let sent = provider.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].model, "gpt-5");
    assert_eq!(
        sent[0].messages,
        vec![
            Message::system("You are a helpful assistant."),
            Message::user("hello"),
        ]
    );

    assert_eq!(
        app.state.store().snapshot("a").await.unwrap(),
        vec![
            Message::system("You are a helpful assistant."),
            Message::user("hello"),
            Message::assistant("Hi there"),
        ]
    );
}

#[tokio::test]
async fn test_chat_without_session_id_uses_default() {
    let app = create_test_app(StubProvider::replying(vec!["ok"]), None);

    let (status, _) = send_json(
        &app.router,
        json_request(Method::POST, "/chat", json!({"userMessage": "hi"}), None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.state.store().snapshot("default").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_chat_missing_message_is_rejected() {
    let provider = StubProvider::replying(vec!["never"]);
    let app = create_test_app(provider.clone(), None);

    for body in [
        json!({"sessionId": "a"}),
        json!({"sessionId": "a", "userMessage": ""}),
        json!({"sessionId": "a", "userMessage": 7}),
    ] {
        let (status, json) = send_json(
            &app.router,
            json_request(Method::POST, "/chat", body, None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "userMessage required");
        assert_eq!(json["code"], "INVALID_REQUEST");
    }

    assert!(provider.requests().is_empty());
    assert!(app.state.store().is_empty());
}

#[tokio::test]
async fn test_chat_malformed_json_is_rejected() {
    let provider = StubProvider::replying(vec!["never"]);
    let app = create_test_app(provider.clone(), None);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send_json(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_REQUEST");
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn test_upstream_status_is_passed_through() {
    let provider = StubProvider::failing(429);
    let app = create_test_app(provider, None);

    let (status, json) = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/chat",
            json!({"sessionId": "a", "userMessage": "hi"}),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["code"], "UPSTREAM_ERROR");
    assert!(!json["error"].as_str().unwrap().contains("sk-live"));

    // The failed exchange left only the seeded history behind.
    assert_eq!(
        app.state.store().snapshot("a").await.unwrap(),
        vec![Message::system("You are a helpful assistant.")]
    );
}

#[tokio::test]
async fn test_upstream_without_status_is_internal() {
    let app = create_test_app(StubProvider::failing(200), None);

    let (status, json) = send_json(
        &app.router,
        json_request(Method::POST, "/chat", json!({"userMessage": "hi"}), None),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "UPSTREAM_ERROR");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_on_one_session_are_serialized() {
    let provider = StubProvider::slow(vec!["pong"], Duration::from_millis(50));
    let app = create_test_app(provider.clone(), None);

    let first = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/chat",
            json!({"sessionId": "shared", "userMessage": "one"}),
            None,
        ),
    );
    let second = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/chat",
            json!({"sessionId": "shared", "userMessage": "two"}),
            None,
        ),
    );
    let ((s1, _), (s2, _)) = tokio::join!(first, second);
    assert_eq!(s1, StatusCode::OK);
    assert_eq!(s2, StatusCode::OK);

    // Whichever ran second saw the first exchange in full.
    let mut sizes: Vec<usize> = provider
        .requests()
        .iter()
        .map(|r| r.messages.len())
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 4]);

    let history = app.state.store().snapshot("shared").await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[2], Message::assistant("pong"));
    assert_eq!(history[4], Message::assistant("pong"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Access Guard
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_guard_rejects_missing_secret() {
    let provider = StubProvider::replying(vec!["never"]);
    let app = create_test_app(provider.clone(), Some("s3cret"));

    for (uri, body) in [
        ("/chat", json!({"sessionId": "a", "userMessage": "hi"})),
        ("/chat-stream", json!({"sessionId": "a", "userMessage": "hi"})),
        ("/reset", json!({})),
    ] {
        let (status, json) = send_json(
            &app.router,
            json_request(Method::POST, uri, body.clone(), Some("wrong")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(json["code"], "UNAUTHORIZED");

        let (status, _) =
            send_json(&app.router, json_request(Method::POST, uri, body, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
    }

    assert!(provider.requests().is_empty());
    assert!(app.state.store().is_empty());
}

#[tokio::test]
async fn test_guard_accepts_secret() {
    let app = create_test_app(StubProvider::replying(vec!["ok"]), Some("s3cret"));

    let (status, json) = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/chat",
            json!({"userMessage": "hi"}),
            Some("s3cret"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reply"], "ok");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::from(r#"{"userMessage":"again"}"#))
        .unwrap();
    let (status, _) = send_json(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_guard_leaves_info_endpoints_open() {
    let app = create_test_app(StubProvider::replying(vec!["x"]), Some("s3cret"));

    for uri in ["/health", "/env-check"] {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reset
// ─────────────────────────────────────────────────────────────────────────────

async fn chat(app: &TestApp, session_id: &str) {
    let (status, _) = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/chat",
            json!({"sessionId": session_id, "userMessage": "hi"}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_reset_one_session() {
    let app = create_test_app(StubProvider::replying(vec!["ok"]), None);
    chat(&app, "a").await;
    chat(&app, "b").await;

    let (status, json) = send_json(
        &app.router,
        json_request(Method::POST, "/reset", json!({"sessionId": "a"}), None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"ok": true, "cleared": "a"}));
    assert!(app.state.store().snapshot("a").await.is_none());
    assert_eq!(app.state.store().snapshot("b").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_reset_all_sessions() {
    let app = create_test_app(StubProvider::replying(vec!["ok"]), None);
    chat(&app, "a").await;
    chat(&app, "b").await;

    let (status, json) = send_json(
        &app.router,
        json_request(Method::POST, "/reset", json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"ok": true, "cleared": "all"}));
    assert!(app.state.store().is_empty());

    chat(&app, "a").await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/reset")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send_json(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cleared"], "all");
    assert!(app.state.store().is_empty());
}

#[tokio::test]
async fn test_reset_then_chat_starts_fresh() {
    let provider = StubProvider::replying(vec!["ok"]);
    let app = create_test_app(provider.clone(), None);
    chat(&app, "a").await;

    send_json(
        &app.router,
        json_request(Method::POST, "/reset", json!({"sessionId": "a"}), None),
    )
    .await;
    chat(&app, "a").await;

    let last = provider.requests().pop().unwrap();
    assert_eq!(last.messages.len(), 2);
}

#[tokio::test]
async fn test_reset_malformed_body_is_rejected() {
    let app = create_test_app(StubProvider::replying(vec!["ok"]), None);
    chat(&app, "a").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/reset")
        .body(Body::from("sessionId=a"))
        .unwrap();
    let (status, json) = send_json(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_REQUEST");
    assert_eq!(app.state.store().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_stream_forwards_fragments() {
    let app = create_test_app(StubProvider::replying(vec!["He", "llo"]), None);

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/chat-stream",
            json!({"sessionId": "s", "userMessage": "hi"}),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );

    let mut body = response.into_body();
    let mut chunks = Vec::new();
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame.unwrap().into_data() {
            chunks.push(String::from_utf8(data.to_vec()).unwrap());
        }
    }
    assert_eq!(chunks, vec!["He", "llo"]);

    let history = app.state.store().snapshot("s").await.unwrap();
    assert_eq!(history.last(), Some(&Message::assistant("Hello")));
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn test_chat_stream_failure_before_output() {
    let app = create_test_app(StubProvider::failing(503), None);

    let (status, json) = send_json(
        &app.router,
        json_request(
            Method::POST,
            "/chat-stream",
            json!({"sessionId": "s", "userMessage": "hi"}),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "UPSTREAM_ERROR");
    assert_eq!(app.state.store().snapshot("s").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_chat_stream_missing_message() {
    let provider = StubProvider::replying(vec!["never"]);
    let app = create_test_app(provider.clone(), None);

    let (status, _) = send_json(
        &app.router,
        json_request(Method::POST, "/chat-stream", json!({"sessionId": "s"}), None),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(provider.requests().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Full stack against a mock upstream
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_openai_upstream_end_to_end() {
    use wiremock::matchers::{body_partial_json, header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header_is("authorization", "Bearer sk-test-0123456789"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "Answer in French."},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {"role": "assistant", "content": "bonjour"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ui_dir = TempDir::new().unwrap();
    let mut config = test_config(&ui_dir);
    config.upstream.base_url = server.uri();

    let provider: Arc<dyn Provider> = Arc::new(OpenAIProvider::from_config(&config.upstream));
    let state = AppState::from_config(&config, provider);
    let router = build_router(state.clone(), &config).unwrap();

    let (status, json) = send_json(
        &router,
        json_request(
            Method::POST,
            "/chat",
            json!({
                "sessionId": "fr",
                "userMessage": "hello",
                "model": "gpt-4o-mini",
                "systemPrompt": "Answer in French."
            }),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reply"], "bonjour");

    // The per-request system prompt is not stored.
    assert_eq!(
        state.store().snapshot("fr").await.unwrap()[0],
        Message::system("You are a helpful assistant.")
    );
}
