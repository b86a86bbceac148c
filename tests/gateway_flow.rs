use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use reasonify_rs::config::{
    AppConfig, ClientAuthConfig, FeaturesConfig, ProviderConfig, ServerConfig,
};
use reasonify_rs::orchestrate::{FALLBACK_NOTICE, STAGE_PAUSE};
use reasonify_rs::routing::dispatch_request;
use reasonify_rs::state::AppState;

fn build_state(reasoning_url: String, answering_url: String) -> Arc<AppState> {
    let config = AppConfig {
        server: ServerConfig::default(),
        reasoning: ProviderConfig {
            base_url: reasoning_url,
            api_key: "reasoning-secret".to_string(),
            model: "deep-thought-1".to_string(),
            exposed_model: Some("reasoner".to_string()),
        },
        answering: ProviderConfig {
            base_url: answering_url,
            api_key: "answering-secret".to_string(),
            model: "fast-answerer-2".to_string(),
            exposed_model: Some("answerer".to_string()),
        },
        hybrid_model: "hybrid".to_string(),
        client_authentication: ClientAuthConfig {
            allowed_keys: vec!["client-key".to_string()],
        },
        features: FeaturesConfig::default(),
    };
    AppState::from_config(config).expect("build state")
}

async fn spawn_mock(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

/// Reasoning mock: bootstrap plus a fixed streaming body for the messages
/// call. Captures each messages-request body for assertions.
fn reasoning_mock(stream_body: &'static str, requests: Arc<Mutex<Vec<Value>>>) -> Router {
    Router::new()
        .route(
            "/api/v1/conversations",
            post(|| async { Json(json!({"id": "conv-1"})) }),
        )
        .route(
            "/api/v1/conversations/{id}/messages",
            post(move |Json(body): Json<Value>| {
                let requests = Arc::clone(&requests);
                async move {
                    requests.lock().await.push(body);
                    (
                        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                        stream_body,
                    )
                }
            }),
        )
}

/// Answering mock: OpenAI-style streaming chat completions built from a list
/// of content deltas. Captures each request body.
fn answering_mock(deltas: &'static [&'static str], requests: Arc<Mutex<Vec<Value>>>) -> Router {
    Router::new().route(
        "/chat/completions",
        post(move |Json(body): Json<Value>| {
            let requests = Arc::clone(&requests);
            async move {
                requests.lock().await.push(body);
                let mut out = String::from(
                    "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                );
                for delta in deltas {
                    out.push_str("data: ");
                    out.push_str(
                        &json!({"id": "c1", "choices": [{"index": 0, "delta": {"content": delta}}]})
                            .to_string(),
                    );
                    out.push_str("\n\n");
                }
                out.push_str("data: [DONE]\n\n");
                ([(axum::http::header::CONTENT_TYPE, "text/event-stream")], out)
            }
        }),
    )
}

async fn call_gateway(state: Arc<AppState>, body: Value) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", "Bearer client-key")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("serialize")))
        .expect("build request");
    dispatch_request(state, Arc::from(""), request)
        .await
        .expect("dispatch")
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

/// Parse the `data:` frames of an SSE body, excluding the `[DONE]` sentinel.
fn sse_data_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|payload| *payload != "[DONE]")
        .map(|payload| serde_json::from_str(payload).expect("frame json"))
        .collect()
}

fn delta_contents(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|frame| frame["choices"][0]["delta"]["content"].as_str())
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn hybrid_streaming_brackets_thinking_and_chains_answer() {
    let reasoning_requests = Arc::new(Mutex::new(Vec::new()));
    let answering_requests = Arc::new(Mutex::new(Vec::new()));
    // The answer line from the reasoning provider must not leak through; the
    // hybrid flow takes answer text from the answering provider only.
    let reasoning_stream = concat!(
        "data: {\"content_type\":\"thinking\",\"content\":\"a\"}\n",
        "data: {\"content_type\":\"thinking\",\"content\":\"b\"}\n",
        "data: {\"type\":\"heartbeat\"}\n",
        "data: {\"content_type\":\"thinking\",\"content\":\"c\"}\n",
        "data: {\"type\":\"answer\",\"content\":\"leaked\"}\n",
    );
    let reasoning_url =
        spawn_mock(reasoning_mock(reasoning_stream, Arc::clone(&reasoning_requests))).await;
    let answering_url =
        spawn_mock(answering_mock(&["x"], Arc::clone(&answering_requests))).await;
    let state = build_state(reasoning_url, answering_url);

    let response = call_gateway(
        state,
        json!({
            "model": "hybrid",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "what is 2+2?"}
            ],
            "stream": true
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap(),
        "text/event-stream"
    );

    let body = body_string(response).await;
    assert!(body.ends_with("data: [DONE]\n\n"));

    let frames = sse_data_frames(&body);
    assert_eq!(frames[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(
        delta_contents(&frames),
        vec!["<thinking>\n", "a", "b", "c", "\n</thinking>\n\n", "x"]
    );
    assert_eq!(
        frames.last().unwrap()["choices"][0]["finish_reason"],
        "stop"
    );

    // The reasoning provider got only the final user turn.
    let reasoning_requests = reasoning_requests.lock().await;
    assert_eq!(reasoning_requests.len(), 1);
    assert_eq!(reasoning_requests[0]["model"], "deep-thought-1");
    assert_eq!(reasoning_requests[0]["content"], "what is 2+2?");

    // The answering provider got the conversation seeded with the trace.
    let answering_requests = answering_requests.lock().await;
    assert_eq!(answering_requests.len(), 1);
    let body = &answering_requests[0];
    assert_eq!(body["model"], "fast-answerer-2");
    assert_eq!(body["stream"], true);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(
        messages[1]["content"],
        "<thinking>\nabc\n</thinking>\n\n"
    );
    assert_eq!(messages[2]["content"], "what is 2+2?");
}

#[tokio::test]
async fn aggregate_hybrid_wraps_thinking_without_the_stage_pause() {
    let reasoning_stream = "data: {\"content_type\":\"thinking\",\"content\":\"abc\"}\n";
    let reasoning_url =
        spawn_mock(reasoning_mock(reasoning_stream, Arc::new(Mutex::new(Vec::new())))).await;
    let answering_url =
        spawn_mock(answering_mock(&["x"], Arc::new(Mutex::new(Vec::new())))).await;
    let state = build_state(reasoning_url, answering_url);

    let started = Instant::now();
    let response = call_gateway(
        state,
        json!({
            "model": "hybrid",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }),
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "<thinking>\nabc\n</thinking>\n\nx"
    );
    // No frames are delivered mid-session, so there is no phase boundary to
    // pace; the whole round trip must finish well inside the pause.
    assert!(elapsed < STAGE_PAUSE, "aggregate hybrid paused for {elapsed:?}");
}

#[tokio::test]
async fn bootstrap_failure_exhausts_retries_then_falls_back() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_handle = Arc::clone(&attempts);
    let reasoning = Router::new().route(
        "/api/v1/conversations",
        post(move || {
            let attempts = Arc::clone(&attempts_handle);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                StatusCode::SERVICE_UNAVAILABLE
            }
        }),
    );
    let reasoning_url = spawn_mock(reasoning).await;
    let answering_requests = Arc::new(Mutex::new(Vec::new()));
    let answering_url =
        spawn_mock(answering_mock(&["hello"], Arc::clone(&answering_requests))).await;
    let state = build_state(reasoning_url, answering_url);

    let response = call_gateway(
        state,
        json!({
            "model": "hybrid",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    let content = body["choices"][0]["message"]["content"].as_str().unwrap();
    assert_eq!(content, format!("{FALLBACK_NOTICE}hello"));
    assert!(!content.contains("<thinking>"));

    // One initial attempt plus two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    // The fallback request carries the original messages, unseeded.
    let answering_requests = answering_requests.lock().await;
    let messages = answering_requests[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "hi");
}

#[tokio::test]
async fn bootstrap_rejection_falls_back_without_retrying() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_handle = Arc::clone(&attempts);
    let reasoning = Router::new().route(
        "/api/v1/conversations",
        post(move || {
            let attempts = Arc::clone(&attempts_handle);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                StatusCode::UNAUTHORIZED
            }
        }),
    );
    let reasoning_url = spawn_mock(reasoning).await;
    let answering_url =
        spawn_mock(answering_mock(&["hello"], Arc::new(Mutex::new(Vec::new())))).await;
    let state = build_state(reasoning_url, answering_url);

    let response = call_gateway(
        state,
        json!({
            "model": "hybrid",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(
        body["choices"][0]["message"]["content"],
        format!("{FALLBACK_NOTICE}hello")
    );

    // A 4xx rejection is deterministic; repeating it cannot succeed.
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_reasoning_stream_falls_back_with_notice() {
    let reasoning_requests = Arc::new(Mutex::new(Vec::new()));
    // Parses fine but never yields thinking content.
    let reasoning_stream = concat!(
        "data: {\"type\":\"heartbeat\"}\n",
        "data: {\"content_type\":\"thinking\",\"content\":\"\"}\n",
    );
    let reasoning_url =
        spawn_mock(reasoning_mock(reasoning_stream, Arc::clone(&reasoning_requests))).await;
    let answering_url = spawn_mock(answering_mock(&["fine"], Arc::new(Mutex::new(Vec::new())))).await;
    let state = build_state(reasoning_url, answering_url);

    let response = call_gateway(
        state,
        json!({
            "model": "hybrid",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(
        body["choices"][0]["message"]["content"],
        format!("{FALLBACK_NOTICE}fine")
    );
}

#[tokio::test]
async fn direct_answering_model_is_a_plain_proxy() {
    let reasoning_url = spawn_mock(Router::new()).await;
    let answering_requests = Arc::new(Mutex::new(Vec::new()));
    let answering_url =
        spawn_mock(answering_mock(&["po", "ng"], Arc::clone(&answering_requests))).await;
    let state = build_state(reasoning_url, answering_url);

    let response = call_gateway(
        state,
        json!({
            "model": "answerer",
            "messages": [{"role": "user", "content": "ping"}],
            "stream": true
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let frames = sse_data_frames(&body);
    assert_eq!(delta_contents(&frames), vec!["po", "ng"]);
    assert!(!body.contains("<thinking>"));

    // No seeding on the direct path.
    let answering_requests = answering_requests.lock().await;
    let messages = answering_requests[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn direct_reasoning_model_streams_thinking_and_answer_from_one_upstream() {
    let reasoning_stream = concat!(
        "data: {\"content_type\":\"thinking\",\"content\":\"t\"}\n",
        "data: {\"type\":\"answer\",\"content\":\"ans\"}\n",
    );
    let reasoning_url =
        spawn_mock(reasoning_mock(reasoning_stream, Arc::new(Mutex::new(Vec::new())))).await;
    let answering_url = spawn_mock(Router::new()).await;
    let state = build_state(reasoning_url, answering_url);

    let response = call_gateway(
        state,
        json!({
            "model": "reasoner",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "<thinking>\nt\n</thinking>\n\nans"
    );
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["object"], "chat.completion");
}

#[tokio::test]
async fn stream_cut_mid_thinking_still_closes_the_block() {
    // The reasoning stream ends without ever reaching an answer; the direct
    // reasoning flow must still close the thinking block before finishing.
    let reasoning_stream = "data: {\"content_type\":\"thinking\",\"content\":\"only\"}\n";
    let reasoning_url =
        spawn_mock(reasoning_mock(reasoning_stream, Arc::new(Mutex::new(Vec::new())))).await;
    let answering_url = spawn_mock(Router::new()).await;
    let state = build_state(reasoning_url, answering_url);

    let response = call_gateway(
        state,
        json!({
            "model": "reasoner",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }),
    )
    .await;

    let body = body_string(response).await;
    let frames = sse_data_frames(&body);
    assert_eq!(
        delta_contents(&frames),
        vec!["<thinking>\n", "only", "\n</thinking>\n\n"]
    );
    assert_eq!(
        frames.last().unwrap()["choices"][0]["finish_reason"],
        "stop"
    );
    assert!(body.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn client_disconnect_mid_thinking_stops_upstream_reads() {
    let chunks_served = Arc::new(AtomicUsize::new(0));
    let chunks_handle = Arc::clone(&chunks_served);
    let reasoning = Router::new()
        .route(
            "/api/v1/conversations",
            post(|| async { Json(json!({"id": "conv-1"})) }),
        )
        .route(
            "/api/v1/conversations/{id}/messages",
            post(move || {
                let chunks = Arc::clone(&chunks_handle);
                async move {
                    // Endless thinking stream; the counter advances only while
                    // the gateway keeps reading the upstream body.
                    let stream = futures_util::stream::unfold(0u64, move |i| {
                        let chunks = Arc::clone(&chunks);
                        async move {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            chunks.fetch_add(1, Ordering::SeqCst);
                            let line = format!(
                                "data: {{\"content_type\":\"thinking\",\"content\":\"t{i}\"}}\n"
                            );
                            Some((
                                Ok::<_, std::convert::Infallible>(axum::body::Bytes::from(line)),
                                i + 1,
                            ))
                        }
                    });
                    (
                        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                        Body::from_stream(stream),
                    )
                }
            }),
        );
    let reasoning_url = spawn_mock(reasoning).await;
    let answering_url = spawn_mock(Router::new()).await;
    let state = build_state(reasoning_url, answering_url);

    let response = call_gateway(
        state,
        json!({
            "model": "hybrid",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut frames = response.into_body().into_data_stream();
    let first = frames.next().await.expect("first frame").expect("frame bytes");
    assert!(std::str::from_utf8(&first)
        .expect("utf8 frame")
        .starts_with("data: "));

    // Hang up mid-thinking.
    drop(frames);

    // Give the abort time to propagate, then verify the upstream stops being
    // read. One in-flight chunk may still land.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let settled = chunks_served.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let later = chunks_served.load(Ordering::SeqCst);
    assert!(
        later <= settled + 1,
        "upstream still streaming after disconnect: {settled} -> {later}"
    );
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let reasoning_url = spawn_mock(Router::new()).await;
    let answering_url = spawn_mock(Router::new()).await;
    let state = build_state(reasoning_url, answering_url);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", "Bearer wrong-key")
        .body(Body::from("{}"))
        .expect("build request");
    let response = dispatch_request(state, Arc::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn unknown_routes_and_methods_are_distinguished() {
    let reasoning_url = spawn_mock(Router::new()).await;
    let answering_url = spawn_mock(Router::new()).await;
    let state = build_state(reasoning_url, answering_url);

    let request = Request::builder()
        .method("GET")
        .uri("/v1/chat/completions")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(Arc::clone(&state), Arc::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/unknown")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(state, Arc::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoint_reports_exposed_models() {
    let reasoning_url = spawn_mock(Router::new()).await;
    let answering_url = spawn_mock(Router::new()).await;
    let state = build_state(reasoning_url, answering_url);

    let request = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(state, Arc::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["config"]["hybrid_model"], "hybrid");
    assert_eq!(body["config"]["reasoning_model"], "reasoner");
    assert_eq!(body["config"]["answering_model"], "answerer");
}
