//! End-to-end tests: a fake OpenAI-compatible upstream, the real relay router,
//! and the Rust client/session driving it. Everything runs in-process on 127.0.0.1.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use book_assistant_lib::client::{send_message, ChatSession, RelayClient};
use book_assistant_lib::commands::config::AppConfig;
use book_assistant_lib::commands::server::build_router;
use book_assistant_lib::error::ClientError;
use book_assistant_lib::models::{Message, Role};
use book_assistant_lib::AppState;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Script {
    /// Send all chunks, then close the connection.
    Stream(Vec<String>),
    /// Send the chunks, then keep the connection open forever.
    StreamThenHang(Vec<String>),
    Status(u16, String),
}

#[derive(Clone)]
struct FakeUpstream {
    script: Script,
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn completions(
    State(upstream): State<FakeUpstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    upstream.requests.lock().unwrap().push((auth, body));

    match upstream.script {
        Script::Status(code, body) => (StatusCode::from_u16(code).unwrap(), body).into_response(),
        Script::Stream(chunks) => {
            Body::from_stream(stream::iter(chunks.into_iter().map(Ok::<_, Infallible>)))
                .into_response()
        }
        Script::StreamThenHang(chunks) => Body::from_stream(
            stream::iter(chunks.into_iter().map(Ok::<_, Infallible>)).chain(stream::pending()),
        )
        .into_response(),
    }
}

fn delta(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {"content": text}}]})
    )
}

fn done() -> String {
    "data: [DONE]\n\n".to_string()
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}", addr)
}

struct Harness {
    relay_url: String,
    state: AppState,
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn harness(script: Script, api_key: Option<&str>) -> Harness {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let upstream = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(FakeUpstream {
            script,
            requests: requests.clone(),
        });
    let upstream_url = spawn(upstream).await;

    let config = AppConfig {
        api_url: format!("{}/v1", upstream_url),
        api_key: api_key.map(str::to_string),
        ..AppConfig::default()
    };
    let state = AppState::new(config);
    let relay_url = spawn(build_router(state.clone())).await;

    Harness {
        relay_url,
        state,
        requests,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn first_question_streams_and_commits_answer() {
    let h = harness(
        Script::Stream(vec![delta("Capital "), delta("improdutivo é..."), done()]),
        Some("test-key"),
    )
    .await;
    let client = RelayClient::new(&h.relay_url);
    let session = Mutex::new(ChatSession::new());

    let mut seen = Vec::new();
    let accepted = send_message(&session, &client, "O que é capital improdutivo?", |t| {
        seen.push(t.to_string())
    })
    .await;
    assert!(accepted);
    assert_eq!(seen, vec!["Capital ", "improdutivo é..."]);

    let session = session.lock().unwrap();
    assert_eq!(
        session.messages(),
        &[
            Message::user("O que é capital improdutivo?"),
            Message::assistant("Capital improdutivo é..."),
        ]
    );
    assert!(session.error().is_none());
    assert!(!session.is_loading());

    // upstream saw the instruction turn plus exactly one user turn
    let requests = h.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["stream"], json!(true));
    assert_eq!(body["model"], json!("gpt-4o"));
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], json!("system"));
    assert!(messages[0]["content"]
        .as_str()
        .unwrap()
        .contains("A Era do Capital Improdutivo"));
    assert_eq!(messages[1], json!({"role": "user", "content": "O que é capital improdutivo?"}));
}

#[tokio::test]
async fn instruction_turn_prepended_once_for_long_history() {
    let h = harness(Script::Stream(vec![delta("ok"), done()]), Some("k")).await;
    let history = vec![
        Message::user("a"),
        Message::assistant("b"),
        Message::user("c"),
        Message::assistant("d"),
        Message::user("e"),
    ];

    let text = RelayClient::new(&h.relay_url)
        .stream_reply(&history, None, &CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(text, "ok");

    let requests = h.requests.lock().unwrap();
    let messages = requests[0].1["messages"].as_array().unwrap().clone();
    assert_eq!(messages.len(), 6);
    let system_turns = messages.iter().filter(|m| m["role"] == "system").count();
    assert_eq!(system_turns, 1);
    assert_eq!(messages[0]["role"], json!("system"));
    assert_eq!(messages[5]["content"], json!("e"));
}

#[tokio::test]
async fn missing_credential_returns_json_error_without_calling_upstream() {
    let h = harness(Script::Stream(vec![delta("x"), done()]), None).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/chat", h.relay_url))
        .json(&json!({"messages": [{"role": "user", "content": "oi"}]}))
        .send()
        .await
        .unwrap();
    assert!(response.status().as_u16() >= 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("OPENAI_API_KEY"));

    let client = RelayClient::new(&h.relay_url);
    let session = Mutex::new(ChatSession::new());
    send_message(&session, &client, "oi", |_| {}).await;
    let session = session.lock().unwrap();
    assert_eq!(session.messages(), &[Message::user("oi")]);
    assert!(session.error().unwrap().contains("OPENAI_API_KEY"));

    assert!(h.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn upstream_failure_status_never_opens_a_stream() {
    let h = harness(
        Script::Status(
            401,
            json!({"error": {"message": "Incorrect API key provided"}}).to_string(),
        ),
        Some("bad"),
    )
    .await;

    let result = RelayClient::new(&h.relay_url)
        .stream_reply(&[Message::user("oi")], None, &CancellationToken::new(), |_| {
            panic!("no fragment expected")
        })
        .await;
    match result {
        Err(ClientError::Status { status, message }) => {
            assert_eq!(status, 502);
            assert!(message.contains("Incorrect API key provided"));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let session = Mutex::new(ChatSession::new());
    send_message(&session, &RelayClient::new(&h.relay_url), "oi", |_| {}).await;
    let session = session.lock().unwrap();
    assert!(session
        .messages()
        .iter()
        .all(|m| m.role == Role::User));
    assert!(session.error().is_some());
}

#[tokio::test]
async fn malformed_upstream_lines_are_skipped() {
    let h = harness(
        Script::Stream(vec![
            ": keep-alive\n\n".to_string(),
            delta("Paraísos "),
            "data: {not json\n\n".to_string(),
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".to_string(),
            delta("fiscais"),
            done(),
        ]),
        Some("k"),
    )
    .await;

    let text = RelayClient::new(&h.relay_url)
        .stream_reply(&[Message::user("oi")], None, &CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(text, "Paraísos fiscais");
}

#[tokio::test]
async fn malformed_relay_frames_are_skipped_by_client() {
    let body = concat!(
        "data: {\"text\":\"Financei\"}\n\n",
        "data: not-json\n\n",
        "event: ping\n\n",
        "data: {\"text\":\"rização\"}\n\n",
        "data: [DONE]\n\n",
    );
    let relay = Router::new().route(
        "/api/chat",
        post(move || async move { body }),
    );
    let url = spawn(relay).await;

    let text = RelayClient::new(&url)
        .stream_reply(&[Message::user("oi")], None, &CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(text, "Financeirização");
}

#[tokio::test]
async fn dropped_stream_without_sentinel_is_an_error() {
    // upstream closes without [DONE], so the relay must not emit the sentinel either
    let h = harness(Script::Stream(vec![delta("meia "), delta("resposta")]), Some("k")).await;

    let raw = reqwest::Client::new()
        .post(format!("{}/api/chat", h.relay_url))
        .json(&json!({"messages": [{"role": "user", "content": "oi"}]}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap_or_default();
    assert!(raw.contains("meia "));
    assert!(!raw.contains("[DONE]"));

    let session = Mutex::new(ChatSession::new());
    send_message(&session, &RelayClient::new(&h.relay_url), "oi", |_| {}).await;
    let session = session.lock().unwrap();
    assert_eq!(session.messages(), &[Message::user("oi")]);
    assert!(session.error().is_some());
    assert!(session.streaming_text().is_none());
}

#[tokio::test]
async fn clearing_mid_stream_aborts_without_error() {
    let h = harness(Script::StreamThenHang(vec![delta("Capital ")]), Some("k")).await;
    let client = RelayClient::new(&h.relay_url);
    let session = Arc::new(Mutex::new(ChatSession::new()));

    let task = {
        let session = session.clone();
        let client = client.clone();
        tokio::spawn(async move {
            send_message(&session, &client, "O que é capital improdutivo?", |_| {}).await
        })
    };

    wait_until(|| session.lock().unwrap().streaming_text() == Some("Capital ")).await;
    // a second submission while in flight is a no-op
    assert!(!send_message(&session, &client, "outra", |_| {}).await);
    assert_eq!(h.state.streams.0.len(), 1);

    session.lock().unwrap().clear();
    assert!(task.await.unwrap());

    {
        let session = session.lock().unwrap();
        assert!(session.messages().is_empty());
        assert!(session.error().is_none());
        assert!(!session.is_loading());
    }

    let streams = h.state.streams.clone();
    wait_until(|| streams.0.is_empty()).await;
}

#[tokio::test]
async fn concurrent_request_for_same_conversation_is_rejected() {
    let h = harness(Script::StreamThenHang(vec![delta("a")]), Some("k")).await;
    let http = reqwest::Client::new();
    let body = json!({
        "messages": [{"role": "user", "content": "oi"}],
        "conversation_id": "conv-1"
    });

    let first = http
        .post(format!("{}/api/chat", h.relay_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-conversation-id"], "conv-1");
    assert!(first.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert!(h.state.streams.is_active("conv-1"));

    let second = http
        .post(format!("{}/api/chat", h.relay_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
    let error: Value = second.json().await.unwrap();
    assert!(error["error"].is_string());

    let stop = http
        .post(format!("{}/api/chat/stop", h.relay_url))
        .json(&json!({"conversation_id": "conv-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(stop.status(), 204);
    assert!(!h.state.streams.is_active("conv-1"));

    let text = first.text().await.unwrap_or_default();
    assert!(!text.contains("[DONE]"));
}

#[tokio::test]
async fn invalid_bodies_get_json_errors() {
    let h = harness(Script::Stream(vec![done()]), Some("k")).await;
    let http = reqwest::Client::new();

    for body in [
        json!({"messages": []}),
        json!({"messages": [{"role": "system", "content": "x"}]}),
        json!({"messages": [{"role": "user", "content": "oi"}, {"role": "assistant", "content": "olá"}]}),
        json!({"nope": true}),
    ] {
        let response = http
            .post(format!("{}/api/chat", h.relay_url))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "body: {}", body);
        let error: Value = response.json().await.unwrap();
        assert!(error["error"].is_string());
    }
    assert!(h.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn informational_endpoints() {
    let h = harness(Script::Stream(vec![done()]), None).await;
    let http = reqwest::Client::new();

    let health = http.get(format!("{}/healthz", h.relay_url)).send().await.unwrap();
    assert_eq!(health.text().await.unwrap(), "ok");

    let book: Value = http
        .get(format!("{}/api/book", h.relay_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(book["metadata"]["author"], json!("Ladislau Dowbor"));
    assert_eq!(book["metadata"]["year"], json!(2017));
    assert_eq!(book["structure"].as_array().unwrap().len(), 4);

    let questions: Value = http
        .get(format!("{}/api/questions?lang=fr", h.relay_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(questions["lang"], json!("fr"));
    assert_eq!(questions["questions"].as_array().unwrap().len(), 3);

    let fallback: Value = http
        .get(format!("{}/api/questions?lang=xx", h.relay_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fallback["lang"], json!("pt"));

    let page = http
        .get(format!("{}/?lang=es", h.relay_url))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.contains("¿Qué es el capital improductivo?"));
    assert!(page.contains("/api/chat"));
}

#[tokio::test]
async fn upstream_error_mid_stream_discards_partial_answer() {
    // the upstream sends [DONE] after its error object; the relay must not forward it
    let h = harness(
        Script::Stream(vec![
            delta("meia "),
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n".to_string(),
            done(),
        ]),
        Some("k"),
    )
    .await;

    let raw = reqwest::Client::new()
        .post(format!("{}/api/chat", h.relay_url))
        .json(&json!({"messages": [{"role": "user", "content": "oi"}]}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap_or_default();
    assert!(raw.contains("meia "));
    assert!(!raw.contains("[DONE]"));

    let session = Mutex::new(ChatSession::new());
    let mut seen = String::new();
    send_message(&session, &RelayClient::new(&h.relay_url), "oi", |t| seen.push_str(t)).await;
    assert_eq!(seen, "meia ");

    let session = session.lock().unwrap();
    assert_eq!(session.messages(), &[Message::user("oi")]);
    assert!(session.error().is_some());
    assert!(session.streaming_text().is_none());
}

#[tokio::test]
async fn null_error_field_on_chunks_is_not_a_failure() {
    let chunk = |text: &str| {
        format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": text}}], "error": null})
        )
    };
    let h = harness(Script::Stream(vec![chunk("Oi, "), chunk("tudo bem"), done()]), Some("k")).await;

    let text = RelayClient::new(&h.relay_url)
        .stream_reply(&[Message::user("oi")], None, &CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(text, "Oi, tudo bem");
}

#[tokio::test]
async fn stop_with_malformed_body_gets_json_error() {
    let h = harness(Script::Stream(vec![done()]), Some("k")).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/api/chat/stop", h.relay_url))
        .header(header::CONTENT_TYPE, "application/json")
        .body("{\"conversation\": 1}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.unwrap();
    assert!(error["error"].is_string());

    // unknown conversation is still a no-op
    let response = http
        .post(format!("{}/api/chat/stop", h.relay_url))
        .json(&json!({"conversation_id": "nunca-existiu"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}
