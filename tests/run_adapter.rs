//! Full-run integration tests against a mock chat endpoint: request shape,
//! lifecycle callbacks, transport errors, cancellation, and detach.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use chatwire::error::RunError;
use chatwire::message::{Message, MessageSnapshot, MessageStatus, Role};
use chatwire::protocol::FinishReason;
use chatwire::run::{AdapterOptions, ChatAdapter, HeaderSource, RunCallbacks, RunInput};
use chatwire::tools::ToolRegistry;
use chatwire::transport::TransportOptions;

const HI_THERE_BODY: &str = concat!(
    "{\"type\":\"0\",\"value\":\"Hi\"}\n",
    "{\"type\":\"0\",\"value\":\" there\"}\n",
    "{\"type\":\"d\",\"value\":{\"finishReason\":\"stop\"}}\n",
);

#[derive(Default)]
struct CallbackProbe {
    responses: AtomicUsize,
    errors: AtomicUsize,
    cancels: AtomicUsize,
    finished: Mutex<Option<MessageSnapshot>>,
}

fn probed_callbacks(probe: &Arc<CallbackProbe>) -> RunCallbacks {
    let on_response = Arc::clone(probe);
    let on_finish = Arc::clone(probe);
    let on_error = Arc::clone(probe);
    let on_cancel = Arc::clone(probe);
    RunCallbacks::new()
        .on_response(move |_response| {
            on_response.responses.fetch_add(1, Ordering::SeqCst);
        })
        .on_finish(move |snapshot| {
            *on_finish.finished.lock() = Some(snapshot);
        })
        .on_error(move |_error| {
            on_error.errors.fetch_add(1, Ordering::SeqCst);
        })
        .on_cancel(move || {
            on_cancel.cancels.fetch_add(1, Ordering::SeqCst);
        })
}

async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

fn adapter_for(addr: SocketAddr, callbacks: RunCallbacks) -> ChatAdapter {
    adapter_with_headers(addr, callbacks, HeaderSource::default())
}

fn adapter_with_headers(
    addr: SocketAddr,
    callbacks: RunCallbacks,
    headers: HeaderSource,
) -> ChatAdapter {
    let options = AdapterOptions {
        endpoint: url::Url::parse(&format!("http://{addr}/chat")).expect("endpoint"),
        headers,
        transport: TransportOptions::default(),
        extra_body: serde_json::Map::new(),
        callbacks,
    };
    ChatAdapter::new(options, Arc::new(ToolRegistry::new())).expect("adapter")
}

fn user_turn(text: &str) -> RunInput {
    RunInput {
        messages: vec![Message::text(Role::User, text)],
        ..RunInput::default()
    }
}

fn slow_stream_router() -> Router {
    Router::new().route(
        "/chat",
        post(|| async {
            let head = futures_util::stream::iter(vec![Ok::<Bytes, std::convert::Infallible>(
                Bytes::from_static(b"{\"type\":\"0\",\"value\":\"Hi\"}\n"),
            )]);
            let tail = futures_util::stream::once(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Bytes::from_static(
                    b"{\"type\":\"d\",\"value\":{\"finishReason\":\"stop\"}}\n",
                ))
            });
            Body::from_stream(head.chain(tail))
        }),
    )
}

#[tokio::test]
async fn run_accumulates_the_stream_and_fires_on_finish() {
    let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let captured_body = Arc::clone(&captured);
    let router = Router::new().route(
        "/chat",
        post(move |axum::Json(body): axum::Json<Value>| {
            *captured_body.lock() = Some(body);
            async { Body::from(HI_THERE_BODY) }
        }),
    );
    let addr = spawn_server(router).await;

    let probe = Arc::new(CallbackProbe::default());
    let adapter = adapter_for(addr, probed_callbacks(&probe));
    let input = RunInput {
        system: Some("be helpful".to_string()),
        assistant_message_id: Some("msg-under-test".to_string()),
        ..user_turn("hello")
    };

    let mut run = adapter.run(input);
    let mut last = None;
    while let Some(item) = run.snapshots.next().await {
        last = Some(item.expect("snapshot"));
    }
    let last = last.expect("at least one snapshot");

    assert_eq!(last.text(), "Hi there");
    assert_eq!(last.parts.len(), 1);
    assert!(matches!(
        last.status,
        MessageStatus::Complete {
            reason: FinishReason::Stop
        }
    ));
    assert_eq!(last.id, "msg-under-test");

    assert_eq!(probe.responses.load(Ordering::SeqCst), 1);
    assert_eq!(probe.errors.load(Ordering::SeqCst), 0);
    assert_eq!(probe.cancels.load(Ordering::SeqCst), 0);
    assert_eq!(probe.finished.lock().clone(), Some(last));

    let body = captured.lock().clone().expect("request body captured");
    assert_eq!(body["system"], json!("be helpful"));
    assert_eq!(body["unstable_assistantMessageId"], json!("msg-under-test"));
    assert_eq!(body["runConfig"], json!({}));
    assert_eq!(
        body["messages"],
        json!([{ "role": "user", "content": [{ "type": "text", "text": "hello" }] }])
    );
}

#[tokio::test]
async fn headers_are_sent_with_forced_content_type() {
    let seen: Arc<Mutex<Option<(Option<String>, Option<String>)>>> = Arc::new(Mutex::new(None));
    let seen_headers = Arc::clone(&seen);
    let router = Router::new().route(
        "/chat",
        post(move |headers: axum::http::HeaderMap| {
            let auth = headers
                .get("x-api-key")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let content_type = headers
                .get("content-type")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            *seen_headers.lock() = Some((auth, content_type));
            async { Body::from(HI_THERE_BODY) }
        }),
    );
    let addr = spawn_server(router).await;

    let header_source = HeaderSource::computed(|| async {
        let mut map = axum::http::HeaderMap::new();
        map.insert("x-api-key", axum::http::HeaderValue::from_static("k-123"));
        Ok(map)
    });
    let adapter = adapter_with_headers(addr, RunCallbacks::new(), header_source);

    let mut run = adapter.run(user_turn("hello"));
    while let Some(item) = run.snapshots.next().await {
        item.expect("snapshot");
    }

    let (auth, content_type) = seen.lock().clone().expect("request seen");
    assert_eq!(auth.as_deref(), Some("k-123"));
    assert_eq!(content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn non_success_status_surfaces_a_transport_error() {
    let router = Router::new().route(
        "/chat",
        post(|| async { (StatusCode::BAD_GATEWAY, "upstream exploded") }),
    );
    let addr = spawn_server(router).await;

    let probe = Arc::new(CallbackProbe::default());
    let adapter = adapter_for(addr, probed_callbacks(&probe));

    let mut run = adapter.run(user_turn("hello"));
    let first = run.snapshots.next().await.expect("one item");
    match first {
        Err(RunError::Transport { status, body }) => {
            assert_eq!(status, 502);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert!(run.snapshots.next().await.is_none());

    assert_eq!(probe.errors.load(Ordering::SeqCst), 1);
    assert_eq!(probe.cancels.load(Ordering::SeqCst), 0);
    assert!(probe.finished.lock().is_none());
}

#[tokio::test]
async fn empty_body_surfaces_a_protocol_error() {
    let router = Router::new().route("/chat", post(|| async { Body::empty() }));
    let addr = spawn_server(router).await;

    let probe = Arc::new(CallbackProbe::default());
    let adapter = adapter_for(addr, probed_callbacks(&probe));

    let mut run = adapter.run(user_turn("hello"));
    let first = run.snapshots.next().await.expect("one item");
    assert!(matches!(first, Err(RunError::Protocol(_))));
    assert_eq!(probe.errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_fires_on_cancel_exactly_once() {
    let addr = spawn_server(slow_stream_router()).await;

    let probe = Arc::new(CallbackProbe::default());
    let adapter = adapter_for(addr, probed_callbacks(&probe));

    let mut run = adapter.run(user_turn("hello"));
    let first = run
        .snapshots
        .next()
        .await
        .expect("first snapshot")
        .expect("snapshot");
    assert_eq!(first.text(), "Hi");

    run.handle.cancel();
    run.handle.cancel();

    let rest = tokio::time::timeout(Duration::from_secs(5), run.snapshots.next())
        .await
        .expect("stream ended promptly after cancel");
    assert!(rest.is_none());

    assert_eq!(probe.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(probe.errors.load(Ordering::SeqCst), 0);
    assert!(probe.finished.lock().is_none());
}

#[tokio::test]
async fn detach_suppresses_the_cancel_callback() {
    let addr = spawn_server(slow_stream_router()).await;

    let probe = Arc::new(CallbackProbe::default());
    let adapter = adapter_for(addr, probed_callbacks(&probe));

    let mut run = adapter.run(user_turn("hello"));
    run.snapshots
        .next()
        .await
        .expect("first snapshot")
        .expect("snapshot");

    run.handle.detach();
    let rest = tokio::time::timeout(Duration::from_secs(5), run.snapshots.next())
        .await
        .expect("stream ended promptly after detach");
    assert!(rest.is_none());

    assert_eq!(probe.cancels.load(Ordering::SeqCst), 0);
    assert_eq!(probe.errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelling_after_finish_is_a_noop() {
    let router = Router::new().route("/chat", post(|| async { Body::from(HI_THERE_BODY) }));
    let addr = spawn_server(router).await;

    let probe = Arc::new(CallbackProbe::default());
    let adapter = adapter_for(addr, probed_callbacks(&probe));

    let mut run = adapter.run(user_turn("hello"));
    while let Some(item) = run.snapshots.next().await {
        item.expect("snapshot");
    }
    assert!(probe.finished.lock().is_some());

    run.handle.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(probe.cancels.load(Ordering::SeqCst), 0);
    assert_eq!(probe.errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let router = Router::new().route("/chat", post(|| async { Body::from(HI_THERE_BODY) }));
    let addr = spawn_server(router).await;

    let probe = Arc::new(CallbackProbe::default());
    let adapter = adapter_for(addr, probed_callbacks(&probe));

    let slow_addr = spawn_server(slow_stream_router()).await;
    let slow_probe = Arc::new(CallbackProbe::default());
    let slow_adapter = adapter_for(slow_addr, probed_callbacks(&slow_probe));

    // Cancel the first run, then immediately retry on the second adapter.
    let mut abandoned = slow_adapter.run(user_turn("hello"));
    abandoned
        .snapshots
        .next()
        .await
        .expect("first snapshot")
        .expect("snapshot");
    abandoned.handle.cancel();

    let mut retry = adapter.run(user_turn("hello"));
    let mut last = None;
    while let Some(item) = retry.snapshots.next().await {
        last = Some(item.expect("snapshot"));
    }
    assert_eq!(last.expect("retry snapshot").text(), "Hi there");

    let rest = tokio::time::timeout(Duration::from_secs(5), abandoned.snapshots.next())
        .await
        .expect("abandoned run ended");
    assert!(rest.is_none());
    assert_eq!(slow_probe.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(probe.cancels.load(Ordering::SeqCst), 0);
}
