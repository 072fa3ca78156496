use super::*;
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Form, Json, Router};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::PropValue,
};
use std::{sync::atomic::AtomicUsize, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex as AsyncMutex},
};

#[derive(Clone)]
struct EchoServerState {
    received: Arc<AsyncMutex<Vec<EventPayload>>>,
    reply: Arc<UpdateBatch>,
}

async fn handle_event(
    State(state): State<EchoServerState>,
    Form(payload): Form<EventPayload>,
) -> Json<UpdateBatch> {
    state.received.lock().await.push(payload);
    Json(state.reply.as_ref().clone())
}

async fn rejecting_handler(Form(_payload): Form<EventPayload>) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(ErrorCode::NotFound, "unknown widget")),
    )
}

async fn spawn_event_server(
    reply: UpdateBatch,
) -> std::io::Result<(String, Arc<AsyncMutex<Vec<EventPayload>>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let received = Arc::new(AsyncMutex::new(Vec::new()));
    let state = EchoServerState {
        received: Arc::clone(&received),
        reply: Arc::new(reply),
    };
    let app = Router::new()
        .route("/", post(handle_event))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), received))
}

async fn spawn_rejecting_server() -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new().route("/", post(rejecting_handler));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

async fn spawn_crashing_server() -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new().route(
        "/",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "handler panicked") }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

/// Holds every request until the test releases it with a body.
#[derive(Default)]
struct GatedTransport {
    pending: AsyncMutex<Vec<(EventPayload, Option<oneshot::Sender<String>>)>>,
}

impl GatedTransport {
    async fn wait_for_pending(&self, count: usize) {
        for _ in 0..200 {
            if self.pending.lock().await.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} pending requests");
    }

    async fn release(&self, index: usize, body: &str) {
        let mut pending = self.pending.lock().await;
        let sender = pending[index].1.take().expect("request already released");
        sender.send(body.to_string()).expect("requester gone");
    }
}

#[async_trait]
impl RelayTransport for GatedTransport {
    async fn post_event(&self, payload: &EventPayload) -> Result<String, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.push((payload.clone(), Some(tx)));
        Ok(rx.await.expect("gate dropped"))
    }
}

#[derive(Default)]
struct CountingTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl RelayTransport for CountingTransport {
    async fn post_event(&self, _payload: &EventPayload) -> Result<String, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("[]".to_string())
    }
}

fn watched_document() -> Arc<MemoryDocument> {
    Arc::new(MemoryDocument::with_elements([
        ElementSnapshot::text_input("x")
            .with_class("widget")
            .with_property("value", "5"),
        ElementSnapshot::new("result", "p").with_class("widget"),
        ElementSnapshot::text_input("other").with_class("widget"),
    ]))
}

fn ordered_config(ordering: ResponseOrdering) -> RelayConfig {
    RelayConfig {
        ordering,
        ..RelayConfig::default()
    }
}

#[tokio::test]
async fn input_event_posts_value_props_as_form() {
    let (server_url, received) = spawn_event_server(Vec::new()).await.expect("spawn server");
    let document = watched_document();
    let relay = EventRelay::new(
        document.clone(),
        Arc::new(HttpTransport::new(&server_url).expect("url")),
    );

    let report = relay
        .on_event(&ElementId::new("x"), EventKind::Input)
        .await
        .expect("relay event");
    assert!(report.applied.is_empty());

    let received = received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].event, "input");
    assert_eq!(received[0].id, ElementId::new("x"));
    assert_eq!(received[0].props, r#"{"value":"5"}"#);
}

#[tokio::test]
async fn server_updates_are_applied_to_the_document() {
    let reply = vec![UpdateInstruction::new("result", "innerText", 25i64)];
    let (server_url, _received) = spawn_event_server(reply.clone())
        .await
        .expect("spawn server");
    let document = watched_document();
    let relay = EventRelay::new(
        document.clone(),
        Arc::new(HttpTransport::new(&server_url).expect("url")),
    );

    let report = relay
        .on_event(&ElementId::new("x"), EventKind::Input)
        .await
        .expect("relay event");
    assert_eq!(report.applied, reply);
    assert_eq!(
        document.property(&ElementId::new("result"), "innerText"),
        Some(PropValue::from(25i64))
    );
}

#[tokio::test]
async fn response_touches_only_the_named_element() {
    let document = watched_document();
    let relay = EventRelay::new(document.clone(), Arc::new(CountingTransport::default()));

    let report = relay
        .on_response(1, r#"[{"id_":"x","key":"disabled","value":true}]"#)
        .expect("apply");

    assert_eq!(report.applied.len(), 1);
    assert_eq!(
        document.property(&ElementId::new("x"), "disabled"),
        Some(PropValue::from(true))
    );
    assert_eq!(document.property(&ElementId::new("other"), "disabled"), None);
    assert_eq!(document.write_log().len(), 1);
}

#[tokio::test]
async fn unknown_target_is_skipped_without_side_effects() {
    let document = watched_document();
    let relay = EventRelay::new(document.clone(), Arc::new(CountingTransport::default()));

    let report = relay
        .on_response(1, r#"[{"id_":"ghost","key":"value","value":"boo"}]"#)
        .expect("apply");

    assert!(report.applied.is_empty());
    assert_eq!(report.missing, vec![ElementId::new("ghost")]);
    assert!(document.write_log().is_empty());
}

#[tokio::test]
async fn malformed_response_applies_nothing() {
    let document = watched_document();
    let relay = EventRelay::new(document.clone(), Arc::new(CountingTransport::default()));

    let err = relay
        .on_response(1, r#"[{"id_":"x","key":"disabled","value":true}, {"id_":"#)
        .expect_err("should fail");

    assert!(err.is_parse());
    assert_eq!(document.property(&ElementId::new("x"), "disabled"), None);
    assert!(document.write_log().is_empty());
}

#[tokio::test]
async fn missing_source_fails_before_sending() {
    let transport = Arc::new(CountingTransport::default());
    let relay = EventRelay::new(watched_document(), transport.clone());

    let err = relay
        .on_event(&ElementId::new("nope"), EventKind::Click)
        .await
        .expect_err("should fail");

    assert!(matches!(err, RelayError::MissingSource(id) if id == ElementId::new("nope")));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_event_surfaces_api_error() {
    let server_url = spawn_rejecting_server().await.expect("spawn server");
    let relay = EventRelay::new(
        watched_document(),
        Arc::new(HttpTransport::new(&server_url).expect("url")),
    );

    let err = relay
        .on_event(&ElementId::new("x"), EventKind::Input)
        .await
        .expect_err("should fail");

    match err {
        RelayError::Rejected(exception) => assert_eq!(exception.code, ErrorCode::NotFound),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn plain_text_failure_keeps_status_and_body() {
    let server_url = spawn_crashing_server().await.expect("spawn server");
    let document = watched_document();
    let relay = EventRelay::new(
        document.clone(),
        Arc::new(HttpTransport::new(&server_url).expect("url")),
    );

    let err = relay
        .on_event(&ElementId::new("x"), EventKind::Input)
        .await
        .expect_err("should fail");

    match err {
        RelayError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "handler panicked");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(document.write_log().is_empty());
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let relay = EventRelay::new(
        watched_document(),
        Arc::new(HttpTransport::new(&format!("http://{addr}")).expect("url")),
    );
    let err = relay
        .on_event(&ElementId::new("x"), EventKind::Input)
        .await
        .expect_err("should fail");
    assert!(matches!(err, RelayError::Transport(_)));
}

async fn race_two_requests(ordering: ResponseOrdering) -> (Arc<MemoryDocument>, ApplyReport) {
    let document = watched_document();
    let transport = Arc::new(GatedTransport::default());
    let relay = EventRelay::new_with_dependencies(
        document.clone(),
        transport.clone(),
        Arc::new(CapabilityExtractor),
        ordered_config(ordering),
    );
    let x = ElementId::new("x");

    let first = tokio::spawn({
        let relay = Arc::clone(&relay);
        let x = x.clone();
        async move { relay.on_event(&x, EventKind::Input).await }
    });
    transport.wait_for_pending(1).await;

    document.set_property(&x, "value", "6".into());
    let second = tokio::spawn({
        let relay = Arc::clone(&relay);
        let x = x.clone();
        async move { relay.on_event(&x, EventKind::Input).await }
    });
    transport.wait_for_pending(2).await;

    transport
        .release(1, r#"[{"id_":"result","key":"innerText","value":"second"}]"#)
        .await;
    second.await.expect("join").expect("second request");
    transport
        .release(0, r#"[{"id_":"result","key":"innerText","value":"first"}]"#)
        .await;
    let first_report = first.await.expect("join").expect("first request");

    (document, first_report)
}

#[tokio::test]
async fn arrival_order_decides_overlapping_responses() {
    let (document, first_report) = race_two_requests(ResponseOrdering::ArrivalOrder).await;

    assert_eq!(first_report.applied.len(), 1);
    assert_eq!(
        document.property(&ElementId::new("result"), "innerText"),
        Some(PropValue::from("first"))
    );
}

#[tokio::test]
async fn latest_request_ordering_drops_stale_responses() {
    let (document, first_report) = race_two_requests(ResponseOrdering::LatestRequest).await;

    assert!(first_report.applied.is_empty());
    assert_eq!(first_report.stale, vec![ElementId::new("result")]);
    assert_eq!(
        document.property(&ElementId::new("result"), "innerText"),
        Some(PropValue::from("second"))
    );
}

#[tokio::test]
async fn gated_requests_carry_the_value_at_send_time() {
    let document = watched_document();
    let transport = Arc::new(GatedTransport::default());
    let relay = EventRelay::new(document.clone(), transport.clone());

    let pending = tokio::spawn({
        let relay = Arc::clone(&relay);
        async move { relay.on_event(&ElementId::new("x"), EventKind::Change).await }
    });
    transport.wait_for_pending(1).await;
    document.set_property(&ElementId::new("x"), "value", "7".into());
    transport.release(0, "[]").await;
    pending.await.expect("join").expect("request");

    let sent = transport.pending.lock().await;
    assert_eq!(sent[0].0.event, "change");
    assert_eq!(sent[0].0.props, r#"{"value":"5"}"#);
}

#[tokio::test]
async fn attach_is_idempotent_and_detach_releases() {
    let document = watched_document();
    let relay = EventRelay::new(document.clone(), Arc::new(CountingTransport::default()));

    assert!(relay.attach().expect("attach"));
    assert!(!relay.attach().expect("second attach"));
    assert_eq!(document.listener_count(), 1);
    assert!(relay.is_attached());

    assert!(relay.detach());
    assert!(!relay.detach());
    assert_eq!(document.listener_count(), 0);
}

#[tokio::test]
async fn dropping_the_relay_releases_its_listener() {
    let document = watched_document();
    let relay = EventRelay::new(document.clone(), Arc::new(CountingTransport::default()));
    relay.attach().expect("attach");
    assert_eq!(document.listener_count(), 1);

    drop(relay);
    assert_eq!(document.listener_count(), 0);
}

#[test]
fn attach_outside_runtime_is_an_error() {
    let relay = EventRelay::new(watched_document(), Arc::new(CountingTransport::default()));
    assert!(matches!(relay.attach(), Err(RelayError::NoRuntime)));
    assert!(!relay.is_attached());
}

#[tokio::test]
async fn dispatched_events_are_relayed_and_published() {
    let reply = vec![UpdateInstruction::new("result", "innerText", "25")];
    let (server_url, received) = spawn_event_server(reply).await.expect("spawn server");
    let document = watched_document();
    let relay = EventRelay::new(
        document.clone(),
        Arc::new(HttpTransport::new(&server_url).expect("url")),
    );
    let mut events = relay.subscribe_events();
    relay.attach().expect("attach");

    assert_eq!(document.dispatch(&ElementId::new("x"), EventKind::Input), 1);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("event");
    match event {
        RelayEvent::Applied {
            source,
            event,
            report,
        } => {
            assert_eq!(source, ElementId::new("x"));
            assert_eq!(event, EventKind::Input);
            assert_eq!(report.sequence, 1);
            assert_eq!(report.applied.len(), 1);
        }
        RelayEvent::Failed { message, .. } => panic!("relay failed: {message}"),
    }
    assert_eq!(received.lock().await.len(), 1);
    assert_eq!(
        document.property(&ElementId::new("result"), "innerText"),
        Some(PropValue::from("25"))
    );
}

#[tokio::test]
async fn failed_dispatch_is_published_not_raised() {
    let server_url = spawn_rejecting_server().await.expect("spawn server");
    let document = watched_document();
    let relay = EventRelay::new(
        document.clone(),
        Arc::new(HttpTransport::new(&server_url).expect("url")),
    );
    let mut events = relay.subscribe_events();
    relay.attach().expect("attach");

    document.dispatch(&ElementId::new("x"), EventKind::Click);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("event");
    assert!(matches!(
        event,
        RelayEvent::Failed { sequence: 1, ref message, .. } if message.contains("unknown widget")
    ));
}

#[tokio::test]
async fn value_extractor_policy_is_pluggable() {
    let document = Arc::new(MemoryDocument::with_elements([ElementSnapshot::checkbox(
        "agree",
    )
    .with_class("widget")
    .with_property("checked", true)]));
    let relay = EventRelay::new_with_dependencies(
        document,
        Arc::new(CountingTransport::default()),
        Arc::new(ValueExtractor),
        RelayConfig::default(),
    );

    let payload = relay
        .build_payload(&ElementId::new("agree"), EventKind::Click)
        .expect("payload");
    assert_eq!(payload.props, r#"{"value":"on"}"#);
}
