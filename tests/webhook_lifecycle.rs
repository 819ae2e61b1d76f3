use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore};
use tower::ServiceExt;

use travelbuddy::chatbot::SessionStore;
use travelbuddy::error::{BotError, Result, StartupError};
use travelbuddy::openrouter::{ChatModel, ChatResult, Message, Tool};
use travelbuddy::server::{Lifecycle, Phase, Startup, router};
use travelbuddy::telegram::MessageSender;
use travelbuddy::tools::{
    CallToolResult, ToolConnection, ToolConnector, ToolDescriptor, ToolProviderSpec,
};
use travelbuddy::types::ChatId;

const TOKEN: &str = "123456:test-token";
const REPLY: &str = "Lisbon is lovely in May.";

struct FakeConnection {
    provider: String,
    tools: Vec<ToolDescriptor>,
    closes: AtomicUsize,
}

#[async_trait]
impl ToolConnection for FakeConnection {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<CallToolResult> {
        Ok(CallToolResult {
            content: vec![json!({"type": "text", "text": "ok"})],
            is_error: false,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fake connections and fails for the providers named in `failing`.
///
/// With a `gate`, every connect waits for a permit and signals `entered` first.
#[derive(Default)]
struct FakeConnector {
    failing: HashSet<String>,
    gate: Option<Arc<Semaphore>>,
    entered: Notify,
    opened: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeConnector {
    fn failing(provider: &str) -> Self {
        Self {
            failing: HashSet::from([provider.to_string()]),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn opened(&self) -> Vec<Arc<FakeConnection>> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolConnector for FakeConnector {
    async fn connect(&self, spec: &ToolProviderSpec) -> Result<Arc<dyn ToolConnection>> {
        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            let _permit = gate.acquire().await.unwrap();
        }
        if self.failing.contains(&spec.name) {
            return Err(BotError::ToolConnect {
                provider: spec.name.clone(),
                message: "refused".to_string(),
            });
        }
        let connection = Arc::new(FakeConnection {
            provider: spec.name.clone(),
            tools: vec![ToolDescriptor {
                name: format!("{}_search", spec.name),
                description: Some("Search".to_string()),
                input_schema: json!({"type": "object"}),
            }],
            closes: AtomicUsize::new(0),
        });
        self.opened.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// Always answers with [`REPLY`] after `delay` and remembers the history it was given.
#[derive(Default)]
struct FixedModel {
    delay: Duration,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl FixedModel {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChatModel for FixedModel {
    async fn chat_with_history(
        &self,
        messages: Vec<Message>,
        _dynamic_context: Option<String>,
        _tools: Option<Vec<Tool>>,
    ) -> Result<ChatResult> {
        self.requests.lock().unwrap().push(messages);
        tokio::time::sleep(self.delay).await;
        Ok(ChatResult::TextResponse(REPLY.to_string()))
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(ChatId, String)>>,
}

impl RecordingSender {
    fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_typing(&self, _chat_id: ChatId) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    lifecycle: Arc<Lifecycle>,
    connector: Arc<FakeConnector>,
    model: Arc<FixedModel>,
    sender: Arc<RecordingSender>,
}

impl Harness {
    fn new(connector: FakeConnector) -> Self {
        Self::with_model(connector, FixedModel::default())
    }

    fn with_model(connector: FakeConnector, model: FixedModel) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new()),
            connector: Arc::new(connector),
            model: Arc::new(model),
            sender: Arc::new(RecordingSender::default()),
        }
    }

    fn startup(&self) -> Startup {
        Startup {
            specs: vec![
                ToolProviderSpec::new("flights", "flights-mcp", &[]),
                ToolProviderSpec::new("weather", "weather-mcp", &[]),
                ToolProviderSpec::new("hotels", "hotels-mcp", &[]),
            ],
            connector: Arc::clone(&self.connector) as Arc<dyn ToolConnector>,
            model: Arc::clone(&self.model) as Arc<dyn ChatModel>,
            sender: Arc::clone(&self.sender) as Arc<dyn MessageSender>,
            sessions: SessionStore::default(),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(Arc::clone(&self.lifecycle), TOKEN)
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn post_text(&self, update_id: i64, chat_id: ChatId, text: &str) -> (StatusCode, Value) {
        self.send(webhook_request(TOKEN, update_body(update_id, chat_id, text)))
            .await
    }

    /// Waits until every dispatched update has been handled.
    async fn settle(&self) {
        let app = self.lifecycle.app().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while app.dispatcher.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}

fn update_body(update_id: i64, chat_id: ChatId, text: &str) -> String {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id,
            "date": 1_760_000_000,
            "chat": {"id": chat_id, "type": "private"},
            "from": {"id": chat_id, "is_bot": false, "first_name": "Ana", "username": "ana"},
            "text": text,
        }
    })
    .to_string()
}

fn webhook_request(token: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhook/{token}"))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_check_answers_in_any_phase() {
    let harness = Harness::new(FakeConnector::default());
    let request = || Request::builder().uri("/").body(Body::empty()).unwrap();

    let (status, body) = harness.send(request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Telegram Bot Webhook is running."}));

    harness.lifecycle.start(harness.startup()).await.unwrap();
    let (status, _) = harness.send(request()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn webhook_before_startup_is_unavailable() {
    let harness = Harness::new(FakeConnector::default());

    let (status, body) = harness.post_text(1, 7, "hello").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body,
        json!({"detail": "Service Unavailable: Bot not initialized."})
    );
    assert!(harness.sender.sent().is_empty());
    assert!(harness.model.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn startup_reaches_ready_with_every_provider_connected() {
    let harness = Harness::new(FakeConnector::default());

    let app = harness.lifecycle.start(harness.startup()).await.unwrap();

    assert_eq!(harness.lifecycle.phase().await, Phase::Ready);
    assert_eq!(app.tools.provider_count(), 3);
    assert_eq!(
        app.tools.tool_names(),
        vec!["flights_search", "hotels_search", "weather_search"]
    );
}

#[tokio::test]
async fn failed_connection_aborts_startup_and_closes_opened_providers() {
    let harness = Harness::new(FakeConnector::failing("hotels"));

    let err = harness.lifecycle.start(harness.startup()).await.unwrap_err();

    assert!(matches!(err, StartupError::ToolConnect(_)));
    assert_eq!(harness.lifecycle.phase().await, Phase::StartupFailed);
    assert!(harness.lifecycle.app().await.is_none());

    let opened = harness.connector.opened();
    assert_eq!(opened.len(), 2);
    for connection in &opened {
        assert_eq!(connection.closes.load(Ordering::SeqCst), 1);
    }

    let (status, _) = harness.post_text(1, 7, "hello").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    harness.lifecycle.shutdown().await;
    assert_eq!(harness.lifecycle.phase().await, Phase::StartupFailed);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let harness = Harness::new(FakeConnector::default());
    harness.lifecycle.start(harness.startup()).await.unwrap();

    let err = harness.lifecycle.start(harness.startup()).await.unwrap_err();

    assert!(matches!(err, StartupError::AlreadyStarted));
    assert_eq!(harness.connector.opened().len(), 3);
    assert_eq!(harness.lifecycle.phase().await, Phase::Ready);
}

#[tokio::test]
async fn text_update_gets_exactly_one_reply() {
    let harness = Harness::new(FakeConnector::default());
    harness.lifecycle.start(harness.startup()).await.unwrap();

    let (status, body) = harness.post_text(10, 7, "hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    harness.lifecycle.shutdown().await;

    assert_eq!(harness.sender.sent(), vec![(7, REPLY.to_string())]);
}

#[tokio::test]
async fn new_command_starts_a_fresh_history() {
    let harness = Harness::new(FakeConnector::default());
    harness.lifecycle.start(harness.startup()).await.unwrap();

    harness.post_text(1, 42, "I want to visit Portugal").await;
    harness.settle().await;
    harness.post_text(2, 42, "/new").await;
    harness.settle().await;
    harness.post_text(3, 42, "What about Japan?").await;
    harness.settle().await;

    let requests = harness.model.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    let last = &requests[1];
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].content.as_deref(), Some("What about Japan?"));

    let sent = harness.sender.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|(chat, _)| *chat == 42));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_command_waits_for_the_turn_in_progress() {
    let harness = Harness::with_model(
        FakeConnector::default(),
        FixedModel::slow(Duration::from_millis(200)),
    );
    harness.lifecycle.start(harness.startup()).await.unwrap();

    harness.post_text(1, 42, "I want to visit Portugal").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.post_text(2, 42, "/new").await;
    harness.post_text(3, 42, "What about Japan?").await;
    harness.settle().await;

    let requests = harness.model.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].len(), 1);
    assert_eq!(requests[1][0].content.as_deref(), Some("What about Japan?"));

    let sent = harness.sender.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].1, REPLY);
    assert!(sent[1].1.starts_with("Okay, I've started a new conversation"));
    assert_eq!(sent[2].1, REPLY);
}

#[tokio::test]
async fn history_is_kept_per_chat() {
    let harness = Harness::new(FakeConnector::default());
    harness.lifecycle.start(harness.startup()).await.unwrap();

    harness.post_text(1, 1, "first").await;
    harness.settle().await;
    harness.post_text(2, 2, "other chat").await;
    harness.settle().await;
    harness.post_text(3, 1, "second").await;
    harness.settle().await;

    let requests = harness.model.requests.lock().unwrap().clone();
    assert_eq!(requests[1].len(), 1);
    // first, reply, second
    assert_eq!(requests[2].len(), 3);
}

#[tokio::test]
async fn malformed_update_is_an_internal_error() {
    let harness = Harness::new(FakeConnector::default());
    harness.lifecycle.start(harness.startup()).await.unwrap();

    let (status, body) = harness
        .send(webhook_request(TOKEN, "{not json".to_string()))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"detail": "Internal Server Error"}));
    assert!(harness.sender.sent().is_empty());
}

#[tokio::test]
async fn update_without_message_is_acknowledged() {
    let harness = Harness::new(FakeConnector::default());
    harness.lifecycle.start(harness.startup()).await.unwrap();

    let (status, body) = harness
        .send(webhook_request(TOKEN, json!({"update_id": 5}).to_string()))
        .await;
    harness.lifecycle.shutdown().await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
    assert!(harness.sender.sent().is_empty());
}

#[tokio::test]
async fn wrong_token_path_is_not_found() {
    let harness = Harness::new(FakeConnector::default());
    harness.lifecycle.start(harness.startup()).await.unwrap();

    let (status, _) = harness
        .send(webhook_request("not-the-token", update_body(1, 7, "hello")))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(harness.model.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_is_idempotent_and_closes_each_provider_once() {
    let harness = Harness::new(FakeConnector::default());
    let app = harness.lifecycle.start(harness.startup()).await.unwrap();

    harness.lifecycle.shutdown().await;
    harness.lifecycle.shutdown().await;

    assert_eq!(harness.lifecycle.phase().await, Phase::Stopped);
    for connection in harness.connector.opened() {
        assert_eq!(connection.closes.load(Ordering::SeqCst), 1);
    }
    assert!(matches!(
        app.tools.invoke("flights_search", json!({})).await,
        Err(BotError::ToolUnavailable(_))
    ));

    let (status, _) = harness.post_text(1, 7, "hello").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn shutdown_before_startup_stops_without_connecting() {
    let harness = Harness::new(FakeConnector::default());

    harness.lifecycle.shutdown().await;

    assert_eq!(harness.lifecycle.phase().await, Phase::Stopped);
    assert!(matches!(
        harness.lifecycle.start(harness.startup()).await,
        Err(StartupError::AlreadyStarted)
    ));
    assert!(harness.connector.opened().is_empty());
}

#[tokio::test]
async fn shutdown_while_starting_aborts_and_tears_down() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new(FakeConnector::gated(Arc::clone(&gate)));
    let lifecycle = Arc::clone(&harness.lifecycle);
    let startup = harness.startup();
    let start = tokio::spawn(async move { lifecycle.start(startup).await });

    harness.connector.entered.notified().await;
    assert_eq!(harness.lifecycle.phase().await, Phase::Starting);

    let (status, body) = harness.post_text(1, 7, "hello").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body,
        json!({"detail": "Service Unavailable: Bot not initialized."})
    );

    harness.lifecycle.shutdown().await;
    assert_eq!(harness.lifecycle.phase().await, Phase::Stopped);
    gate.add_permits(3);

    let result = start.await.unwrap();
    assert!(matches!(result, Err(StartupError::Aborted)));
    assert_eq!(harness.lifecycle.phase().await, Phase::Stopped);
    assert!(harness.lifecycle.app().await.is_none());

    let opened = harness.connector.opened();
    assert_eq!(opened.len(), 3);
    for connection in &opened {
        assert_eq!(connection.closes.load(Ordering::SeqCst), 1);
    }
    assert!(harness.sender.sent().is_empty());
    assert!(harness.model.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn updates_accepted_before_shutdown_are_all_answered() {
    let harness = Harness::with_model(
        FakeConnector::default(),
        FixedModel::slow(Duration::from_millis(50)),
    );
    harness.lifecycle.start(harness.startup()).await.unwrap();

    for update_id in 1..=3 {
        let (status, _) = harness.post_text(update_id, 9, "hello").await;
        assert_eq!(status, StatusCode::OK);
    }
    harness.lifecycle.shutdown().await;

    assert_eq!(harness.sender.sent().len(), 3);
    for connection in harness.connector.opened() {
        assert_eq!(connection.closes.load(Ordering::SeqCst), 1);
    }
}
