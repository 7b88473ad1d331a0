use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use parley_chats::{
    ConnectionRegistry, FanoutComponents, FanoutCoordinator, FanoutSettings, MemoryEventBus,
    MemoryWindowCache, ServerEvent, SqliteConversationStore, StaticDirectory, StoreSequencer,
};
use parley_config::DatabaseConfig;
use parley_database::initialize_database;
use parley_gateway::{
    create_router, websocket::handle_client_event, ClientEvent, GatewayState,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

type TestResult<T = ()> = anyhow::Result<T>;

struct TestContext {
    _temp_dir: TempDir,
    coordinator: FanoutCoordinator,
    router: Router,
}

struct TestResponse {
    status: StatusCode,
    json: Value,
}

impl TestContext {
    async fn new() -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let config = DatabaseConfig {
            url: format!("sqlite://{}", temp_dir.path().join("gateway.db").display()),
            max_connections: 4,
        };
        let pool = initialize_database(&config).await?;
        let store = Arc::new(SqliteConversationStore::new(pool));

        let coordinator = FanoutCoordinator::new(
            FanoutComponents {
                store: store.clone(),
                sequencer: Arc::new(StoreSequencer::new(store)),
                cache: Arc::new(MemoryWindowCache::new(100)),
                bus: Arc::new(MemoryEventBus::new(64)),
                identity: Arc::new(StaticDirectory::with_ids(&["alice", "bob", "carol"])),
            },
            ConnectionRegistry::new(),
            FanoutSettings {
                instance_id: "gw-test".to_string(),
                reorder_window: Duration::from_millis(50),
                history_page_limit: 5,
            },
        );
        let router = create_router(GatewayState::new(coordinator.clone(), 16));

        Ok(Self {
            _temp_dir: temp_dir,
            coordinator,
            router,
        })
    }

    async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> TestResult<TestResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json_body) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json_body)?)
            }
            None => Body::empty(),
        };

        let response = self.router.clone().oneshot(builder.body(body)?).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        Ok(TestResponse { status, json })
    }

    async fn create_conversation(&self) -> TestResult<String> {
        let response = self
            .request(
                Method::POST,
                "/api/conversations",
                Some(json!({ "name": "general", "participant_ids": ["alice", "bob"] })),
            )
            .await?;
        assert_eq!(response.status, StatusCode::CREATED);
        Ok(response.json["id"].as_str().unwrap_or_default().to_string())
    }

    async fn send(&self, conversation_id: &str, sender: &str, content: &str) -> TestResult<TestResponse> {
        self.request(
            Method::POST,
            &format!("/api/conversations/{conversation_id}/messages"),
            Some(json!({ "sender_id": sender, "content": content })),
        )
        .await
    }
}

#[tokio::test]
async fn health_reports_instance_and_counters() -> TestResult {
    let ctx = TestContext::new().await?;

    let response = ctx.request(Method::GET, "/health", None).await?;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json["status"], "ok");
    assert_eq!(response.json["instance_id"], "gw-test");
    assert_eq!(response.json["sequencer"], "store");
    assert_eq!(response.json["metrics"]["messages_persisted"], 0);
    Ok(())
}

#[tokio::test]
async fn conversation_lifecycle_over_rest() -> TestResult {
    let ctx = TestContext::new().await?;
    let conversation_id = ctx.create_conversation().await?;

    let listed = ctx
        .request(Method::GET, "/api/conversations?user_id=bob", None)
        .await?;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.json.as_array().map(Vec::len), Some(1));

    let outsider = ctx
        .request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}?user_id=carol"),
            None,
        )
        .await?;
    assert_eq!(outsider.status, StatusCode::FORBIDDEN);
    assert_eq!(outsider.json["error"], "403");

    let joined = ctx
        .request(
            Method::POST,
            &format!("/api/conversations/{conversation_id}/join"),
            Some(json!({ "user_id": "carol" })),
        )
        .await?;
    assert_eq!(joined.status, StatusCode::OK);
    assert_eq!(joined.json["participant_ids"].as_array().map(Vec::len), Some(3));

    let fetched = ctx
        .request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}?user_id=carol"),
            None,
        )
        .await?;
    assert_eq!(fetched.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn unknown_participant_is_a_bad_request() -> TestResult {
    let ctx = TestContext::new().await?;

    let response = ctx
        .request(
            Method::POST,
            "/api/conversations",
            Some(json!({ "name": "general", "participant_ids": ["alice", "mallory"] })),
        )
        .await?;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.json["message"]
        .as_str()
        .unwrap_or_default()
        .contains("mallory"));
    Ok(())
}

#[tokio::test]
async fn joining_a_missing_conversation_is_not_found() -> TestResult {
    let ctx = TestContext::new().await?;

    let response = ctx
        .request(
            Method::POST,
            "/api/conversations/nope/join",
            Some(json!({ "user_id": "alice" })),
        )
        .await?;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn messages_are_sequenced_and_paged() -> TestResult {
    let ctx = TestContext::new().await?;
    let conversation_id = ctx.create_conversation().await?;

    for (index, content) in ["one", "two", "three"].iter().enumerate() {
        let sent = ctx.send(&conversation_id, "alice", content).await?;
        assert_eq!(sent.status, StatusCode::CREATED);
        assert_eq!(sent.json["position"], (index + 1) as i64);
    }

    let page = ctx
        .request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}/messages?user_id=bob&limit=2&offset=1"),
            None,
        )
        .await?;
    assert_eq!(page.status, StatusCode::OK);
    let contents: Vec<&str> = page
        .json
        .as_array()
        .map(|messages| messages.iter().filter_map(|m| m["content"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(contents, vec!["two", "three"]);

    let recent = ctx
        .request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}/messages/recent?user_id=bob&limit=2"),
            None,
        )
        .await?;
    assert_eq!(recent.status, StatusCode::OK);
    assert_eq!(recent.json[0]["position"], 2);
    assert_eq!(recent.json[1]["position"], 3);
    Ok(())
}

#[tokio::test]
async fn invalid_sends_and_pages_are_rejected() -> TestResult {
    let ctx = TestContext::new().await?;
    let conversation_id = ctx.create_conversation().await?;

    let empty = ctx.send(&conversation_id, "alice", "   ").await?;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let unknown_kind = ctx
        .request(
            Method::POST,
            &format!("/api/conversations/{conversation_id}/messages"),
            Some(json!({ "sender_id": "alice", "content": "hi", "kind": "sticker" })),
        )
        .await?;
    assert_eq!(unknown_kind.status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown_kind.json["error"], "400");

    let outsider = ctx.send(&conversation_id, "carol", "hi").await?;
    assert_eq!(outsider.status, StatusCode::FORBIDDEN);

    let zero_limit = ctx
        .request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}/messages?user_id=alice&limit=0"),
            None,
        )
        .await?;
    assert_eq!(zero_limit.status, StatusCode::BAD_REQUEST);

    // limits above the configured maximum are clamped, not rejected
    for _ in 0..7 {
        ctx.send(&conversation_id, "alice", "spam").await?;
    }
    let clamped = ctx
        .request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}/messages?user_id=alice&limit=500"),
            None,
        )
        .await?;
    assert_eq!(clamped.status, StatusCode::OK);
    assert_eq!(clamped.json.as_array().map(Vec::len), Some(5));
    Ok(())
}

#[tokio::test]
async fn only_the_sender_edits_or_deletes() -> TestResult {
    let ctx = TestContext::new().await?;
    let conversation_id = ctx.create_conversation().await?;
    let sent = ctx.send(&conversation_id, "alice", "draft").await?;
    let message_id = sent.json["id"].as_str().unwrap_or_default().to_string();
    let uri = format!("/api/conversations/{conversation_id}/messages/{message_id}");

    let foreign_edit = ctx
        .request(
            Method::PATCH,
            &uri,
            Some(json!({ "user_id": "bob", "content": "hijacked" })),
        )
        .await?;
    assert_eq!(foreign_edit.status, StatusCode::FORBIDDEN);

    let edited = ctx
        .request(
            Method::PATCH,
            &uri,
            Some(json!({ "user_id": "alice", "content": "final" })),
        )
        .await?;
    assert_eq!(edited.status, StatusCode::OK);
    assert_eq!(edited.json["content"], "final");
    assert_eq!(edited.json["is_edited"], true);

    let deleted = ctx
        .request(Method::DELETE, &format!("{uri}?user_id=alice"), None)
        .await?;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.json["is_deleted"], true);

    let history = ctx
        .request(
            Method::GET,
            &format!("/api/conversations/{conversation_id}/messages?user_id=bob"),
            None,
        )
        .await?;
    assert_eq!(history.json.as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn socket_events_are_applied_for_the_connection_user() -> TestResult {
    let ctx = TestContext::new().await?;
    let conversation_id = ctx.create_conversation().await?;
    ctx.send(&conversation_id, "bob", "earlier").await?;

    let (sender, _queue) = mpsc::channel(16);
    let connection_id = ctx.coordinator.registry().register("alice", sender).await;

    let pong = handle_client_event(&ctx.coordinator, &connection_id, "alice", ClientEvent::Ping).await;
    assert_eq!(pong, ServerEvent::Pong);

    let joined = handle_client_event(
        &ctx.coordinator,
        &connection_id,
        "alice",
        ClientEvent::JoinRoom {
            conversation_id: conversation_id.clone(),
            user_id: "alice".to_string(),
        },
    )
    .await;
    match joined {
        ServerEvent::ChatJoined { messages, .. } => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].message.content, "earlier");
        }
        other => panic!("expected chat_joined, got {other:?}"),
    }

    let impersonation = handle_client_event(
        &ctx.coordinator,
        &connection_id,
        "alice",
        ClientEvent::SendMessage {
            conversation_id: conversation_id.clone(),
            sender_id: "bob".to_string(),
            content: "not me".to_string(),
            kind: None,
            client_ref: None,
        },
    )
    .await;
    assert!(matches!(impersonation, ServerEvent::Error { ref code, .. } if code == "UNAUTHORIZED"));

    let ack = handle_client_event(
        &ctx.coordinator,
        &connection_id,
        "alice",
        ClientEvent::SendMessage {
            conversation_id: conversation_id.clone(),
            sender_id: "alice".to_string(),
            content: "hello".to_string(),
            kind: None,
            client_ref: Some("r-1".to_string()),
        },
    )
    .await;
    match ack {
        ServerEvent::MessageSent { message, client_ref } => {
            assert_eq!(message.position, 2);
            assert_eq!(client_ref.as_deref(), Some("r-1"));
        }
        other => panic!("expected message_sent, got {other:?}"),
    }

    let left = handle_client_event(
        &ctx.coordinator,
        &connection_id,
        "alice",
        ClientEvent::LeaveRoom {
            conversation_id: conversation_id.clone(),
            user_id: "alice".to_string(),
        },
    )
    .await;
    assert_eq!(left, ServerEvent::RoomLeft { conversation_id });
    Ok(())
}
