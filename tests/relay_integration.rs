//! End-to-end relay tests
//!
//! These tests drive the HTTP router with `tower::ServiceExt::oneshot`
//! against the in-memory queue and a recording delivery endpoint, so no
//! Telegram or RabbitMQ access is needed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use notify_relay::config::{QueueConfig, ServerConfig, Settings, TelegramConfig};
use notify_relay::notification::{DeliveryEndpoint, DeliveryError, Notifier};
use notify_relay::queue::{MemoryQueueBackend, MemoryQueueConfig};
use notify_relay::server::{create_app, AppState};

const CHAT_ID: i64 = 42;
const BOUNDARY: &str = "relay-test-boundary";

#[derive(Debug, PartialEq)]
enum Delivered {
    Text(i64, String),
    Document {
        chat_id: i64,
        data: Vec<u8>,
        filename: String,
        caption: String,
    },
}

struct RecordingEndpoint {
    tx: mpsc::UnboundedSender<Delivered>,
}

#[async_trait]
impl DeliveryEndpoint for RecordingEndpoint {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        let _ = self.tx.send(Delivered::Text(chat_id, text.to_string()));
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        data: Bytes,
        filename: &str,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        let _ = self.tx.send(Delivered::Document {
            chat_id,
            data: data.to_vec(),
            filename: filename.to_string(),
            caption: caption.to_string(),
        });
        Ok(())
    }
}

struct TestRelay {
    app: Router,
    notifier: Arc<Notifier>,
    delivered: mpsc::UnboundedReceiver<Delivered>,
}

impl TestRelay {
    async fn next_delivery(&mut self) -> Delivered {
        tokio::time::timeout(Duration::from_secs(5), self.delivered.recv())
            .await
            .expect("delivery timed out")
            .expect("endpoint dropped")
    }
}

fn test_settings() -> Settings {
    Settings {
        server: ServerConfig {
            max_upload_bytes: 1024 * 1024,
            ..Default::default()
        },
        telegram: TelegramConfig {
            bot_token: "123:ABC".to_string(),
            chat_id: CHAT_ID.to_string(),
            ..Default::default()
        },
        queue: QueueConfig::default(),
        rabbitmq: None,
    }
}

async fn create_test_relay() -> TestRelay {
    let settings = test_settings();
    let (tx, delivered) = mpsc::unbounded_channel();
    let queue = Arc::new(MemoryQueueBackend::new(MemoryQueueConfig::default()));
    let notifier = Arc::new(
        Notifier::with_endpoint(
            CHAT_ID,
            Arc::new(RecordingEndpoint { tx }),
            settings.telegram.file_caption.clone(),
            queue,
        )
        .await
        .unwrap(),
    );

    let state = AppState::new(settings, notifier.clone(), CancellationToken::new());
    TestRelay {
        app: create_app(state),
        notifier,
        delivered,
    }
}

fn json_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_request(field: &str, filename: Option<&str>, content_type: &str, data: &[u8]) -> Request<Body> {
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, name),
        None => format!("form-data; name=\"{}\"", field),
    };

    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(format!("Content-Disposition: {}\r\n", disposition).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/send-file")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ============================================================================
// Text ingress
// ============================================================================

#[tokio::test]
async fn test_send_message_is_delivered() {
    let mut relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(json_request("/send", r#"{"message":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["message"], json!("Message sent successfully!"));

    assert_eq!(
        relay.next_delivery().await,
        Delivered::Text(CHAT_ID, "hello".to_string())
    );
}

#[tokio::test]
async fn test_send_message_escapes_markdown() {
    let mut relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(json_request("/send", r#"{"message":"build_42 *failed*"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        relay.next_delivery().await,
        Delivered::Text(CHAT_ID, "build\\_42 \\*failed\\*".to_string())
    );
}

#[tokio::test]
async fn test_messages_are_delivered_in_order() {
    let mut relay = create_test_relay().await;

    for i in 0..5 {
        let body = json!({ "message": format!("msg-{}", i) }).to_string();
        let response = relay
            .app
            .clone()
            .oneshot(json_request("/send", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    for i in 0..5 {
        assert_eq!(
            relay.next_delivery().await,
            Delivered::Text(CHAT_ID, format!("msg-{}", i))
        );
    }
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(json_request("/send", r#"{"message":""}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
}

#[tokio::test]
async fn test_missing_message_field_is_rejected() {
    let relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(json_request("/send", r#"{"text":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_json_is_rejected() {
    let relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(json_request("/send", "{not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
}

#[tokio::test]
async fn test_send_after_close_is_queue_error() {
    let relay = create_test_relay().await;
    relay.notifier.close().await.unwrap();

    let response = relay
        .app
        .clone()
        .oneshot(json_request("/send", r#"{"message":"late"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json(response).await;
    assert_eq!(body["error"]["code"], json!("QUEUE_ERROR"));
}

// ============================================================================
// File ingress
// ============================================================================

#[tokio::test]
async fn test_send_file_is_delivered_with_caption() {
    let mut relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(multipart_request(
            "file",
            Some("a.bin"),
            "application/octet-stream",
            &[0x01, 0x02, 0x03],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["success"], json!(true));

    assert_eq!(
        relay.next_delivery().await,
        Delivered::Document {
            chat_id: CHAT_ID,
            data: vec![0x01, 0x02, 0x03],
            filename: "a.bin".to_string(),
            caption: "Test".to_string(),
        }
    );
}

#[tokio::test]
async fn test_send_file_without_filename_uses_default() {
    let mut relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(multipart_request("file", None, "text/plain", b"report"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    match relay.next_delivery().await {
        Delivered::Document { filename, data, .. } => {
            assert_eq!(filename, "file");
            assert_eq!(data, b"report".to_vec());
        }
        other => panic!("unexpected delivery: {:?}", other),
    }
}

#[tokio::test]
async fn test_send_file_without_file_part_is_rejected() {
    let relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(multipart_request("attachment", Some("a.bin"), "application/octet-stream", b"x"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
}

#[tokio::test]
async fn test_text_and_file_lanes_are_independent() {
    let mut relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(multipart_request("file", Some("log.txt"), "text/plain", b"log"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = relay
        .app
        .clone()
        .oneshot(json_request("/send", r#"{"message":"done"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut texts = 0;
    let mut documents = 0;
    for _ in 0..2 {
        match relay.next_delivery().await {
            Delivered::Text(..) => texts += 1,
            Delivered::Document { .. } => documents += 1,
        }
    }
    assert_eq!((texts, documents), (1, 1));
}

// ============================================================================
// Health & metrics
// ============================================================================

#[tokio::test]
async fn test_health_reports_backend() {
    let relay = create_test_relay().await;

    let response = relay
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["backend"], json!("memory"));
}

#[tokio::test]
async fn test_stats_count_deliveries() {
    let mut relay = create_test_relay().await;

    relay
        .app
        .clone()
        .oneshot(json_request("/send", r#"{"message":"count me"}"#))
        .await
        .unwrap();
    relay.next_delivery().await;
    // Closing joins the consumers, so the counters are settled
    relay.notifier.close().await.unwrap();

    let response = relay
        .app
        .clone()
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["chat_id"], json!(CHAT_ID));
    assert_eq!(body["deliveries"]["texts_delivered"], json!(1));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let mut relay = create_test_relay().await;

    relay
        .app
        .clone()
        .oneshot(json_request("/send", r#"{"message":"metric"}"#))
        .await
        .unwrap();
    relay.next_delivery().await;

    let response = relay
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("relay_messages_published_total"));
}
