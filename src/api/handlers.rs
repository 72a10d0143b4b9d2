//! Ingress endpoints that hand notifications to the notifier.

use axum::{
    extract::{rejection::JsonRejection, Multipart, State},
    Json,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;

use crate::error::{AppError, Result};
use crate::queue::{QueueError, TextMessage};
use crate::server::AppState;

/// Multipart field carrying the uploaded file
const FILE_FIELD: &str = "file";

/// Filename used when the upload does not declare one
const DEFAULT_FILENAME: &str = "file";

/// Request to relay a text notification
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Text to deliver; must not be empty
    #[serde(default)]
    pub message: String,
}

/// Response for relay operations
#[derive(Debug, Serialize)]
pub struct SendResponse {
    /// Whether the notification was enqueued
    pub success: bool,
    /// Human readable outcome
    pub message: String,
    /// Timestamp of the operation
    pub timestamp: DateTime<Utc>,
}

impl SendResponse {
    fn accepted(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// POST /send - enqueue a text notification
pub async fn send_message(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendResponse>> {
    let Json(request) =
        payload.map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e.body_text())))?;

    if request.message.is_empty() {
        return Err(AppError::Validation(
            "Missing message in request body".to_string(),
        ));
    }

    let cancel = state.shutdown.child_token();
    state
        .notifier
        .publish_message(&cancel, TextMessage::new(request.message))
        .await?;

    Ok(Json(SendResponse::accepted("Message sent successfully!")))
}

/// POST /send-file - enqueue the multipart `file` part as a document
pub async fn send_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SendResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {}", e.body_text())))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME)
            .to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();

        let stream = field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(Box::pin(stream));

        let cancel = state.shutdown.child_token();
        state
            .notifier
            .publish_file(&cancel, &mut reader, &content_type, &filename)
            .await
            .map_err(|e| match e {
                QueueError::Read(source) => {
                    AppError::Validation(format!("Failed to read uploaded file: {}", source))
                }
                other => AppError::Queue(other),
            })?;

        tracing::info!(filename = %filename, content_type = %content_type, "File accepted");
        return Ok(Json(SendResponse::accepted("File sent successfully!")));
    }

    Err(AppError::Validation(
        "Missing file in request body".to_string(),
    ))
}
