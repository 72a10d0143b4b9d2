use std::num::ParseIntError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::config::TelegramConfig;
use crate::metrics::DeliveryMetrics;
use crate::queue::{FileMessage, MessageQueue, QueueError, TextMessage};

use super::telegram::{escape_markdown, DeliveryEndpoint, DeliveryError, TelegramClient};

/// Errors that abort notifier construction.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Invalid chat id {value:?}: {source}")]
    InvalidChatId {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Failed to initialize Telegram client: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Failed to start queue consumer: {0}")]
    Queue(#[from] QueueError),
}

/// Delivery counters for the notifier
#[derive(Debug, Default)]
pub struct NotifierStats {
    pub texts_delivered: AtomicU64,
    pub texts_failed: AtomicU64,
    pub files_delivered: AtomicU64,
    pub files_failed: AtomicU64,
}

impl NotifierStats {
    pub fn snapshot(&self) -> NotifierStatsSnapshot {
        NotifierStatsSnapshot {
            texts_delivered: self.texts_delivered.load(Ordering::Relaxed),
            texts_failed: self.texts_failed.load(Ordering::Relaxed),
            files_delivered: self.files_delivered.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of notifier statistics
#[derive(Debug, Clone, Serialize)]
pub struct NotifierStatsSnapshot {
    pub texts_delivered: u64,
    pub texts_failed: u64,
    pub files_delivered: u64,
    pub files_failed: u64,
}

/// Parse the configured chat id into the numeric form the Bot API expects.
pub fn parse_chat_id(value: &str) -> Result<i64, NotifierError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|source| NotifierError::InvalidChatId {
            value: value.to_string(),
            source,
        })
}

/// Binds a queue to Telegram delivery.
///
/// Construction registers both consumers, so a `Notifier` is always
/// draining its queue until [`Notifier::close`] is called. Publishing only
/// enqueues; delivery happens on the queue's consumer tasks and failures
/// there are logged, never reported back to the publisher.
pub struct Notifier {
    queue: Arc<dyn MessageQueue>,
    chat_id: i64,
    stats: Arc<NotifierStats>,
}

impl Notifier {
    /// Create a notifier delivering through the Telegram Bot API.
    pub async fn new(
        config: &TelegramConfig,
        queue: Arc<dyn MessageQueue>,
    ) -> Result<Self, NotifierError> {
        let chat_id = parse_chat_id(&config.chat_id)?;
        let client = TelegramClient::connect(&config.api_url, &config.bot_token).await?;

        Self::with_endpoint(chat_id, Arc::new(client), config.file_caption.clone(), queue).await
    }

    /// Create a notifier delivering through an arbitrary endpoint.
    pub async fn with_endpoint(
        chat_id: i64,
        endpoint: Arc<dyn DeliveryEndpoint>,
        file_caption: String,
        queue: Arc<dyn MessageQueue>,
    ) -> Result<Self, NotifierError> {
        let stats = Arc::new(NotifierStats::default());

        let text_endpoint = endpoint.clone();
        let text_stats = stats.clone();
        let text_handler = move |message: TextMessage| {
            let endpoint = text_endpoint.clone();
            let stats = text_stats.clone();
            async move {
                let text = escape_markdown(&message.text);
                match endpoint.send_text(chat_id, &text).await {
                    Ok(()) => {
                        stats.texts_delivered.fetch_add(1, Ordering::Relaxed);
                        DeliveryMetrics::record("text", true);
                        anyhow::Ok(())
                    }
                    Err(e) => {
                        stats.texts_failed.fetch_add(1, Ordering::Relaxed);
                        DeliveryMetrics::record("text", false);
                        Err(e.into())
                    }
                }
            }
        };

        let file_endpoint = endpoint;
        let file_stats = stats.clone();
        let caption: Arc<str> = file_caption.into();
        let file_handler = move |message: FileMessage| {
            let endpoint = file_endpoint.clone();
            let stats = file_stats.clone();
            let caption = caption.clone();
            async move {
                tracing::info!(
                    filename = %message.filename,
                    content_type = %message.content_type,
                    size = message.len(),
                    "Received a file message"
                );
                match endpoint
                    .send_document(chat_id, message.data, &message.filename, &caption)
                    .await
                {
                    Ok(()) => {
                        stats.files_delivered.fetch_add(1, Ordering::Relaxed);
                        DeliveryMetrics::record("file", true);
                        anyhow::Ok(())
                    }
                    Err(e) => {
                        stats.files_failed.fetch_add(1, Ordering::Relaxed);
                        DeliveryMetrics::record("file", false);
                        Err(e.into())
                    }
                }
            }
        };

        queue.start_consumer(Arc::new(text_handler)).await?;
        queue.start_file_consumer(Arc::new(file_handler)).await?;

        tracing::info!(
            backend = queue.backend_type(),
            chat_id = chat_id,
            "Notifier started"
        );

        Ok(Self {
            queue,
            chat_id,
            stats,
        })
    }

    /// Enqueue a text message for delivery.
    pub async fn publish_message(
        &self,
        cancel: &CancellationToken,
        message: TextMessage,
    ) -> Result<(), QueueError> {
        self.queue.publish(cancel, message).await
    }

    /// Read a file and enqueue it for delivery.
    pub async fn publish_file(
        &self,
        cancel: &CancellationToken,
        file: &mut (dyn AsyncRead + Unpin + Send),
        content_type: &str,
        filename: &str,
    ) -> Result<(), QueueError> {
        self.queue
            .publish_file(cancel, file, content_type, filename)
            .await
    }

    /// Close the underlying queue.
    pub async fn close(&self) -> Result<(), QueueError> {
        tracing::info!("Closing notifier");
        self.queue.close().await
    }

    pub fn backend_type(&self) -> &'static str {
        self.queue.backend_type()
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn stats(&self) -> NotifierStatsSnapshot {
        self.stats.snapshot()
    }
}
