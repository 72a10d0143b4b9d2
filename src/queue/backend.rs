//! Backend trait for the relay queue.
//!
//! This module defines the contract shared by the in-memory and RabbitMQ
//! backends so they can be swapped at startup without touching the
//! notifier or the HTTP layer.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::metrics::{
    HANDLER_FAILURES_TOTAL, MESSAGES_CONSUMED_TOTAL, MESSAGES_PUBLISHED_TOTAL,
    PUBLISH_FAILURES_TOTAL,
};

use super::models::{FileMessage, TextMessage};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The lane stayed full for the whole publish timeout
    #[error("Queue send timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled before the message was enqueued
    #[error("Publish cancelled by caller")]
    Cancelled,

    /// The queue has been closed
    #[error("Queue is closed")]
    Closed,

    /// A consumer is already draining this lane
    #[error("Consumer already started for {0} lane")]
    ConsumerAlreadyStarted(Lane),

    /// The uploaded file could not be read to the end
    #[error("Failed to read file: {0}")]
    Read(#[source] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding failed
    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed
    #[error("MessagePack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    /// The RabbitMQ backend was selected without connection settings
    #[error("RabbitMQ backend selected but no rabbitmq settings provided")]
    MissingBrokerConfig,

    /// RabbitMQ operation failed
    #[error("RabbitMQ error: {0}")]
    Broker(#[from] lapin::Error),
}

impl QueueError {
    /// Short label used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
            Self::ConsumerAlreadyStarted(_) => "consumer_started",
            Self::Read(_) => "read",
            Self::Json(_) | Self::MsgpackEncode(_) | Self::MsgpackDecode(_) => "serialization",
            Self::MissingBrokerConfig => "config",
            Self::Broker(_) => "broker",
        }
    }
}

/// One of the two independent message streams of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Text,
    File,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked by a consumer for every message taken off a lane.
///
/// Any async closure `Fn(M) -> Future<Output = anyhow::Result<()>>`
/// implements this trait.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync {
    async fn handle(&self, message: M) -> anyhow::Result<()>;
}

#[async_trait]
impl<M, F, Fut> MessageHandler<M> for F
where
    M: Send + 'static,
    F: Fn(M) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: M) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// Backend trait for the relay queue.
///
/// # Thread Safety
///
/// Implementations are shared behind an `Arc` between HTTP handlers and the
/// notifier, so they must be `Send + Sync`.
///
/// # Delivery
///
/// Consumers run on their own tasks. A handler error is logged and the
/// consumer moves on to the next message; nothing is retried.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Backend type identifier (`"memory"` or `"rabbitmq"`).
    fn backend_type(&self) -> &'static str;

    /// Enqueue a text message on the text lane.
    ///
    /// The message content is expected to be validated by the caller.
    async fn publish(
        &self,
        cancel: &CancellationToken,
        message: TextMessage,
    ) -> Result<(), QueueError>;

    /// Read `file` fully into memory and enqueue it on the file lane.
    ///
    /// An empty `content_type` is replaced by `application/octet-stream`.
    async fn publish_file(
        &self,
        cancel: &CancellationToken,
        file: &mut (dyn AsyncRead + Unpin + Send),
        content_type: &str,
        filename: &str,
    ) -> Result<(), QueueError>;

    /// Start draining the text lane into `handler`.
    async fn start_consumer(
        &self,
        handler: Arc<dyn MessageHandler<TextMessage>>,
    ) -> Result<(), QueueError>;

    /// Start draining the file lane into `handler`.
    async fn start_file_consumer(
        &self,
        handler: Arc<dyn MessageHandler<FileMessage>>,
    ) -> Result<(), QueueError>;

    /// Release backend resources and stop the consumers.
    async fn close(&self) -> Result<(), QueueError>;
}

/// Count a publish outcome for `lane`.
pub(crate) fn record_publish(lane: Lane, result: &Result<(), QueueError>) {
    match result {
        Ok(()) => MESSAGES_PUBLISHED_TOTAL
            .with_label_values(&[lane.as_str()])
            .inc(),
        Err(e) => {
            PUBLISH_FAILURES_TOTAL
                .with_label_values(&[lane.as_str(), e.reason()])
                .inc();
            tracing::warn!(lane = %lane, reason = e.reason(), error = %e, "Publish failed");
        }
    }
}

/// Hand one message to a handler, logging and counting a failure.
pub(crate) async fn dispatch<M>(lane: Lane, handler: &dyn MessageHandler<M>, message: M)
where
    M: Send + 'static,
{
    MESSAGES_CONSUMED_TOTAL
        .with_label_values(&[lane.as_str()])
        .inc();

    if let Err(e) = handler.handle(message).await {
        HANDLER_FAILURES_TOTAL
            .with_label_values(&[lane.as_str()])
            .inc();
        tracing::error!(lane = %lane, error = %e, "Error in handler");
    }
}
