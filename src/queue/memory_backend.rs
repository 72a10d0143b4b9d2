//! In-memory queue backend using bounded tokio channels.
//!
//! This module provides a same-process implementation of the `MessageQueue`
//! trait for deployments without a broker. Messages still buffered when the
//! process exits are lost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backend::{dispatch, record_publish, Lane, MessageHandler, MessageQueue, QueueError};
use super::models::{FileMessage, TextMessage};

/// Configuration for the in-memory backend
#[derive(Debug, Clone)]
pub struct MemoryQueueConfig {
    /// Capacity of each lane
    pub buffer_size: usize,
    /// How long a publish waits for buffer space
    pub publish_timeout: Duration,
    /// How long `close` waits for consumers to drain
    pub close_timeout: Duration,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            publish_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(10),
        }
    }
}

/// Producer and consumer ends of one lane.
struct MemoryLane<M> {
    sender: RwLock<Option<mpsc::Sender<M>>>,
    receiver: Mutex<Option<mpsc::Receiver<M>>>,
}

impl<M> MemoryLane<M> {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: RwLock::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        }
    }
}

/// In-memory queue backend.
///
/// Each lane is a bounded `mpsc` channel with a single consumer task.
/// Publishing races buffer space against caller cancellation and a fixed
/// timeout. Closing drops the senders, so consumers drain whatever is
/// still buffered and then exit.
pub struct MemoryQueueBackend {
    text: MemoryLane<TextMessage>,
    files: MemoryLane<FileMessage>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    config: MemoryQueueConfig,
}

impl MemoryQueueBackend {
    /// Create a new memory queue backend with the given configuration.
    pub fn new(config: MemoryQueueConfig) -> Self {
        let capacity = config.buffer_size.max(1);
        Self {
            text: MemoryLane::new(capacity),
            files: MemoryLane::new(capacity),
            consumers: Mutex::new(Vec::new()),
            config,
        }
    }

    async fn enqueue<M>(
        &self,
        lane: Lane,
        slot: &MemoryLane<M>,
        cancel: &CancellationToken,
        message: M,
    ) -> Result<(), QueueError>
    where
        M: Send,
    {
        let sender = slot.sender.read().await.clone();
        let result = match sender {
            None => Err(QueueError::Closed),
            Some(sender) => {
                let timeout = self.config.publish_timeout;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(QueueError::Cancelled),
                    sent = sender.send(message) => sent.map_err(|_| QueueError::Closed),
                    _ = tokio::time::sleep(timeout) => Err(QueueError::Timeout(timeout)),
                }
            }
        };

        record_publish(lane, &result);
        result
    }

    async fn spawn_consumer<M>(
        &self,
        lane: Lane,
        slot: &MemoryLane<M>,
        handler: Arc<dyn MessageHandler<M>>,
    ) -> Result<(), QueueError>
    where
        M: Send + 'static,
    {
        let receiver = slot
            .receiver
            .lock()
            .await
            .take()
            .ok_or(QueueError::ConsumerAlreadyStarted(lane))?;

        let handle = tokio::spawn(consume(lane, receiver, handler));
        self.consumers.lock().await.push(handle);

        tracing::info!(backend = "memory", lane = %lane, "Consumer started");
        Ok(())
    }
}

async fn consume<M>(lane: Lane, mut receiver: mpsc::Receiver<M>, handler: Arc<dyn MessageHandler<M>>)
where
    M: Send + 'static,
{
    while let Some(message) = receiver.recv().await {
        tracing::debug!(backend = "memory", lane = %lane, "Received a message");
        dispatch(lane, handler.as_ref(), message).await;
    }

    tracing::info!(backend = "memory", lane = %lane, "Lane closed, consumer stopped");
}

#[async_trait]
impl MessageQueue for MemoryQueueBackend {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn publish(
        &self,
        cancel: &CancellationToken,
        message: TextMessage,
    ) -> Result<(), QueueError> {
        self.enqueue(Lane::Text, &self.text, cancel, message).await
    }

    async fn publish_file(
        &self,
        cancel: &CancellationToken,
        file: &mut (dyn AsyncRead + Unpin + Send),
        content_type: &str,
        filename: &str,
    ) -> Result<(), QueueError> {
        let message = FileMessage::read_from(file, content_type, filename).await?;
        tracing::debug!(
            filename = %message.filename,
            content_type = %message.content_type,
            size = message.len(),
            "File read into memory"
        );
        self.enqueue(Lane::File, &self.files, cancel, message).await
    }

    async fn start_consumer(
        &self,
        handler: Arc<dyn MessageHandler<TextMessage>>,
    ) -> Result<(), QueueError> {
        self.spawn_consumer(Lane::Text, &self.text, handler).await
    }

    async fn start_file_consumer(
        &self,
        handler: Arc<dyn MessageHandler<FileMessage>>,
    ) -> Result<(), QueueError> {
        self.spawn_consumer(Lane::File, &self.files, handler).await
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.text.sender.write().await.take();
        self.files.sender.write().await.take();

        let handles: Vec<JoinHandle<()>> = self.consumers.lock().await.drain(..).collect();
        let deadline = tokio::time::Instant::now() + self.config.close_timeout;

        for handle in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Consumer task ended abnormally");
                }
                Err(_) => {
                    abort.abort();
                    tracing::warn!(
                        timeout_ms = self.config.close_timeout.as_millis() as u64,
                        "Consumer did not drain before close timeout, aborted"
                    );
                }
            }
        }

        tracing::info!(backend = "memory", "Queue closed");
        Ok(())
    }
}
