//! RabbitMQ queue backend using lapin.
//!
//! One connection and one channel are opened at construction and shared by
//! every publisher and consumer of the queue. Two durable queues carry the
//! lanes:
//!
//! | Lane | Queue                        | Encoding    | Content type               |
//! |------|------------------------------|-------------|----------------------------|
//! | text | `telegram-notifier-messages` | JSON        | `application/json`         |
//! | file | `telegram-notifier-files`    | MessagePack | `application/octet-stream` |
//!
//! Both queues are declared `durable` and `auto_delete`. Messages are
//! published persistently on the default exchange, routed by queue name.
//!
//! Consumers subscribe with `no_ack`: the broker considers a message
//! delivered as soon as it is pushed to us, before the handler runs. A
//! handler failure therefore loses the message. Undecodable bodies are
//! logged and dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    uri::{AMQPAuthority, AMQPUri, AMQPUserInfo},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RabbitMqConfig;
use crate::metrics::DECODE_FAILURES_TOTAL;

use super::backend::{dispatch, record_publish, Lane, MessageHandler, MessageQueue, QueueError};
use super::models::{FileMessage, TextMessage};

/// Queue name for text notifications.
pub const TEXT_QUEUE: &str = "telegram-notifier-messages";

/// Queue name for file notifications.
pub const FILE_QUEUE: &str = "telegram-notifier-files";

/// AMQP delivery mode for messages that survive a broker restart.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// How long `close` waits for consumer tasks after the channel is closed.
const CONSUMER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// RabbitMQ queue backend.
pub struct RabbitMqQueueBackend {
    connection: Connection,
    channel: Channel,
    closed: AtomicBool,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl RabbitMqQueueBackend {
    /// Connect to the broker, open a channel and declare both queues.
    ///
    /// Any failure here is a startup error; partially opened resources are
    /// closed before returning.
    pub async fn connect(config: &RabbitMqConfig) -> Result<Self, QueueError> {
        tracing::info!(
            host = %config.host,
            port = config.port,
            username = %config.username,
            "Connecting to RabbitMQ"
        );

        let connection =
            Connection::connect_uri(amqp_uri(config), ConnectionProperties::default()).await?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(200, "Channel open failed").await;
                return Err(e.into());
            }
        };

        for name in [TEXT_QUEUE, FILE_QUEUE] {
            if let Err(e) = declare_queue(&channel, name).await {
                let _ = channel.close(200, "Queue declare failed").await;
                let _ = connection.close(200, "Queue declare failed").await;
                return Err(e.into());
            }
        }

        tracing::info!(
            text_queue = TEXT_QUEUE,
            file_queue = FILE_QUEUE,
            "RabbitMQ queues declared"
        );

        Ok(Self {
            connection,
            channel,
            closed: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
        })
    }

    async fn publish_body(
        &self,
        cancel: &CancellationToken,
        queue: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), QueueError> {
        ensure_open(&self.closed)?;

        let properties = BasicProperties::default()
            .with_content_type(content_type.into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_timestamp(Utc::now().timestamp() as u64);

        let publish = async {
            self.channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    body,
                    properties,
                )
                .await?
                .await?;
            Ok::<(), QueueError>(())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            result = publish => result,
        }
    }

    async fn subscribe(&self, lane: Lane, queue: &str) -> Result<Consumer, QueueError> {
        ensure_open(&self.closed)?;

        let consumer_tag = format!("notify-relay-{}-{}", lane, Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            backend = "rabbitmq",
            lane = %lane,
            queue = queue,
            consumer_tag = %consumer_tag,
            "Consumer started"
        );
        Ok(consumer)
    }
}

fn amqp_uri(config: &RabbitMqConfig) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            host: config.host.clone(),
            port: config.port,
        },
        ..Default::default()
    }
}

async fn declare_queue(channel: &Channel, name: &str) -> Result<(), lapin::Error> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                auto_delete: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Fail with `Closed` once `close` has started.
fn ensure_open(closed: &AtomicBool) -> Result<(), QueueError> {
    if closed.load(Ordering::Acquire) {
        return Err(QueueError::Closed);
    }
    Ok(())
}

/// Message bodies from a lapin consumer.
fn delivery_bodies(
    consumer: Consumer,
) -> impl Stream<Item = Result<Vec<u8>, lapin::Error>> + Send {
    consumer.map(|delivery| delivery.map(|delivery| delivery.data))
}

/// Decode and dispatch bodies until the stream ends or fails.
async fn consume<M, S, E>(
    lane: Lane,
    bodies: S,
    handler: Arc<dyn MessageHandler<M>>,
    decode: fn(&[u8]) -> Result<M, QueueError>,
) where
    M: Send + 'static,
    S: Stream<Item = Result<Vec<u8>, E>> + Send,
    E: std::fmt::Display + Send,
{
    futures::pin_mut!(bodies);

    while let Some(body) = bodies.next().await {
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(lane = %lane, error = %e, "RabbitMQ consumer stream failed");
                break;
            }
        };

        tracing::debug!(
            backend = "rabbitmq",
            lane = %lane,
            body_length = body.len(),
            "Received a message"
        );

        match decode(&body) {
            Ok(message) => dispatch(lane, handler.as_ref(), message).await,
            Err(e) => {
                DECODE_FAILURES_TOTAL
                    .with_label_values(&[lane.as_str()])
                    .inc();
                tracing::error!(
                    lane = %lane,
                    error = %e,
                    "Failed to decode message, dropping it"
                );
            }
        }
    }

    tracing::info!(backend = "rabbitmq", lane = %lane, "Consumer stopped");
}

#[async_trait]
impl MessageQueue for RabbitMqQueueBackend {
    fn backend_type(&self) -> &'static str {
        "rabbitmq"
    }

    async fn publish(
        &self,
        cancel: &CancellationToken,
        message: TextMessage,
    ) -> Result<(), QueueError> {
        let result = match message.to_json() {
            Ok(body) => {
                self.publish_body(cancel, TEXT_QUEUE, "application/json", &body)
                    .await
            }
            Err(e) => Err(e),
        };

        record_publish(Lane::Text, &result);
        result
    }

    async fn publish_file(
        &self,
        cancel: &CancellationToken,
        file: &mut (dyn AsyncRead + Unpin + Send),
        content_type: &str,
        filename: &str,
    ) -> Result<(), QueueError> {
        let message = FileMessage::read_from(file, content_type, filename).await?;

        let result = match message.to_msgpack() {
            Ok(body) => {
                self.publish_body(cancel, FILE_QUEUE, "application/octet-stream", &body)
                    .await
            }
            Err(e) => Err(e),
        };

        if result.is_ok() {
            tracing::debug!(
                filename = %message.filename,
                size = message.len(),
                "File published to RabbitMQ"
            );
        }
        record_publish(Lane::File, &result);
        result
    }

    async fn start_consumer(
        &self,
        handler: Arc<dyn MessageHandler<TextMessage>>,
    ) -> Result<(), QueueError> {
        let consumer = self.subscribe(Lane::Text, TEXT_QUEUE).await?;
        let handle = tokio::spawn(consume(
            Lane::Text,
            delivery_bodies(consumer),
            handler,
            TextMessage::from_json,
        ));
        self.consumers.lock().await.push(handle);
        Ok(())
    }

    async fn start_file_consumer(
        &self,
        handler: Arc<dyn MessageHandler<FileMessage>>,
    ) -> Result<(), QueueError> {
        let consumer = self.subscribe(Lane::File, FILE_QUEUE).await?;
        let handle = tokio::spawn(consume(
            Lane::File,
            delivery_bodies(consumer),
            handler,
            FileMessage::from_msgpack,
        ));
        self.consumers.lock().await.push(handle);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(e) = self.channel.close(200, "Normal shutdown").await {
            tracing::warn!(error = %e, "RabbitMQ channel close error");
        }
        let connection_result = self.connection.close(200, "Normal shutdown").await;

        let handles: Vec<JoinHandle<()>> = self.consumers.lock().await.drain(..).collect();
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(CONSUMER_STOP_TIMEOUT, handle).await.is_err() {
                abort.abort();
                tracing::warn!("RabbitMQ consumer did not stop after close, aborted");
            }
        }

        tracing::info!(backend = "rabbitmq", "Queue closed");
        connection_result.map_err(QueueError::from)
    }
}
