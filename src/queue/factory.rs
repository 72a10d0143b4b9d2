//! Queue backend factory

use std::sync::Arc;
use std::time::Duration;

use crate::config::{QueueConfig as SettingsQueueConfig, RabbitMqConfig};

use super::backend::{MessageQueue, QueueError};
use super::memory_backend::{MemoryQueueBackend, MemoryQueueConfig};
use super::rabbitmq_backend::RabbitMqQueueBackend;

/// Create a queue backend based on configuration.
///
/// Returns the appropriate backend implementation based on `use_rabbitmq`:
/// - `true`: connects a `RabbitMqQueueBackend` (requires `rabbitmq` settings)
/// - `false` (default): returns a `MemoryQueueBackend`
///
/// The backend is chosen once here; nothing switches it later.
///
/// # Errors
///
/// Connection, channel and queue declaration failures are returned as-is and
/// are meant to abort startup.
///
/// # Example
///
/// ```rust,ignore
/// let queue = create_queue_backend(&settings.queue, settings.rabbitmq.as_ref()).await?;
/// ```
pub async fn create_queue_backend(
    settings: &SettingsQueueConfig,
    rabbitmq: Option<&RabbitMqConfig>,
) -> Result<Arc<dyn MessageQueue>, QueueError> {
    if settings.use_rabbitmq {
        let config = rabbitmq.ok_or(QueueError::MissingBrokerConfig)?;
        tracing::info!(backend = "rabbitmq", "Creating RabbitMQ queue backend");
        let backend = RabbitMqQueueBackend::connect(config).await?;
        return Ok(Arc::new(backend));
    }

    let config = MemoryQueueConfig {
        buffer_size: settings.buffer_size,
        publish_timeout: Duration::from_millis(settings.publish_timeout_ms),
        close_timeout: Duration::from_millis(settings.close_timeout_ms),
    };
    tracing::info!(
        backend = "memory",
        buffer_size = config.buffer_size,
        "Creating memory queue backend"
    );
    Ok(Arc::new(MemoryQueueBackend::new(config)))
}
