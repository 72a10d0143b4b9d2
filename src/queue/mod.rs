//! Relay queue module.
//!
//! Incoming notifications are put on a queue and delivered by background
//! consumers, so the HTTP path never waits on the chat endpoint.
//!
//! # Architecture
//!
//! The queue has two independent lanes, one for text and one for files,
//! and a backend abstraction with two implementations:
//!
//! - `MemoryQueueBackend`: bounded in-process channels (default)
//! - `RabbitMqQueueBackend`: durable RabbitMQ queues
//!
//! Use `create_queue_backend()` to create the backend selected in settings.

pub mod backend;
mod factory;
pub mod memory_backend;
mod models;
pub mod rabbitmq_backend;

pub use backend::{Lane, MessageHandler, MessageQueue, QueueError};
pub use factory::create_queue_backend;
pub use memory_backend::{MemoryQueueBackend, MemoryQueueConfig};
pub use models::{FileMessage, TextMessage, DEFAULT_FILE_CONTENT_TYPE};
pub use rabbitmq_backend::{RabbitMqQueueBackend, FILE_QUEUE, TEXT_QUEUE};
