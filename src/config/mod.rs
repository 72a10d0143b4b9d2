mod legacy;
mod settings;

pub use settings::{QueueConfig, RabbitMqConfig, ServerConfig, Settings, TelegramConfig};
