use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;

use crate::notification::telegram::DEFAULT_API_URL;

use super::legacy;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rabbitmq: Option<RabbitMqConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body, file uploads included
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token
    pub bot_token: String,
    /// Target chat ID; must parse as an integer
    pub chat_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Caption attached to every forwarded file
    #[serde(default = "default_file_caption")]
    pub file_caption: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Use RabbitMQ instead of the in-memory queue
    #[serde(default)]
    pub use_rabbitmq: bool,
    /// Capacity of each in-memory lane
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// In-memory publish timeout in milliseconds
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// How long closing the in-memory queue waits for consumers, in milliseconds
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RabbitMqConfig {
    pub host: String,
    #[serde(default = "default_rabbitmq_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024 // 20 MiB
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_file_caption() -> String {
    "Test".to_string()
}

fn default_buffer_size() -> usize {
    100
}

fn default_publish_timeout_ms() -> u64 {
    5_000 // 5 seconds
}

fn default_close_timeout_ms() -> u64 {
    10_000 // 10 seconds
}

fn default_rabbitmq_port() -> u16 {
    5672
}

impl Settings {
    /// Load settings from defaults, config files and `RELAY__*` variables.
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false));

        // An explicit file must exist; the flat legacy layout is accepted too
        if let Ok(path) = env::var("CONFIG_PATH") {
            builder = legacy::add_file(builder, Path::new(&path))?;
        }

        // RELAY__TELEGRAM__BOT_TOKEN, RELAY__QUEUE__USE_RABBITMQ, RELAY__RABBITMQ__HOST, ...
        let builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Self::build(builder)
    }

    /// Load settings from a single file on top of the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = legacy::add_file(Self::defaults()?, path.as_ref())?;
        Self::build(builder)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("server.max_upload_bytes", default_max_upload_bytes() as i64)?
            .set_default("telegram.api_url", default_api_url())?
            .set_default("telegram.file_caption", default_file_caption())?
            .set_default("queue.use_rabbitmq", false)?
            .set_default("queue.buffer_size", default_buffer_size() as i64)?
            .set_default("queue.publish_timeout_ms", default_publish_timeout_ms() as i64)?
            .set_default("queue.close_timeout_ms", default_close_timeout_ms() as i64)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations that cannot start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::Message(
                "telegram.bot_token must not be empty".to_string(),
            ));
        }
        if self.queue.use_rabbitmq && self.rabbitmq.is_none() {
            return Err(ConfigError::Message(
                "queue.use_rabbitmq is set but the rabbitmq section is missing".to_string(),
            ));
        }
        if !self.queue.use_rabbitmq && self.queue.buffer_size == 0 {
            return Err(ConfigError::Message(
                "queue.buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_url: default_api_url(),
            file_caption: default_file_caption(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            use_rabbitmq: false,
            buffer_size: default_buffer_size(),
            publish_timeout_ms: default_publish_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}
