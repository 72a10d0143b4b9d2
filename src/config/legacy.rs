//! Flat `config.json` layout used by earlier deployments:
//!
//! ```json
//! { "key": "<bot token>", "chatid": "-100...",
//!   "RabbitMQ": { "Host": "mq", "Port": 5672, "Username": "guest",
//!                 "Password": "guest", "UseRabbitMQ": true } }
//! ```
//!
//! Such a file is rewritten into the sectioned layout and then loaded like
//! any other source, so defaults, environment overrides and validation
//! still apply.

use std::path::Path;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat};
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Deserialize)]
pub(crate) struct LegacyConfiguration {
    #[serde(alias = "Key")]
    key: String,
    #[serde(default, alias = "Chatid", alias = "ChatID")]
    chatid: String,
    #[serde(default, rename = "RabbitMQ", alias = "rabbitmq", alias = "rabbitMQ")]
    rabbitmq: Option<LegacyRabbitMq>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyRabbitMq {
    #[serde(default, alias = "host")]
    host: String,
    #[serde(default, alias = "port")]
    port: Option<u16>,
    #[serde(default, alias = "username")]
    username: String,
    #[serde(default, alias = "password")]
    password: String,
    #[serde(default, rename = "UseRabbitMQ", alias = "useRabbitMQ")]
    use_rabbitmq: bool,
}

impl LegacyConfiguration {
    /// Parse `content` if it is a flat JSON configuration, `None` otherwise.
    pub(crate) fn detect(content: &str) -> Result<Option<Self>, ConfigError> {
        let value: Value = match serde_json::from_str(content) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };

        let is_legacy = value
            .as_object()
            .map(|object| object.contains_key("key") || object.contains_key("Key"))
            .unwrap_or(false);
        if !is_legacy {
            return Ok(None);
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ConfigError::Message(format!("Invalid legacy configuration: {}", e)))
    }

    /// The same settings in the sectioned layout.
    pub(crate) fn to_sectioned(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            "telegram".to_string(),
            json!({ "bot_token": self.key, "chat_id": self.chatid }),
        );

        if let Some(rabbitmq) = &self.rabbitmq {
            root.insert(
                "queue".to_string(),
                json!({ "use_rabbitmq": rabbitmq.use_rabbitmq }),
            );
            let mut section = json!({
                "host": rabbitmq.host,
                "username": rabbitmq.username,
                "password": rabbitmq.password,
            });
            if let Some(port) = rabbitmq.port {
                section["port"] = json!(port);
            }
            root.insert("rabbitmq".to_string(), section);
        }

        Value::Object(root)
    }
}

/// Add a required config file, translating the flat layout when found.
pub(crate) fn add_file(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Message(format!("Failed to read {}: {}", path.display(), e)))?;

    match LegacyConfiguration::detect(&content)? {
        Some(legacy) => {
            tracing::info!(path = %path.display(), "Loading flat legacy configuration file");
            Ok(builder.add_source(File::from_str(
                &legacy.to_sectioned().to_string(),
                FileFormat::Json,
            )))
        }
        None => Ok(builder.add_source(File::from(path).required(true))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"{
        "key": "123:ABC",
        "chatid": "-100",
        "RabbitMQ": {
            "Host": "mq",
            "Port": 5673,
            "Username": "guest",
            "Password": "secret",
            "UseRabbitMQ": true
        }
    }"#;

    #[test]
    fn test_detect_flat_layout() {
        let legacy = LegacyConfiguration::detect(LEGACY).unwrap().unwrap();
        let sectioned = legacy.to_sectioned();

        assert_eq!(sectioned["telegram"]["bot_token"], json!("123:ABC"));
        assert_eq!(sectioned["telegram"]["chat_id"], json!("-100"));
        assert_eq!(sectioned["queue"]["use_rabbitmq"], json!(true));
        assert_eq!(sectioned["rabbitmq"]["host"], json!("mq"));
        assert_eq!(sectioned["rabbitmq"]["port"], json!(5673));
        assert_eq!(sectioned["rabbitmq"]["password"], json!("secret"));
    }

    #[test]
    fn test_sectioned_layout_is_not_legacy() {
        let content = r#"{ "telegram": { "bot_token": "t", "chat_id": "1" } }"#;
        assert!(LegacyConfiguration::detect(content).unwrap().is_none());
        assert!(LegacyConfiguration::detect("port = 8080").unwrap().is_none());
    }

    #[test]
    fn test_flat_layout_without_rabbitmq() {
        let legacy = LegacyConfiguration::detect(r#"{ "key": "t", "chatid": "5" }"#)
            .unwrap()
            .unwrap();
        let sectioned = legacy.to_sectioned();

        assert!(sectioned.get("queue").is_none());
        assert!(sectioned.get("rabbitmq").is_none());
    }
}
