//! Telegram Bot API delivery endpoint.
//!
//! Text goes through `POST /bot<token>/sendMessage` with the legacy
//! `Markdown` parse mode; files go through `POST /bot<token>/sendDocument`
//! as multipart uploads.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Default Bot API base URL.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Parse mode used for text messages.
const PARSE_MODE: &str = "Markdown";

/// Errors returned by a delivery endpoint.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Transport-level failure (the URL is stripped, it contains the token)
    #[error("Telegram request failed: {0}")]
    Http(reqwest::Error),

    /// The Bot API answered with `ok: false`
    #[error("Telegram API error ({status}): {description}")]
    Api { status: u16, description: String },
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

/// The chat endpoint notifications are delivered to.
#[async_trait]
pub trait DeliveryEndpoint: Send + Sync {
    /// Send already formatted text to `chat_id`.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError>;

    /// Send a binary payload as a named document with a caption.
    async fn send_document(
        &self,
        chat_id: i64,
        data: Bytes,
        filename: &str,
        caption: &str,
    ) -> Result<(), DeliveryError>;
}

/// Escape characters that are significant in Telegram's legacy Markdown.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

/// Bot identity returned by `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Telegram Bot API client.
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    /// Create a client without contacting the API.
    pub fn new(api_url: &str, bot_token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
        }
    }

    /// Create a client and verify the token with `getMe`.
    pub async fn connect(api_url: &str, bot_token: &str) -> Result<Self, DeliveryError> {
        let client = Self::new(api_url, bot_token);
        let me = client.get_me().await?;
        tracing::info!(
            bot_id = me.id,
            bot_username = me.username.as_deref().unwrap_or(""),
            "Authorized on Telegram"
        );
        Ok(client)
    }

    /// Fetch the bot's own identity.
    pub async fn get_me(&self) -> Result<BotUser, DeliveryError> {
        let response = self.client.get(self.method_url("getMe")).send().await?;
        let user = Self::read_response::<BotUser>(response).await?;
        user.ok_or_else(|| DeliveryError::Api {
            status: 200,
            description: "getMe returned no result".to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn read_response<T>(response: reqwest::Response) -> Result<Option<T>, DeliveryError>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        let body: ApiResponse<T> = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(DeliveryError::Api {
                    status: status.as_u16(),
                    description: status.canonical_reason().unwrap_or("unknown").to_string(),
                })
            }
        };

        if !body.ok {
            return Err(DeliveryError::Api {
                status: status.as_u16(),
                description: body
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }

        Ok(body.result)
    }
}

#[async_trait]
impl DeliveryEndpoint for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": PARSE_MODE,
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await?;
        Self::read_response::<serde_json::Value>(response).await?;

        tracing::debug!(chat_id = chat_id, length = text.len(), "Telegram message sent");
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        data: Bytes,
        filename: &str,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        let size = data.len();
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part(
                "document",
                Part::stream_with_length(data, size as u64).file_name(filename.to_string()),
            );

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;
        Self::read_response::<serde_json::Value>(response).await?;

        tracing::debug!(chat_id = chat_id, filename = %filename, size = size, "Telegram document sent");
        Ok(())
    }
}
