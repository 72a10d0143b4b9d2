//! Message types carried by the two queue lanes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::backend::QueueError;

/// Content type applied to files submitted without one.
pub const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

/// A text notification.
///
/// The JSON field is named `message` so payloads stay readable by
/// producers that already publish to the text queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    #[serde(rename = "message")]
    pub text: String,
}

impl TextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(body: &[u8]) -> Result<Self, QueueError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// A file attachment held fully in memory.
///
/// Encoded on the wire as a MessagePack map keyed by `ContentType`, `Data`
/// and `FileName`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMessage {
    #[serde(rename = "ContentType")]
    pub content_type: String,
    #[serde(rename = "Data")]
    pub data: Bytes,
    #[serde(rename = "FileName")]
    pub filename: String,
}

impl FileMessage {
    /// Build a file message, normalizing an empty content type.
    pub fn new(content_type: &str, filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let content_type = if content_type.is_empty() {
            DEFAULT_FILE_CONTENT_TYPE.to_string()
        } else {
            content_type.to_string()
        };

        Self {
            content_type,
            data: data.into(),
            filename: filename.into(),
        }
    }

    /// Read `reader` to the end and wrap the bytes in a file message.
    ///
    /// A failed read is reported as [`QueueError::Read`]; partial payloads are
    /// never enqueued.
    pub async fn read_from<R>(
        reader: &mut R,
        content_type: &str,
        filename: &str,
    ) -> Result<Self, QueueError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.map_err(QueueError::Read)?;
        Ok(Self::new(content_type, filename, data))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, QueueError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(body: &[u8]) -> Result<Self, QueueError> {
        Ok(rmp_serde::from_slice(body)?)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
