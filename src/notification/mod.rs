//! Notification delivery.
//!
//! The [`Notifier`] consumes both queue lanes and forwards every message to
//! a [`DeliveryEndpoint`]; in production that is the Telegram Bot API
//! client in [`telegram`].

mod notifier;
pub mod telegram;

pub use notifier::{parse_chat_id, Notifier, NotifierError, NotifierStatsSnapshot};
pub use telegram::{escape_markdown, DeliveryEndpoint, DeliveryError, TelegramClient};
