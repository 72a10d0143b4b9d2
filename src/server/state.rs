use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::notification::Notifier;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub notifier: Arc<Notifier>,
    /// Cancelled on shutdown; each request publishes under a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(settings: Settings, notifier: Arc<Notifier>, shutdown: CancellationToken) -> Self {
        Self {
            settings: Arc::new(settings),
            notifier,
            shutdown,
        }
    }
}
