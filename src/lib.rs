// Shared components
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer
pub mod notification;
pub mod queue;

// Application layer
pub mod api;
pub mod server;
