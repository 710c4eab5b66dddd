pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use sqlx::PgPool;

use crate::services::Notifier;

/// Shared application state available to all handlers
pub struct AppState {
    pub db: PgPool,
    pub notifier: Arc<dyn Notifier>,
}
