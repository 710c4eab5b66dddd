//! Operational Notification Sink
//!
//! Fire-and-forget outbound alerts (low-stock warnings, the daily ban
//! report). Delivery is detached from the request path: callers spawn the
//! send and never observe its outcome, so a slow or failing sink cannot add
//! latency or failure coupling to API responses.

use async_trait::async_trait;
use tracing::info;

/// Outbound notification sink.
///
/// Implementations must swallow their own failures; `notify` has no error
/// channel on purpose so no caller can come to depend on delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str);
}

/// Notifier that writes alerts to the structured log.
///
/// Stands in for the mail sink in development and tests.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        info!(subject, "operational alert:\n{body}");
    }
}
