use async_trait::async_trait;
use tracing::info;

/// Outbound operator notifications (failures, signals).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Writes notifications to the tracing log. Used when Telegram is not configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        info!(target: "notify", "{message}");
    }
}
