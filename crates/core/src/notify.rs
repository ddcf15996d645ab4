use tracing::info;

/// Delivery of user-facing notifications ("Account Added", "Sync Failed", ...).
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log instead of a desktop notification center.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title = %title, "{}", body);
    }
}
