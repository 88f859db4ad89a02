//! User-facing notification sink.

use std::sync::Arc;

use tokio::sync::mpsc;

/// Text shown when a request is blocked because the session marker is gone.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired, please log in again";

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A notification as delivered to a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

/// Fire-and-forget sink for messages the user should see.
pub trait Notifier: Send + Sync + std::fmt::Debug {
    fn notify(&self, severity: Severity, message: &str);
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Routes notifications into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(target: "authguard::notify", "{}", message),
            Severity::Warning => tracing::warn!(target: "authguard::notify", "{}", message),
            Severity::Error => tracing::error!(target: "authguard::notify", "{}", message),
        }
    }
}

/// Forwards notifications over an unbounded channel.
///
/// Sending never blocks; a dropped receiver silently discards messages.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        let _ = self.tx.send(Notification {
            severity,
            message: message.to_string(),
        });
    }
}
