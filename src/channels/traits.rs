//! Outbound delivery seam.
//!
//! A **channel** is any transport over which the runtime delivers text to a
//! human (email, WhatsApp, Telegram, mobile push).  The concrete platform
//! adapters live outside this crate; the notification fan-out only depends on
//! this trait.

use async_trait::async_trait;

/// Transport abstraction for delivering messages to a recipient.
///
/// Implementations must be `Send + Sync` so they can be stored in a shared
/// [`super::ChannelManager`] behind an `Arc`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// A unique identifier for this channel type (e.g. `"email"`, `"whatsapp"`).
    fn name(&self) -> &str;

    /// Deliver `message` to `recipient` (a channel-specific address).
    async fn send(&self, message: &str, recipient: Option<&str>) -> Result<(), String>;

    /// Lightweight health check.  Returns `true` when the channel is
    /// operational.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Channel that only logs — the default in tests and headless development.
pub struct LoggingChannel {
    name: String,
}

impl LoggingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Channel for LoggingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str, recipient: Option<&str>) -> Result<(), String> {
        tracing::info!(
            channel = %self.name,
            recipient = recipient.unwrap_or("-"),
            "delivery: {message}"
        );
        Ok(())
    }
}
