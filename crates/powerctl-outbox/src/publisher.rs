//! The message bus the relay publishes to is abstracted behind
//! [`EventPublisher`]. The shipped implementation logs the envelope via
//! `tracing` rather than talking to a real bus; swapping in Kafka/NATS/etc.
//! is a single-implementation change.

use std::fmt;

use async_trait::async_trait;
use tracing::info;

use powerctl_types::OutboxEvent;

#[derive(Debug, Clone)]
pub struct PublishError(pub String);

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publish failed: {}", self.0)
    }
}

impl std::error::Error for PublishError {}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError>;
}

/// Logs the raw envelope bytes at `info` and always succeeds. A "stdout
/// bus" standing in for a real message bus until one is wired up.
#[derive(Debug, Default)]
pub struct LoggingPublisher {
    pub service: String,
}

impl LoggingPublisher {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }
}

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError> {
        let payload = String::from_utf8_lossy(&event.data);
        info!(
            service = %self.service,
            event_id = %event.id,
            event_type = %event.event_type,
            subject = %event.subject,
            payload = %payload,
            "publishing outbox event"
        );
        Ok(())
    }
}
