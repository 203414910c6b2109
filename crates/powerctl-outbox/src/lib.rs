//! The Outbox Relay: polls [`powerctl_db::Store`]'s outbox table and
//! publishes unsent rows to a message bus with at-least-once semantics.
//! Consumers must dedupe on `event.id`.

pub mod publisher;
pub mod relay;

pub use publisher::{EventPublisher, LoggingPublisher, PublishError};
pub use relay::Relay;
