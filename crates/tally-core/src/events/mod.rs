//! Batch-processed event publishing
//!
//! One event is published per batch reaching a terminal state. Delivery is
//! best effort: callers log a publish failure and move on, the batch status
//! is never touched by it.

mod memory;
mod rabbitmq;

pub use memory::MemoryPublisher;
pub use rabbitmq::RabbitMqPublisher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BrokerConfig;
use crate::error::Result;

/// Terminal outcome carried by an event
///
/// The wire spelling is fixed by downstream consumers: `completed` but `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "Error")]
    Error,
}

/// Payload published when a batch finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvent {
    pub batch_id: String,
    pub status: EventStatus,
    pub userid: String,
}

impl BatchEvent {
    pub fn completed(batch_id: &str, user_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            status: EventStatus::Completed,
            userid: user_id.to_string(),
        }
    }

    pub fn failed(batch_id: &str, user_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            status: EventStatus::Error,
            userid: user_id.to_string(),
        }
    }
}

/// Sink for batch-processed events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_batch_processed(&self, event: &BatchEvent) -> Result<()>;

    /// Short name for logs and the health endpoint
    fn name(&self) -> &'static str;
}

/// Drops every event; used when no broker is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish_batch_processed(&self, event: &BatchEvent) -> Result<()> {
        debug!(
            batch_id = %event.batch_id,
            status = ?event.status,
            "No broker configured, dropping event"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Concrete publisher selected from configuration
#[derive(Clone)]
pub enum Publisher {
    RabbitMq(RabbitMqPublisher),
    Memory(MemoryPublisher),
    Noop(NoopPublisher),
}

impl Publisher {
    /// RabbitMQ when a broker host is configured, otherwise a no-op
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        match RabbitMqPublisher::from_config(config)? {
            Some(publisher) => Ok(Publisher::RabbitMq(publisher)),
            None => Ok(Publisher::Noop(NoopPublisher)),
        }
    }
}

#[async_trait]
impl EventPublisher for Publisher {
    async fn publish_batch_processed(&self, event: &BatchEvent) -> Result<()> {
        match self {
            Publisher::RabbitMq(p) => p.publish_batch_processed(event).await,
            Publisher::Memory(p) => p.publish_batch_processed(event).await,
            Publisher::Noop(p) => p.publish_batch_processed(event).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Publisher::RabbitMq(p) => p.name(),
            Publisher::Memory(p) => p.name(),
            Publisher::Noop(p) => p.name(),
        }
    }
}
