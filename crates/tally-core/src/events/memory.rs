//! In-process publisher that records events

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{BatchEvent, EventPublisher};
use crate::error::{Error, Result};

/// Keeps published events in memory
///
/// Clones share the same log. `set_failing(true)` makes every publish fail,
/// which is how tests check that a lost event never changes batch state.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    events: Arc<Mutex<Vec<BatchEvent>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every publish fails
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of everything published so far
    pub fn events(&self) -> Vec<BatchEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish_batch_processed(&self, event: &BatchEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Publish("memory publisher set to fail".to_string()));
        }
        self.events
            .lock()
            .map_err(|_| Error::Publish("event log poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_fails_on_demand() {
        let publisher = MemoryPublisher::new();
        let shared = publisher.clone();

        publisher
            .publish_batch_processed(&BatchEvent::completed("b1", "u1"))
            .await
            .unwrap();
        assert_eq!(shared.events().len(), 1);

        shared.set_failing(true);
        assert!(publisher
            .publish_batch_processed(&BatchEvent::failed("b2", "u1"))
            .await
            .is_err());
        assert_eq!(publisher.events(), vec![BatchEvent::completed("b1", "u1")]);
    }
}
