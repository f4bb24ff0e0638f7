//! Outbound notification bus.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use super::CollaboratorError;

/// Fire-and-forget publication. Delivery is at least once, so consumers
/// must tolerate duplicates.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, payload: &serde_json::Value)
        -> Result<(), CollaboratorError>;
}

/// Publishes by writing a structured log line.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn publish(
        &self,
        topic: &str,
        payload: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        info!(topic = %topic, payload = %payload, "Publishing notification");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Records every publication.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    events: Mutex<Vec<PublishedEvent>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().await.clone()
    }

    pub async fn topics(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.topic.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn publish(
        &self,
        topic: &str,
        payload: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        self.events.lock().await.push(PublishedEvent {
            topic: topic.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
