//! Build queue and notification transports.
//!
//! The in-memory implementations back dry runs and tests. SQS and SNS
//! clients are available with the `aws` feature.

#[cfg(feature = "aws")]
pub mod sns;
#[cfg(feature = "aws")]
pub mod sqs;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::QueueMessage;

#[cfg(feature = "aws")]
pub use sns::SnsNotifier;
#[cfg(feature = "aws")]
pub use sqs::SqsQueue;

/// Destination for build requests.
#[async_trait]
pub trait BuildQueue: Send + Sync {
    async fn send(&self, message: &QueueMessage) -> Result<()>;
}

/// Best-effort pub/sub notification of enqueued builds.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, payload: &Value) -> Result<()>;
}

/// Queue that keeps messages in memory.
///
/// Messages with a deduplication id already seen are dropped, like a FIFO
/// queue inside its deduplication window.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<QueueMessage>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<QueueMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BuildQueue for MemoryQueue {
    async fn send(&self, message: &QueueMessage) -> Result<()> {
        let mut messages = self.messages.lock().await;
        if messages
            .iter()
            .any(|m| m.deduplication_id == message.deduplication_id)
        {
            log::debug!("Dropping duplicate message {}", message.deduplication_id);
            return Ok(());
        }
        messages.push(message.clone());
        Ok(())
    }
}

/// Notifier that records payloads in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    payloads: Mutex<Vec<Value>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(&self, payload: &Value) -> Result<()> {
        self.payloads.lock().await.push(payload.clone());
        Ok(())
    }
}
