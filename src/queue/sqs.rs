//! SQS FIFO build queue.

use async_trait::async_trait;
use aws_sdk_sqs::Client;

use crate::error::{AppError, Result};
use crate::models::QueueMessage;
use crate::queue::BuildQueue;

pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Create a queue client from the default AWS environment.
    pub async fn from_env(queue_url: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), queue_url)
    }
}

#[async_trait]
impl BuildQueue for SqsQueue {
    async fn send(&self, message: &QueueMessage) -> Result<()> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(message.body_string())
            .message_group_id(&message.group_id)
            .message_deduplication_id(&message.deduplication_id)
            .send()
            .await
            .map_err(|e| AppError::queue(e.into_service_error()))?;
        Ok(())
    }
}
