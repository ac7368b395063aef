//! SNS notification topic.

use async_trait::async_trait;
use aws_sdk_sns::Client;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::queue::Notifier;

pub struct SnsNotifier {
    client: Client,
    topic_arn: String,
}

impl SnsNotifier {
    pub fn new(client: Client, topic_arn: impl Into<String>) -> Self {
        Self {
            client,
            topic_arn: topic_arn.into(),
        }
    }

    /// Create a notifier from the default AWS environment.
    pub async fn from_env(topic_arn: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), topic_arn)
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn publish(&self, payload: &Value) -> Result<()> {
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(payload.to_string())
            .send()
            .await
            .map_err(|e| AppError::queue(e.into_service_error()))?;
        Ok(())
    }
}
