//! Outbound build queue message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A build request for one package version.
///
/// `id` and `deduplication_id` are the same deterministic hash, so a FIFO
/// queue drops repeats of the same version enqueued before the queue drains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: String,
    pub deduplication_id: String,
    /// Package composite id `{source}-{slug}`
    pub group_id: String,
    pub body: Value,
}

impl QueueMessage {
    /// Body as a JSON string, the form queue transports accept.
    pub fn body_string(&self) -> String {
        self.body.to_string()
    }
}
