//! Build enqueueing for changed package versions.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::models::{Origin, PackageDraft, QueueMessage, ResolveConfig, Resolver, Source};
use crate::queue::{BuildQueue, Notifier};

/// What happened to one version handed to [`BuildEnqueuer::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Message accepted by the queue
    Enqueued,
    /// No queue configured
    NotSent,
    /// The queue rejected the message or it could not be built
    Failed,
    /// Origin could not be resolved; nothing was sent
    Skipped,
}

impl EnqueueOutcome {
    /// Whether the version must stay unpersisted so the next pass retries it.
    pub fn needs_retry(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

/// Deterministic message id for one package version.
///
/// Hex SHA-256 of `{source_slug}-{package_slug}-{key}`.
pub fn dedup_id(source_slug: &str, package_slug: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}-{}-{}", source_slug, package_slug, key).as_bytes());
    hex::encode(hasher.finalize())
}

/// Build message for `key`, with the package record as body.
pub fn build_message(source: &Source, package: &PackageDraft, key: &str) -> Result<QueueMessage> {
    let group_id = format!("{}-{}", source.slug, package.slug);

    let mut body = serde_json::to_value(package)?;
    let Value::Object(fields) = &mut body else {
        return Err(AppError::validation("package did not serialize to an object"));
    };
    fields.insert("id".into(), json!(group_id));
    fields.insert("version".into(), json!(key));
    fields.insert("source".into(), json!(source.slug));
    fields.insert("type".into(), json!(source.package_type));

    let id = dedup_id(&source.slug, &package.slug, key);
    Ok(QueueMessage {
        id: id.clone(),
        deduplication_id: id,
        group_id,
        body,
    })
}

/// Resolves deferred origins and publishes build messages.
#[derive(Clone)]
pub struct BuildEnqueuer {
    queue: Option<Arc<dyn BuildQueue>>,
    notifier: Option<Arc<dyn Notifier>>,
    max_attempts: u32,
    backoff_ms: u64,
}

impl BuildEnqueuer {
    pub fn new(
        queue: Option<Arc<dyn BuildQueue>>,
        notifier: Option<Arc<dyn Notifier>>,
        config: &ResolveConfig,
    ) -> Self {
        Self {
            queue,
            notifier,
            max_attempts: config.max_attempts.max(1),
            backoff_ms: config.backoff_ms,
        }
    }

    /// Run a resolver until it succeeds or attempts run out.
    ///
    /// Sleeps `attempt * backoff_ms`, jittered by 0.5x to 1.5x, between
    /// attempts.
    async fn resolve_with_retry(&self, resolver: &Resolver) -> Result<String> {
        let mut attempt = 1;
        loop {
            match resolver.resolve().await {
                Ok(url) => return Ok(url),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(AppError::resolve(format!(
                        "gave up after {} attempts: {}",
                        attempt, e
                    )));
                }
                Err(e) => {
                    let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
                    let delay = (attempt as f64 * self.backoff_ms as f64 * jitter) as u64;
                    log::debug!(
                        "Resolution attempt {} failed ({}); retrying in {}ms",
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Resolve the origin of `key` in place if it is deferred.
    async fn resolve_origin(&self, package: &mut PackageDraft, key: &str) -> Result<()> {
        let Some(version) = package.versions.get_mut(key) else {
            return Ok(());
        };
        let Some(Origin::Deferred(resolver)) = &version.origin else {
            return Ok(());
        };

        let resolver = resolver.clone();
        let url = self.resolve_with_retry(&resolver).await?;
        version.origin = Some(Origin::Resolved(url));
        Ok(())
    }

    async fn publish(&self, message: &QueueMessage) -> EnqueueOutcome {
        let outcome = match &self.queue {
            Some(queue) => match queue.send(message).await {
                Ok(()) => {
                    log::info!(
                        "Enqueued build {} ({})",
                        message.group_id,
                        message.body["version"]
                    );
                    EnqueueOutcome::Enqueued
                }
                Err(e) => {
                    log::error!("Failed to enqueue {}: {}", message.group_id, e);
                    return EnqueueOutcome::Failed;
                }
            },
            None => {
                log::info!("No build queue configured; skipping {}", message.group_id);
                EnqueueOutcome::NotSent
            }
        };

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.publish(&message.body).await {
                log::warn!("Failed to notify about {}: {}", message.group_id, e);
            }
        }

        outcome
    }

    /// Enqueue a build for each key of `package`.
    ///
    /// Deferred origins are resolved into `package`, so the caller persists
    /// the resolved URLs. A version whose origin cannot be resolved is
    /// skipped and the rest of the batch continues.
    pub async fn enqueue(
        &self,
        source: &Source,
        package: &mut PackageDraft,
        keys: &[String],
    ) -> Vec<(String, EnqueueOutcome)> {
        let mut outcomes = Vec::with_capacity(keys.len());

        for key in keys {
            if let Err(e) = self.resolve_origin(package, key).await {
                log::error!(
                    "[{}] Skipping {} version {}: {}",
                    source.name,
                    package.slug,
                    key,
                    e
                );
                outcomes.push((key.clone(), EnqueueOutcome::Skipped));
                continue;
            }

            let outcome = match build_message(source, package, key) {
                Ok(message) => self.publish(&message).await,
                Err(e) => {
                    log::error!("[{}] Cannot build message for {}: {}", source.name, key, e);
                    EnqueueOutcome::Failed
                }
            };
            outcomes.push((key.clone(), outcome));
        }

        outcomes
    }
}
