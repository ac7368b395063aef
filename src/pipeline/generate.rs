//! Generation pass over all active sources.

use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::models::{PruningConfig, Source, SourceGraph, find_prior};
use crate::platforms::{PlatformContext, PlatformDeps, PlatformRegistry, scrape};

use super::diff::ChangeDetector;
use super::enqueue::{BuildEnqueuer, EnqueueOutcome};
use super::prune::prune;

/// Counters for one generation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Sources scraped successfully
    pub sources: usize,
    pub sources_failed: usize,
    /// Sources whose platform has no registered adapter
    pub sources_skipped: usize,
    /// Packages persisted
    pub packages: usize,
    pub packages_failed: usize,
    pub enqueued: usize,
    /// Builds detected with no queue configured
    pub not_sent: usize,
    /// Builds the queue rejected; retried next pass
    pub send_failed: usize,
    /// Versions dropped because their origin could not be resolved
    pub unresolved: usize,
    /// Packages deactivated by pruning
    pub pruned: u64,
}

impl RunReport {
    fn record(&mut self, outcome: EnqueueOutcome) {
        match outcome {
            EnqueueOutcome::Enqueued => self.enqueued += 1,
            EnqueueOutcome::NotSent => self.not_sent += 1,
            EnqueueOutcome::Failed => self.send_failed += 1,
            EnqueueOutcome::Skipped => self.unresolved += 1,
        }
    }
}

/// Drives adapters, change detection, enqueueing and persistence.
pub struct Generator {
    deps: PlatformDeps,
    registry: PlatformRegistry,
    detector: ChangeDetector,
    enqueuer: BuildEnqueuer,
    pruning: PruningConfig,
}

impl Generator {
    pub fn new(
        deps: PlatformDeps,
        registry: PlatformRegistry,
        enqueuer: BuildEnqueuer,
        pruning: PruningConfig,
    ) -> Self {
        Self {
            deps,
            registry,
            detector: ChangeDetector::new(),
            enqueuer,
            pruning,
        }
    }

    /// Run every active source, or only the one with slug `only`, then prune.
    ///
    /// Only loading the sources is fatal. A failing source is logged and
    /// the pass moves on to the next one.
    pub async fn run(&self, only: Option<&str>, skip_prune: bool) -> Result<RunReport> {
        let started = Utc::now();
        let graphs = self.deps.store.load_sources(only).await?;
        log::info!("Loaded {} active sources", graphs.len());

        let mut report = RunReport::default();
        for graph in graphs {
            let source = graph.source.clone();
            if !self.registry.contains(&source.platform) {
                log::warn!(
                    "[{}] No adapter for platform '{}'; skipping",
                    source.name,
                    source.platform
                );
                report.sources_skipped += 1;
                continue;
            }

            match self.run_source(graph, &mut report).await {
                Ok(()) => report.sources += 1,
                Err(e) => {
                    log::error!("[{}] Source failed: {}", source.name, e);
                    report.sources_failed += 1;
                }
            }
        }

        if skip_prune || !self.pruning.enabled {
            log::info!("Pruning skipped");
        } else {
            match self.prune().await {
                Ok(count) => report.pruned = count,
                Err(e) => log::error!("Pruning failed: {}", e),
            }
        }

        let elapsed = Utc::now() - started;
        log::info!(
            "Pass complete in {}s: {} sources ({} failed, {} skipped), {} packages, \
             {} builds enqueued ({} failed)",
            elapsed.num_seconds(),
            report.sources,
            report.sources_failed,
            report.sources_skipped,
            report.packages,
            report.enqueued,
            report.send_failed
        );
        Ok(report)
    }

    /// Pruning pass on its own.
    pub async fn prune(&self) -> Result<u64> {
        prune(self.deps.store.as_ref(), self.pruning.threshold_secs, Utc::now()).await
    }

    async fn run_source(&self, graph: SourceGraph, report: &mut RunReport) -> Result<()> {
        let source: Source = graph.source.clone();
        log::info!("[{}] Generating packages", source.name);

        let ctx = PlatformContext::new(graph, &self.deps);
        let adapter = self.registry.build(ctx)?;
        let output = scrape(adapter.as_ref()).await?;

        let prior = &adapter.context().packages;
        let seen_at = Utc::now().timestamp();

        for (slug, mut draft) in output.packages {
            let old = find_prior(prior, &draft);
            let keys = self.detector.detect(old, &draft);
            if !keys.is_empty() {
                log::info!(
                    "[{}] {} has {} changed versions",
                    source.name,
                    slug,
                    keys.len()
                );
            }

            let outcomes = self.enqueuer.enqueue(&source, &mut draft, &keys).await;
            let mut retry = Vec::new();
            for (key, outcome) in outcomes {
                report.record(outcome);
                if outcome.needs_retry() {
                    retry.push(key);
                }
            }
            // Left unpersisted so the next pass detects them again
            draft.versions.remove_keys(&retry);
            if draft.version.as_ref().is_some_and(|v| retry.contains(v)) {
                draft.version = None;
            }

            match self.deps.store.upsert_package(source.id, &draft, seen_at).await {
                Ok(_) => report.packages += 1,
                Err(e) => {
                    log::error!("[{}] Failed to persist {}: {}", source.name, slug, e);
                    report.packages_failed += 1;
                }
            }
        }

        Ok(())
    }
}
