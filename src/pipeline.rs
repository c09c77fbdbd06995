//! The harmonization pipeline.
//!
//! ```text
//! controls ──► cache ──► DBSCAN ──► clusters + outliers
//!                                      │
//!                     ┌────────────────┴───────────────┐
//!                 fast mode                         llm mode
//!            heuristic summaries           worker pool + fallbacks
//!                     └────────────────┬───────────────┘
//!                                      ▼
//!     org analysis (spawn_blocking) ─► assembler ─► BatchResult
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::assembler::{assemble, empty_result};
use crate::cache::EmbeddingCache;
use crate::cluster::{Clustering, SemanticClusterer};
use crate::config::Config;
use crate::context;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::generation::{create_generator, TextGenerator};
use crate::models::{BatchResult, Control, OrgContext, SummaryMode};
use crate::summarizer::{summarize_fast, ClusterSummarizer, GroupKey, SummaryJob};

/// Long-lived pipeline instance; construct once and share behind an `Arc`.
pub struct Harmonizer {
    config: Config,
    cache: Arc<EmbeddingCache>,
    clusterer: SemanticClusterer,
    summarizer: ClusterSummarizer,
}

impl Harmonizer {
    /// Build providers from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let provider: Arc<dyn EmbeddingProvider> = Arc::from(
            create_provider(&config.embedding).context("Failed to create embedding provider")?,
        );
        let generator: Arc<dyn TextGenerator> = Arc::from(
            create_generator(&config.summarizer).context("Failed to create text generator")?,
        );
        Ok(Self::with_components(config, provider, generator))
    }

    /// Build around caller-supplied capabilities.
    pub fn with_components(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let cache = Arc::new(EmbeddingCache::new(
            provider,
            &config.cache,
            config.embedding.batch_size,
        ));
        let clusterer = SemanticClusterer::new(cache.clone(), config.clustering.clone());
        let summarizer = ClusterSummarizer::new(
            generator,
            config.summarizer.clone(),
            config.pipeline.max_description_length,
        );
        Self {
            config,
            cache,
            clusterer,
            summarizer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Harmonize one batch. `fast_mode = None` uses the configured default.
    pub async fn harmonize(
        &self,
        controls: Vec<Control>,
        fast_mode: Option<bool>,
        org_context: Option<OrgContext>,
    ) -> Result<BatchResult> {
        let started = Instant::now();
        let fast = fast_mode.unwrap_or(self.config.pipeline.default_fast_mode);
        let mode = if fast { SummaryMode::Fast } else { SummaryMode::Llm };
        let org_context = org_context.map(Arc::new);

        if controls.is_empty() {
            tracing::info!("no controls provided");
            return Ok(empty_result(
                context::analyze(&[], org_context.as_deref()),
                mode,
            ));
        }

        tracing::info!(controls = controls.len(), mode = mode.as_str(), "harmonizing batch");
        let controls = Arc::new(controls);

        let analysis = {
            let controls = controls.clone();
            let org_context = org_context.clone();
            tokio::task::spawn_blocking(move || context::analyze(&controls, org_context.as_deref()))
        };

        let clustering = self.clusterer.cluster(&controls).await?;
        let jobs = jobs_for(clustering);

        let groups = if fast {
            summarize_fast(jobs, org_context.as_deref())
        } else {
            self.summarizer
                .summarize_all(jobs, org_context.as_deref())
                .await
        };

        let analysis = analysis
            .await
            .context("Organization analysis task failed")?;

        let result = assemble(groups, analysis, mode, started.elapsed().as_secs_f64());
        tracing::info!(
            unified_controls = result.total_clusters,
            outliers = result.outlier_count,
            fallbacks = result.fallback_count,
            elapsed_secs = result.processing_time,
            "batch harmonized"
        );
        Ok(result)
    }
}

/// One job per cluster, plus one for the outliers when there are any.
fn jobs_for(clustering: Clustering) -> Vec<SummaryJob> {
    let mut jobs: Vec<SummaryJob> = clustering
        .clusters
        .into_iter()
        .map(|cluster| SummaryJob {
            key: GroupKey::Cluster(cluster.label),
            members: cluster.members,
        })
        .collect();
    if !clustering.outliers.is_empty() {
        jobs.push(SummaryJob {
            key: GroupKey::Outliers,
            members: clustering.outliers,
        });
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cluster;

    fn control(id: &str) -> Control {
        Control {
            framework: "NIST".to_string(),
            control_id: id.to_string(),
            name: id.to_string(),
            description: id.to_string(),
        }
    }

    #[test]
    fn test_jobs_for_adds_outlier_job_only_when_needed() {
        let with_outliers = Clustering {
            clusters: vec![Cluster {
                label: 0,
                members: vec![control("a"), control("b")],
            }],
            outliers: vec![control("c")],
        };
        let keys: Vec<GroupKey> = jobs_for(with_outliers).iter().map(|j| j.key).collect();
        assert_eq!(keys, vec![GroupKey::Cluster(0), GroupKey::Outliers]);

        let without = Clustering {
            clusters: vec![Cluster {
                label: 0,
                members: vec![control("a"), control("b")],
            }],
            outliers: Vec::new(),
        };
        assert_eq!(jobs_for(without).len(), 1);
    }
}
