//! Density-based clustering of controls by description embedding.
//!
//! DBSCAN over cosine distance. A point is a core point when at least
//! `min_samples` points (itself included) lie within `eps`. Clusters grow
//! from core points; points reachable from no core point are outliers.
//!
//! Points are visited in input order and neighbors are expanded in index
//! order, so a fixed input always yields the same partition and the same
//! labels. Labels are assigned `0, 1, 2, …` in order of each cluster's first
//! core point.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::cache::EmbeddingCache;
use crate::config::ClusteringConfig;
use crate::embedding::cosine_distance;
use crate::models::{Cluster, Control};

/// Partition of one batch into clusters and outliers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clustering {
    /// Sorted by label.
    pub clusters: Vec<Cluster>,
    pub outliers: Vec<Control>,
}

impl Clustering {
    pub fn control_count(&self) -> usize {
        self.clusters.iter().map(|c| c.members.len()).sum::<usize>() + self.outliers.len()
    }
}

/// Run DBSCAN and return one label per point (`None` = noise).
pub fn dbscan<V: AsRef<[f32]>>(points: &[V], eps: f32, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_label = 0usize;

    let neighbors_of = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| cosine_distance(points[i].as_ref(), points[j].as_ref()) <= eps)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let neighbors = neighbors_of(i);
        if neighbors.len() < min_samples {
            continue;
        }

        let label = next_label;
        next_label += 1;
        labels[i] = Some(label);

        let mut queue: VecDeque<usize> = neighbors.into_iter().collect();
        while let Some(j) = queue.pop_front() {
            if labels[j].is_none() {
                labels[j] = Some(label);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;

            let reach = neighbors_of(j);
            if reach.len() >= min_samples {
                queue.extend(reach.into_iter().filter(|&k| !visited[k] || labels[k].is_none()));
            }
        }
    }

    labels
}

/// Group controls by label, preserving input order within each group.
pub fn partition(controls: &[Control], labels: &[Option<usize>]) -> Clustering {
    let mut grouped: BTreeMap<usize, Vec<Control>> = BTreeMap::new();
    let mut outliers = Vec::new();

    for (control, label) in controls.iter().zip(labels) {
        match label {
            Some(label) => grouped.entry(*label).or_default().push(control.clone()),
            None => outliers.push(control.clone()),
        }
    }

    Clustering {
        clusters: grouped
            .into_iter()
            .map(|(label, members)| Cluster { label, members })
            .collect(),
        outliers,
    }
}

/// Embeds controls through the shared cache and clusters them.
pub struct SemanticClusterer {
    cache: Arc<EmbeddingCache>,
    config: ClusteringConfig,
}

impl SemanticClusterer {
    pub fn new(cache: Arc<EmbeddingCache>, config: ClusteringConfig) -> Self {
        Self { cache, config }
    }

    /// Cluster `controls` by description.
    ///
    /// A control whose embedding fails is routed to the outliers. If every
    /// embedding fails the provider is treated as down and the call errors.
    pub async fn cluster(&self, controls: &[Control]) -> Result<Clustering> {
        if controls.is_empty() {
            return Ok(Clustering::default());
        }

        let texts: Vec<String> = controls.iter().map(|c| c.description.clone()).collect();
        let results = self.cache.get_many(&texts).await;

        let mut embedded_idx = Vec::with_capacity(controls.len());
        let mut vectors = Vec::with_capacity(controls.len());
        let mut first_error = None;

        for (idx, result) in results.into_iter().enumerate() {
            match result {
                Ok(vector) => {
                    embedded_idx.push(idx);
                    vectors.push(vector);
                }
                Err(e) => {
                    tracing::warn!(
                        control_id = %controls[idx].control_id,
                        framework = %controls[idx].framework,
                        error = %e,
                        "embedding failed; treating control as an outlier"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if vectors.is_empty() {
            bail!(
                "Embedding failed for all {} controls: {}",
                controls.len(),
                first_error.unwrap_or_default()
            );
        }

        let points: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
        let embedded_labels = dbscan(&points, self.config.eps, self.config.min_samples);

        let mut labels = vec![None; controls.len()];
        for (idx, label) in embedded_idx.into_iter().zip(embedded_labels) {
            labels[idx] = label;
        }

        let clustering = partition(controls, &labels);
        tracing::info!(
            controls = controls.len(),
            clusters = clustering.clusters.len(),
            outliers = clustering.outliers.len(),
            eps = self.config.eps,
            min_samples = self.config.min_samples,
            "clustered controls"
        );
        Ok(clustering)
    }
}
