//! Final assembly of a [`BatchResult`].

use chrono::Utc;
use uuid::Uuid;

use crate::fallback::frameworks_of;
use crate::models::{BatchResult, OrgAnalysis, SummaryMode, UnifiedControl};
use crate::summarizer::{GroupKey, GroupSummary};

/// Id of the entry that collects every unclustered control.
pub const OUTLIER_ID: &str = "UC-OUTLIERS";

pub fn unified_control_id(key: GroupKey) -> String {
    match key {
        GroupKey::Cluster(label) => format!("UC-{:03}", label),
        GroupKey::Outliers => OUTLIER_ID.to_string(),
    }
}

fn to_unified(group: GroupSummary) -> UnifiedControl {
    UnifiedControl {
        id: unified_control_id(group.key),
        title: group.summary.title,
        description: group.summary.description,
        implementation_steps: group.summary.implementation_steps,
        frameworks: frameworks_of(&group.members),
        mapped_controls: group.members,
        is_clustered: matches!(group.key, GroupKey::Cluster(_)),
        mode: group.mode,
    }
}

/// Build the batch result from group summaries in any order.
///
/// Real clusters are sorted by label; the outlier entry, if any, goes last.
pub fn assemble(
    mut groups: Vec<GroupSummary>,
    analysis: OrgAnalysis,
    mode: SummaryMode,
    processing_time: f64,
) -> BatchResult {
    groups.sort_by_key(|g| g.key);

    let outlier_count = groups
        .iter()
        .filter(|g| g.key == GroupKey::Outliers)
        .map(|g| g.members.len())
        .sum();

    let unified_controls: Vec<UnifiedControl> = groups.into_iter().map(to_unified).collect();
    let fallback_count = unified_controls
        .iter()
        .filter(|u| u.mode == SummaryMode::Fallback)
        .count();

    BatchResult {
        batch_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        mode,
        total_clusters: unified_controls.len(),
        unified_controls,
        organization_analysis: analysis,
        outlier_count,
        fallback_count,
        processing_time,
        message: None,
    }
}

/// Result for a batch with no controls.
pub fn empty_result(analysis: OrgAnalysis, mode: SummaryMode) -> BatchResult {
    BatchResult {
        message: Some("No controls provided".to_string()),
        ..assemble(Vec::new(), analysis, mode, 0.0)
    }
}
