//! Core data models flowing through the harmonization pipeline.
//!
//! Inputs ([`Control`], [`OrgContext`]) are deserialized permissively: any
//! missing field defaults to empty rather than rejecting the request.
//! Outputs ([`UnifiedControl`], [`BatchResult`]) are immutable records built
//! once by the assembler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single compliance requirement from a named framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub framework: String,
    pub control_id: String,
    pub name: String,
    pub description: String,
}

/// Optional caller-supplied organization profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgContext {
    pub industry: Option<String>,
    pub existing_controls: Vec<String>,
    pub risk_profile: Option<String>,
    pub compliance_frameworks: Vec<String>,
}

/// A group of controls sharing one clustering label within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub label: usize,
    pub members: Vec<Control>,
}

/// One step of a unified control's implementation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationStep {
    pub step: String,
    pub description: String,
}

impl ImplementationStep {
    pub fn new(step: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            description: description.into(),
        }
    }
}

/// Title, description and steps produced for one group of controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub title: String,
    pub description: String,
    pub implementation_steps: Vec<ImplementationStep>,
}

/// Which path produced a unified control's summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    Llm,
    Fast,
    Fallback,
}

impl SummaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryMode::Llm => "llm",
            SummaryMode::Fast => "fast",
            SummaryMode::Fallback => "fallback",
        }
    }
}

/// A consolidated requirement for one cluster, or for the outlier set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedControl {
    pub id: String,
    pub title: String,
    pub description: String,
    pub implementation_steps: Vec<ImplementationStep>,
    pub mapped_controls: Vec<Control>,
    pub frameworks: Vec<String>,
    pub is_clustered: bool,
    pub mode: SummaryMode,
}

/// An existing organization control that textually overlaps a new control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    pub existing_control: String,
    pub control_id: String,
    pub framework: String,
    pub matched_terms: Vec<String>,
}

/// A new control not covered by any existing organization control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub control_id: String,
    pub framework: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgAnalysis {
    pub existing_controls_count: usize,
    pub industry: Option<String>,
    pub risk_profile: Option<String>,
    pub gaps: Vec<Gap>,
    pub overlaps: Vec<Overlap>,
    pub coverage: f64,
    pub recommendations: Vec<String>,
}

/// Top-level output of one `harmonize` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub mode: SummaryMode,
    pub unified_controls: Vec<UnifiedControl>,
    pub organization_analysis: OrgAnalysis,
    pub total_clusters: usize,
    pub outlier_count: usize,
    pub fallback_count: usize,
    /// Wall-clock seconds.
    pub processing_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A harmonization request: a bare array of controls, or an envelope
/// carrying options alongside them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BatchRequest {
    Controls(Vec<Control>),
    Envelope {
        controls: Vec<Control>,
        #[serde(default)]
        fast_mode: Option<bool>,
        #[serde(default)]
        org_context: Option<OrgContext>,
    },
}

impl BatchRequest {
    pub fn into_parts(self) -> (Vec<Control>, Option<bool>, Option<OrgContext>) {
        match self {
            BatchRequest::Controls(controls) => (controls, None, None),
            BatchRequest::Envelope {
                controls,
                fast_mode,
                org_context,
            } => (controls, fast_mode, org_context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_org_context_is_permissive() {
        let ctx: OrgContext = serde_json::from_str(r#"{"industry": "Finance"}"#).unwrap();
        assert_eq!(ctx.industry.as_deref(), Some("Finance"));
        assert!(ctx.existing_controls.is_empty());
        assert!(ctx.compliance_frameworks.is_empty());

        let empty: OrgContext = serde_json::from_str("{}").unwrap();
        assert!(empty.industry.is_none());
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SummaryMode::Fallback).unwrap(), "\"fallback\"");
        assert_eq!(SummaryMode::Llm.as_str(), "llm");
    }

    #[test]
    fn test_batch_request_shapes() {
        let control = r#"{"framework": "NIST", "control_id": "AC-2", "name": "Account Management", "description": "Manage accounts."}"#;

        let bare: BatchRequest = serde_json::from_str(&format!("[{}]", control)).unwrap();
        let (controls, fast, ctx) = bare.into_parts();
        assert_eq!(controls.len(), 1);
        assert!(fast.is_none() && ctx.is_none());

        let envelope: BatchRequest = serde_json::from_str(&format!(
            r#"{{"controls": [{}], "fast_mode": true, "org_context": {{"industry": "Finance"}}}}"#,
            control
        ))
        .unwrap();
        let (controls, fast, ctx) = envelope.into_parts();
        assert_eq!(controls[0].control_id, "AC-2");
        assert_eq!(fast, Some(true));
        assert_eq!(ctx.unwrap().industry.as_deref(), Some("Finance"));

        assert!(serde_json::from_str::<BatchRequest>(r#"{"items": []}"#).is_err());
    }
}
