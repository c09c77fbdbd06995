//! Organization context analysis.
//!
//! A pure, keyword-level comparison between the caller's existing controls
//! and the incoming batch. It is deliberately coarse: an existing control
//! "overlaps" a new control when any of its meaningful words appears as a
//! whole word in the new control's description.

use std::collections::BTreeSet;

use crate::fallback::{frameworks_of, meaningful_words};
use crate::models::{Control, Gap, OrgAnalysis, OrgContext, Overlap};

/// Known sectors: `(keywords, recommendation)`.
const INDUSTRY_RECOMMENDATIONS: &[(&[&str], &str)] = &[
    (
        &["finance", "financial", "banking", "bank"],
        "Financial services: prioritize transaction integrity, fraud monitoring and cardholder data protection (PCI DSS, SOX).",
    ),
    (
        &["healthcare", "health", "medical", "hospital"],
        "Healthcare: prioritize protection of patient health information, access auditing and breach notification (HIPAA).",
    ),
    (
        &["technology", "tech", "software", "saas"],
        "Technology: prioritize secure development lifecycle, change management and cloud infrastructure hardening (SOC 2, ISO 27001).",
    ),
];

/// Analyze `controls` against the organization profile.
///
/// Returns an empty analysis when no context is given.
pub fn analyze(controls: &[Control], org_context: Option<&OrgContext>) -> OrgAnalysis {
    let Some(ctx) = org_context else {
        return OrgAnalysis::default();
    };

    let description_words: Vec<BTreeSet<String>> = controls
        .iter()
        .map(|c| words_of(&c.description))
        .collect();

    let mut overlaps = Vec::new();
    let mut covered = vec![false; controls.len()];

    for existing in &ctx.existing_controls {
        let tokens: BTreeSet<String> = meaningful_words(existing).collect();
        if tokens.is_empty() {
            continue;
        }
        for (idx, control) in controls.iter().enumerate() {
            let matched: Vec<String> = tokens
                .iter()
                .filter(|t| description_words[idx].contains(*t))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }
            covered[idx] = true;
            overlaps.push(Overlap {
                existing_control: existing.clone(),
                control_id: control.control_id.clone(),
                framework: control.framework.clone(),
                matched_terms: matched,
            });
        }
    }

    let gaps: Vec<Gap> = controls
        .iter()
        .zip(&covered)
        .filter(|(_, covered)| !**covered)
        .map(|(c, _)| Gap {
            control_id: c.control_id.clone(),
            framework: c.framework.clone(),
            name: c.name.clone(),
        })
        .collect();

    let coverage = if controls.is_empty() {
        0.0
    } else {
        covered.iter().filter(|c| **c).count() as f64 / controls.len() as f64
    };

    let mut recommendations = Vec::new();
    if let Some(rec) = ctx.industry.as_deref().and_then(industry_recommendation) {
        recommendations.push(rec.to_string());
    }
    recommendations.extend(framework_notes(controls, &ctx.compliance_frameworks));

    OrgAnalysis {
        existing_controls_count: ctx.existing_controls.len(),
        industry: ctx.industry.clone(),
        risk_profile: ctx.risk_profile.clone(),
        gaps,
        overlaps,
        coverage,
        recommendations,
    }
}

/// All lowercase alphanumeric words of `text`, for whole-word matching.
fn words_of(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn industry_recommendation(industry: &str) -> Option<&'static str> {
    let words = words_of(industry);
    INDUSTRY_RECOMMENDATIONS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| words.contains(*k)))
        .map(|(_, rec)| *rec)
}

fn framework_notes(controls: &[Control], declared: &[String]) -> Vec<String> {
    let declared: Vec<&str> = declared
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect();
    if declared.is_empty() {
        return Vec::new();
    }

    let is_declared = |framework: &str| declared.iter().any(|d| d.eq_ignore_ascii_case(framework));
    let present = frameworks_of(controls);
    let mut notes = Vec::new();

    for framework in &present {
        if !is_declared(framework) {
            notes.push(format!(
                "{} is outside the declared compliance scope; treat its controls as lower priority.",
                framework
            ));
        }
    }
    for framework in &declared {
        let count = controls
            .iter()
            .filter(|c| c.framework.eq_ignore_ascii_case(framework))
            .count();
        if count > 0 {
            notes.push(format!(
                "{} is a declared compliance framework with {} control(s) in this batch; keep them in scope.",
                framework, count
            ));
        }
    }

    notes
}
