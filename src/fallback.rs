//! Deterministic, dependency-free summaries.
//!
//! Used when the caller asks for speed over quality (fast mode) and when the
//! generator fails for a cluster. The two uses differ only in detail: fast
//! mode emits no implementation steps, the error fallback emits a generic
//! review → implement → validate plan.

use std::collections::HashMap;

use crate::models::{Control, ImplementationStep, OrgContext, Summary};

/// Words never used in a derived title.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "are", "was", "were", "will", "shall",
    "must", "should", "may", "can", "not", "all", "any", "each", "other", "such", "into", "onto",
    "upon", "its", "their", "has", "have", "been", "being", "per", "via", "use", "used", "using",
    "within", "between", "based", "ensure", "ensures", "control", "controls", "policy",
    "policies", "procedure", "procedures", "requirement", "requirements", "management",
];

const MIN_WORD_LEN: usize = 3;
const TITLE_WORDS: usize = 3;

/// Which of the two call sites the summary is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDetail {
    /// Fast mode: title and description only.
    Fast,
    /// Generator failed: title, description and a generic 3-step plan.
    Error,
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lowercase alphanumeric words of at least three characters, stop-words removed.
pub fn meaningful_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .map(|w| w.to_lowercase())
        .filter(|w| !is_stop_word(w))
}

/// Distinct frameworks in first-seen order.
pub fn frameworks_of(controls: &[Control]) -> Vec<String> {
    let mut seen = Vec::new();
    for control in controls {
        if !control.framework.is_empty() && !seen.contains(&control.framework) {
            seen.push(control.framework.clone());
        }
    }
    seen
}

/// Title from the most frequent meaningful words across member names.
///
/// Ties break by first appearance so the title is stable for a given input.
pub fn derive_title(controls: &[Control]) -> String {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;
    for control in controls {
        for word in meaningful_words(&control.name) {
            let entry = counts.entry(word).or_insert_with(|| {
                order += 1;
                (0, order)
            });
            entry.0 += 1;
        }
    }

    if counts.is_empty() {
        return format!("Security Controls ({} items)", controls.len());
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));

    let words: Vec<String> = ranked
        .into_iter()
        .take(TITLE_WORDS)
        .map(|(word, _)| capitalize(&word))
        .collect();
    format!("{} Controls", words.join(" "))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn describe(controls: &[Control], org_context: Option<&OrgContext>) -> String {
    let frameworks = frameworks_of(controls);
    let noun = if controls.len() == 1 { "control" } else { "controls" };
    let mut description = if frameworks.is_empty() {
        format!("Unified control consolidating {} related {}.", controls.len(), noun)
    } else {
        format!(
            "Unified control consolidating {} related {} from {}.",
            controls.len(),
            noun,
            frameworks.join(", ")
        )
    };

    if let Some(industry) = org_context
        .and_then(|ctx| ctx.industry.as_deref())
        .map(str::trim)
        .filter(|i| !i.is_empty())
    {
        description.push_str(&format!(" Tailored for the {} industry.", industry));
    }

    description
}

fn generic_steps(controls: &[Control]) -> Vec<ImplementationStep> {
    vec![
        ImplementationStep::new(
            "Review existing controls",
            format!(
                "Assess current practices against the {} mapped requirements and document gaps.",
                controls.len()
            ),
        ),
        ImplementationStep::new(
            "Implement unified control",
            "Define and roll out a single procedure that satisfies every mapped requirement.",
        ),
        ImplementationStep::new(
            "Validate effectiveness",
            "Test the control, collect evidence, and schedule periodic reviews.",
        ),
    ]
}

/// Heuristic summary for a group of controls.
pub fn fallback_summary(
    controls: &[Control],
    org_context: Option<&OrgContext>,
    detail: FallbackDetail,
) -> Summary {
    Summary {
        title: derive_title(controls),
        description: describe(controls, org_context),
        implementation_steps: match detail {
            FallbackDetail::Fast => Vec::new(),
            FallbackDetail::Error => generic_steps(controls),
        },
    }
}

/// Last-resort summary when a task's result never arrived.
pub fn minimal_summary(label: Option<usize>, member_count: usize) -> Summary {
    let title = match label {
        Some(label) => format!("Cluster {} Controls", label),
        None => "Unclustered Controls".to_string(),
    };
    Summary {
        title,
        description: format!("Group of {} related controls.", member_count),
        implementation_steps: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(framework: &str, name: &str) -> Control {
        Control {
            framework: framework.to_string(),
            control_id: format!("{}-1", framework),
            name: name.to_string(),
            description: format!("{} description", name),
        }
    }

    #[test]
    fn test_title_from_frequent_words() {
        let controls = vec![
            control("NIST", "Access Control Policy"),
            control("ISO", "User Access Review"),
            control("SOC2", "Privileged Access Review"),
        ];
        // access ×3, review ×2, then user (first seen before privileged).
        assert_eq!(derive_title(&controls), "Access Review User Controls");
    }

    #[test]
    fn test_generic_title_when_no_meaningful_words() {
        let controls = vec![control("NIST", "AC-1"), control("ISO", "of to")];
        assert_eq!(derive_title(&controls), "Security Controls (2 items)");
    }

    #[test]
    fn test_meaningful_words_filters() {
        let words: Vec<String> = meaningful_words("The MFA for all Remote-Access users").collect();
        assert_eq!(words, vec!["mfa", "remote", "access", "users"]);
    }

    #[test]
    fn test_fast_mode_has_no_steps() {
        let controls = vec![control("NIST", "Encryption at rest"), control("PCI", "Encrypt data")];
        let summary = fallback_summary(&controls, None, FallbackDetail::Fast);
        assert!(summary.implementation_steps.is_empty());
        assert_eq!(
            summary.description,
            "Unified control consolidating 2 related controls from NIST, PCI."
        );
    }

    #[test]
    fn test_error_fallback_has_three_steps() {
        let controls = vec![control("NIST", "Encryption at rest")];
        let summary = fallback_summary(&controls, None, FallbackDetail::Error);
        let steps: Vec<&str> = summary
            .implementation_steps
            .iter()
            .map(|s| s.step.as_str())
            .collect();
        assert_eq!(
            steps,
            vec!["Review existing controls", "Implement unified control", "Validate effectiveness"]
        );
    }

    #[test]
    fn test_industry_qualifier() {
        let controls = vec![control("HIPAA", "Audit logging")];
        let ctx = OrgContext {
            industry: Some("Healthcare".to_string()),
            ..OrgContext::default()
        };
        let summary = fallback_summary(&controls, Some(&ctx), FallbackDetail::Fast);
        assert!(summary.description.ends_with("Tailored for the Healthcare industry."));

        let blank = OrgContext {
            industry: Some("  ".to_string()),
            ..OrgContext::default()
        };
        let summary = fallback_summary(&controls, Some(&blank), FallbackDetail::Fast);
        assert!(!summary.description.contains("Tailored"));
    }

    #[test]
    fn test_minimal_summary() {
        let summary = minimal_summary(Some(3), 4);
        assert_eq!(summary.title, "Cluster 3 Controls");
        assert!(summary.description.contains('4'));
        assert!(summary.implementation_steps.is_empty());
        assert_eq!(minimal_summary(None, 1).title, "Unclustered Controls");
    }

    #[test]
    fn test_frameworks_dedup_in_order() {
        let controls = vec![control("ISO", "a"), control("NIST", "b"), control("ISO", "c")];
        assert_eq!(frameworks_of(&controls), vec!["ISO", "NIST"]);
    }
}
