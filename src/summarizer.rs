//! Concurrent summarization of clusters.
//!
//! One job per cluster plus one for the merged outlier set. Jobs go into a
//! shared queue drained by a fixed pool of `min(jobs, max_workers)` tokio
//! tasks (at least one). Each worker sends a `(key, TaskOutcome)` pair on a
//! result channel; a single aggregation step turns outcomes into summaries:
//!
//! | Outcome | Summary | Mode |
//! |---------|---------|------|
//! | `Success` | generator output | `llm` |
//! | `Failure` (timeout, transport, malformed JSON) | heuristic, 3 generic steps | `fallback` |
//! | missing (task panicked) | `"Cluster <label> Controls"`, no steps | `fallback` |
//!
//! One job's failure never cancels the others: every task runs in its own
//! tokio task, so even a panic only loses that job's result and the worker
//! keeps draining the queue. The batch always completes. Results come back in completion order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::SummarizerConfig;
use crate::error::SummaryError;
use crate::extract::parse_summary;
use crate::fallback::{fallback_summary, minimal_summary, FallbackDetail};
use crate::generation::TextGenerator;
use crate::models::{Control, OrgContext, Summary, SummaryMode};

/// Identifies a summarization job within one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Cluster(usize),
    Outliers,
}

impl GroupKey {
    pub fn label(&self) -> Option<usize> {
        match self {
            GroupKey::Cluster(label) => Some(*label),
            GroupKey::Outliers => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryJob {
    pub key: GroupKey,
    pub members: Vec<Control>,
}

/// Result of one summarization task.
///
/// A `Failure` is summarized heuristically with generic steps. The bare
/// `"Cluster <label> Controls"` summary is reserved for tasks that never
/// report an outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(Summary),
    Failure(SummaryError),
}

/// A finished job: the members it covered and how it was summarized.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub members: Vec<Control>,
    pub summary: Summary,
    pub mode: SummaryMode,
}

pub struct ClusterSummarizer {
    generator: Arc<dyn TextGenerator>,
    config: SummarizerConfig,
    task_timeout: Duration,
    max_description_length: usize,
}

impl ClusterSummarizer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        config: SummarizerConfig,
        max_description_length: usize,
    ) -> Self {
        let task_timeout = Duration::from_secs(config.timeout_secs);
        Self {
            generator,
            config,
            task_timeout,
            max_description_length,
        }
    }

    /// Override the per-task deadline.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Summarize every job through the generator on a bounded worker pool.
    pub async fn summarize_all(
        &self,
        jobs: Vec<SummaryJob>,
        org_context: Option<&OrgContext>,
    ) -> Vec<GroupSummary> {
        let workers = self.config.pool_size(jobs.len());
        tracing::info!(jobs = jobs.len(), workers, "summarizing clusters");

        let members_by_key: HashMap<GroupKey, Vec<Control>> = jobs
            .iter()
            .map(|job| (job.key, job.members.clone()))
            .collect();
        let submitted: Vec<GroupKey> = jobs.iter().map(|job| job.key).collect();

        let queue: VecDeque<(GroupKey, String)> = jobs
            .iter()
            .map(|job| {
                (
                    job.key,
                    build_prompt(&job.members, org_context, self.max_description_length),
                )
            })
            .collect();
        let queue = Arc::new(Mutex::new(queue));
        let (tx, mut rx) = mpsc::unbounded_channel::<(GroupKey, TaskOutcome)>();

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let queue = queue.clone();
            let tx = tx.clone();
            let generator = self.generator.clone();
            let temperature = self.config.temperature;
            let timeout = self.task_timeout;

            pool.spawn(async move {
                loop {
                    let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                    let Some((key, prompt)) = next else {
                        break;
                    };
                    tracing::debug!(worker, ?key, "summarization task started");
                    // Each task runs in its own tokio task so a panicking
                    // generator loses only that job's result.
                    let generator = generator.clone();
                    let task = tokio::spawn(async move {
                        run_task(generator.as_ref(), &prompt, temperature, timeout).await
                    });
                    match task.await {
                        Ok(outcome) => {
                            if tx.send((key, outcome)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(worker, ?key, error = %e, "summarization task aborted");
                        }
                    }
                }
            });
        }
        drop(tx);

        let mut completed: Vec<(GroupKey, TaskOutcome)> = Vec::with_capacity(submitted.len());
        while let Some(result) = rx.recv().await {
            completed.push(result);
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "summarization worker terminated abnormally");
            }
        }

        let mut results = Vec::with_capacity(submitted.len());
        let mut done = std::collections::HashSet::new();

        for (key, outcome) in completed {
            let members = members_by_key.get(&key).cloned().unwrap_or_default();
            done.insert(key);
            let (summary, mode) = match outcome {
                TaskOutcome::Success(summary) => (summary, SummaryMode::Llm),
                // A reported failure still knows its members, so it gets the
                // heuristic summary with steps; the minimal summary is kept
                // for jobs whose result never arrived.
                TaskOutcome::Failure(reason) => {
                    tracing::warn!(?key, error = %reason, "summarization failed; using fallback summary");
                    (
                        fallback_summary(&members, org_context, FallbackDetail::Error),
                        SummaryMode::Fallback,
                    )
                }
            };
            results.push(GroupSummary {
                key,
                members,
                summary,
                mode,
            });
        }

        for key in submitted {
            if done.contains(&key) {
                continue;
            }
            tracing::error!(?key, "summarization result lost; using minimal summary");
            let members = members_by_key.get(&key).cloned().unwrap_or_default();
            results.push(GroupSummary {
                key,
                summary: minimal_summary(key.label(), members.len()),
                members,
                mode: SummaryMode::Fallback,
            });
        }

        results
    }

}

/// Heuristic summaries for every job, synchronously.
pub fn summarize_fast(jobs: Vec<SummaryJob>, org_context: Option<&OrgContext>) -> Vec<GroupSummary> {
    jobs.into_iter()
        .map(|job| GroupSummary {
            key: job.key,
            summary: fallback_summary(&job.members, org_context, FallbackDetail::Fast),
            members: job.members,
            mode: SummaryMode::Fast,
        })
        .collect()
}

/// One generator call under a deadline, parsed into an outcome.
pub async fn run_task(
    generator: &dyn TextGenerator,
    prompt: &str,
    temperature: f32,
    timeout: Duration,
) -> TaskOutcome {
    match tokio::time::timeout(timeout, generator.generate(prompt, temperature)).await {
        Err(_) => TaskOutcome::Failure(SummaryError::Timeout(timeout.as_secs())),
        Ok(Err(e)) => TaskOutcome::Failure(SummaryError::Transport(e.to_string())),
        Ok(Ok(text)) => match parse_summary(&text) {
            Some(summary) => TaskOutcome::Success(summary),
            None => TaskOutcome::Failure(SummaryError::MalformedResponse(preview(&text, 120))),
        },
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "empty response".to_string();
    }
    truncate_chars(trimmed, max_chars)
}

/// Truncate to `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

/// Prompt asking the generator for one unified control as strict JSON.
pub fn build_prompt(
    members: &[Control],
    org_context: Option<&OrgContext>,
    max_description_length: usize,
) -> String {
    let formatted: Vec<String> = members
        .iter()
        .map(|c| {
            format!(
                "- [{}] {} - {}: {}",
                c.framework,
                c.control_id,
                c.name,
                truncate_chars(&c.description, max_description_length)
            )
        })
        .collect();

    let tailoring = org_context
        .and_then(|ctx| ctx.industry.as_deref())
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .map(|industry| {
            format!(
                "\nTailor the wording and steps to an organization in the {} industry.\n",
                industry
            )
        })
        .unwrap_or_default();

    format!(
        r#"You are a cybersecurity compliance assistant tasked with summarizing semantically similar security controls.

Using the following list of security controls, generate a unified title, a concise 2-3 sentence description, and 2-3 implementation steps in strict JSON format.
{tailoring}
### Input Controls ###
{controls}

### Output Format ###
Respond with ONLY a valid JSON object like this:

{{
  "title": "Short but meaningful unified control title",
  "description": "2-3 sentence unified summary combining all control goals",
  "implementation_steps": [
    {{
      "step": "Step Title 1",
      "description": "What should be done and why"
    }},
    {{
      "step": "Step Title 2",
      "description": "Action with clarity and value"
    }}
  ]
}}

DO NOT include explanations, markdown, or text outside the JSON object.
Make sure it is valid JSON.
"#,
        tailoring = tailoring,
        controls = formatted.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn control(framework: &str, id: &str, name: &str) -> Control {
        Control {
            framework: framework.to_string(),
            control_id: id.to_string(),
            name: name.to_string(),
            description: format!("{} description", name),
        }
    }

    struct ScriptedGenerator {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    /// Behavior is keyed off control ids in the prompt.
    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, prompt: &str, _temperature: f32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if prompt.contains("HANG-1") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if prompt.contains("FAIL-1") {
                bail!("connection refused");
            }
            if prompt.contains("PROSE-1") {
                return Ok("I'm not able to produce JSON today.".to_string());
            }
            if prompt.contains("PANIC-1") {
                panic!("generator bug");
            }
            Ok("Here you go:\n```json\n{\"title\": \"Unified\", \"description\": \"Merged.\", \"implementation_steps\": [{\"step\": \"Do\", \"description\": \"it\"}]}\n```".to_string())
        }
    }

    fn summarizer(generator: Arc<ScriptedGenerator>, max_workers: usize) -> ClusterSummarizer {
        ClusterSummarizer::new(
            generator,
            SummarizerConfig {
                max_workers,
                ..SummarizerConfig::default()
            },
            200,
        )
        .with_task_timeout(Duration::from_millis(300))
    }

    fn job(label: usize, id: &str) -> SummaryJob {
        SummaryJob {
            key: GroupKey::Cluster(label),
            members: vec![
                control("NIST", id, "Access Review"),
                control("ISO", "A.9.2.5", "Access Review"),
            ],
        }
    }

    fn by_key(results: Vec<GroupSummary>) -> HashMap<GroupKey, GroupSummary> {
        results.into_iter().map(|r| (r.key, r)).collect()
    }

    #[tokio::test]
    async fn test_success_uses_generator_output() {
        let generator = Arc::new(ScriptedGenerator::new());
        let results = summarizer(generator.clone(), 4)
            .summarize_all(vec![job(0, "AC-1"), job(1, "AC-2")], None)
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.mode == SummaryMode::Llm));
        assert!(results.iter().all(|r| r.summary.title == "Unified"));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_cluster() {
        let generator = Arc::new(ScriptedGenerator::new());
        let results = by_key(
            summarizer(generator, 2)
                .summarize_all(
                    vec![job(0, "AC-1"), job(1, "FAIL-1"), job(2, "PROSE-1"), job(3, "HANG-1")],
                    None,
                )
                .await,
        );

        assert_eq!(results.len(), 4);
        assert_eq!(results[&GroupKey::Cluster(0)].mode, SummaryMode::Llm);
        for label in 1..=3 {
            let r = &results[&GroupKey::Cluster(label)];
            assert_eq!(r.mode, SummaryMode::Fallback);
            assert_eq!(r.summary.implementation_steps.len(), 3);
            assert_eq!(r.members.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_lost_result_gets_minimal_summary() {
        let generator = Arc::new(ScriptedGenerator::new());
        let results = by_key(
            summarizer(generator, 1)
                .summarize_all(vec![job(0, "AC-1"), job(7, "PANIC-1")], None)
                .await,
        );

        assert_eq!(results.len(), 2);
        let lost = &results[&GroupKey::Cluster(7)];
        assert_eq!(lost.mode, SummaryMode::Fallback);
        assert_eq!(lost.summary.title, "Cluster 7 Controls");
        assert!(lost.summary.implementation_steps.is_empty());
        assert_eq!(lost.members.len(), 2);
    }

    #[tokio::test]
    async fn test_panic_does_not_stop_serial_worker() {
        let generator = Arc::new(ScriptedGenerator::new());
        let results = by_key(
            summarizer(generator.clone(), 1)
                .summarize_all(
                    vec![job(0, "PANIC-1"), job(1, "AC-1"), job(2, "AC-2")],
                    None,
                )
                .await,
        );

        assert_eq!(results.len(), 3);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(results[&GroupKey::Cluster(0)].summary.title, "Cluster 0 Controls");
        assert_eq!(results[&GroupKey::Cluster(0)].mode, SummaryMode::Fallback);
        for label in [1, 2] {
            let later = &results[&GroupKey::Cluster(label)];
            assert_eq!(later.mode, SummaryMode::Llm);
            assert_eq!(later.summary.title, "Unified");
        }
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let generator = Arc::new(ScriptedGenerator::new());
        let jobs: Vec<SummaryJob> = (0..8).map(|i| job(i, &format!("AC-{}", i + 10))).collect();
        let results = summarizer(generator.clone(), 3).summarize_all(jobs, None).await;

        assert_eq!(results.len(), 8);
        let peak = generator.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {} exceeded pool size", peak);
        assert!(peak >= 2, "expected parallel execution, peak was {}", peak);
    }

    #[tokio::test]
    async fn test_zero_jobs() {
        let generator = Arc::new(ScriptedGenerator::new());
        let results = summarizer(generator.clone(), 4).summarize_all(Vec::new(), None).await;
        assert!(results.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fast_mode_never_has_steps() {
        let results = summarize_fast(
            vec![
                job(0, "AC-1"),
                SummaryJob {
                    key: GroupKey::Outliers,
                    members: vec![control("PCI", "3.4", "Encrypt PAN")],
                },
            ],
            None,
        );
        assert!(results.iter().all(|r| r.mode == SummaryMode::Fast));
        assert!(results.iter().all(|r| r.summary.implementation_steps.is_empty()));
    }

    #[test]
    fn test_prompt_contents() {
        let mut long = control("NIST", "AC-2", "Account Management");
        long.description = "x".repeat(500);
        let ctx = OrgContext {
            industry: Some("Banking".to_string()),
            ..OrgContext::default()
        };
        let prompt = build_prompt(&[long], Some(&ctx), 50);

        assert!(prompt.contains("- [NIST] AC-2 - Account Management: "));
        assert!(prompt.contains(&format!("{}...", "x".repeat(50))));
        assert!(!prompt.contains(&"x".repeat(51)));
        assert!(prompt.contains("Banking industry"));
        assert!(prompt.contains("\"implementation_steps\""));
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[tokio::test]
    async fn test_run_task_timeout() {
        let generator = ScriptedGenerator::new();
        let outcome = run_task(&generator, "HANG-1", 0.3, Duration::from_millis(50)).await;
        assert_eq!(outcome, TaskOutcome::Failure(SummaryError::Timeout(0)));
    }
}
