//! Typed failure reasons for a single summarization task.
//!
//! Everything else in the crate reports errors through `anyhow`; these are
//! kept as an enum because the summarizer branches on them and the reason is
//! logged per cluster before the fallback summary is substituted.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SummaryError {
    /// The generator did not answer within the per-task deadline.
    #[error("summarization timed out after {0}s")]
    Timeout(u64),
    /// The generator call itself failed (network, HTTP status, provider error).
    #[error("text generation failed: {0}")]
    Transport(String),
    /// The generator answered but no usable JSON summary could be extracted.
    #[error("malformed summary response: {0}")]
    MalformedResponse(String),
}
