//! # Control Harmonizer
//!
//! Consolidates compliance controls from multiple frameworks (NIST, ISO
//! 27001, SOC 2, PCI DSS, HIPAA, ...) into unified controls.
//!
//! Controls are embedded by description, grouped by density-based
//! clustering over cosine distance, and each group is summarized into one
//! unified control with a title, description and implementation steps.
//! Summaries come from an LLM when available and from deterministic
//! heuristics otherwise.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────┐   ┌─────────────┐
//! │ Controls │──▶│  Embedding  │──▶│  DBSCAN  │──▶│ Summarizer  │
//! │  (JSON)  │   │ cache (LRU) │   │ (cosine) │   │ worker pool │
//! └──────────┘   └─────────────┘   └──────────┘   └──────┬──────┘
//!                                                        │
//!                      ┌─────────────────────────────────┤
//!                      ▼                                 ▼
//!                 ┌──────────┐                     ┌──────────┐
//!                 │   CLI    │                     │   HTTP   │
//!                 │  (run)   │                     │  (axum)  │
//!                 └──────────┘                     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harmonize run --input controls.json          # LLM summaries
//! harmonize run --input controls.json --fast   # heuristics only
//! harmonize serve                              # POST /batch-harmonize
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`cache`] | Content-addressed LRU embedding cache |
//! | [`cluster`] | DBSCAN over cosine distance |
//! | [`generation`] | Text generator abstraction |
//! | [`extract`] | JSON extraction from generator output |
//! | [`fallback`] | Heuristic summaries |
//! | [`summarizer`] | Concurrent cluster summarization |
//! | [`context`] | Organization context analysis |
//! | [`assembler`] | Batch result assembly |
//! | [`pipeline`] | The [`Harmonizer`](pipeline::Harmonizer) entry point |
//! | [`server`] | HTTP server |
//! | [`error`] | Summarization failure reasons |

pub mod assembler;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod summarizer;
