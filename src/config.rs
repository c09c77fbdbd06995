//! TOML configuration with environment overrides.
//!
//! Every field is optional. A missing file section (or no file at all) falls
//! back to the defaults below, and a small set of environment variables can
//! override the most frequently tuned knobs at deploy time.
//!
//! ```toml
//! [clustering]
//! eps = 0.4
//! min_samples = 2
//!
//! [summarizer]
//! provider = "ollama"
//! model = "llama2"
//! max_workers = 4
//! timeout_secs = 60
//!
//! [cache]
//! enabled = true
//! max_size = 1000
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    /// Neighborhood radius in cosine distance.
    #[serde(default = "default_eps")]
    pub eps: f32,
    /// Minimum neighbors (the point itself included) for a core point.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            min_samples: default_min_samples(),
        }
    }
}

fn default_eps() -> f32 {
    0.4
}
fn default_min_samples() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default = "default_summarizer_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_true")]
    pub enable_parallel: bool,
    /// Per-task deadline; expiry routes the cluster to the fallback path.
    #[serde(default = "default_task_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: default_summarizer_provider(),
            model: default_llm_model(),
            url: default_llm_url(),
            temperature: default_temperature(),
            max_workers: default_max_workers(),
            enable_parallel: true,
            timeout_secs: default_task_timeout_secs(),
            max_retries: default_llm_retries(),
        }
    }
}

fn default_summarizer_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama2".to_string()
}
fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_workers() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_task_timeout_secs() -> u64 {
    60
}
fn default_llm_retries() -> u32 {
    2
}

impl SummarizerConfig {
    /// Worker count for a batch of `jobs` tasks, never zero.
    pub fn pool_size(&self, jobs: usize) -> usize {
        if !self.enable_parallel {
            return 1;
        }
        jobs.min(self.max_workers).max(1)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_size")]
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_cache_size(),
        }
    }
}

fn default_cache_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default)]
    pub default_fast_mode: bool,
    #[serde(default = "default_max_description_length")]
    pub max_description_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_fast_mode: false,
            max_description_length: default_max_description_length(),
        }
    }
}

fn default_max_description_length() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Serializable view of the effective settings, exposed at `GET /config`.
#[derive(Debug, Serialize, PartialEq)]
pub struct ConfigSummary {
    pub clustering_eps: f32,
    pub clustering_min_samples: usize,
    pub embedding_provider: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub max_workers: usize,
    pub enable_parallel: bool,
    pub task_timeout_secs: u64,
    pub enable_embedding_cache: bool,
    pub max_cache_size: usize,
    pub default_fast_mode: bool,
}

impl Config {
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            clustering_eps: self.clustering.eps,
            clustering_min_samples: self.clustering.min_samples,
            embedding_provider: self.embedding.provider.clone(),
            llm_provider: self.summarizer.provider.clone(),
            llm_model: self.summarizer.model.clone(),
            llm_temperature: self.summarizer.temperature,
            max_workers: self.summarizer.max_workers,
            enable_parallel: self.summarizer.enable_parallel,
            task_timeout_secs: self.summarizer.timeout_secs,
            enable_embedding_cache: self.cache.enabled,
            max_cache_size: self.cache.max_size,
            default_fast_mode: self.pipeline.default_fast_mode,
        }
    }

    /// Apply overrides from an environment lookup function.
    ///
    /// Takes the lookup as a parameter so tests don't have to mutate the
    /// process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "CLUSTERING_EPS")? {
            self.clustering.eps = v;
        }
        if let Some(v) = parse_var(&lookup, "CLUSTERING_MIN_SAMPLES")? {
            self.clustering.min_samples = v;
        }
        if let Some(v) = lookup("LLM_MODEL") {
            self.summarizer.model = v;
        }
        if let Some(v) = parse_var(&lookup, "LLM_TEMPERATURE")? {
            self.summarizer.temperature = v;
        }
        if let Some(v) = lookup("LLM_HOST") {
            self.summarizer.url = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_WORKERS")? {
            self.summarizer.max_workers = v;
        }
        if let Some(v) = parse_bool_var(&lookup, "ENABLE_PARALLEL")? {
            self.summarizer.enable_parallel = v;
        }
        if let Some(v) = parse_bool_var(&lookup, "ENABLE_EMBEDDING_CACHE")? {
            self.cache.enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_CACHE_SIZE")? {
            self.cache.max_size = v;
        }
        if let Some(v) = parse_bool_var(&lookup, "DEFAULT_FAST_MODE")? {
            self.pipeline.default_fast_mode = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_DESCRIPTION_LENGTH")? {
            self.pipeline.max_description_length = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.clustering.eps > 0.0 && self.clustering.eps <= 2.0) {
            bail!("clustering.eps must be in (0.0, 2.0]");
        }
        if self.clustering.min_samples == 0 {
            bail!("clustering.min_samples must be >= 1");
        }
        if !(0.0..=2.0).contains(&self.summarizer.temperature) {
            bail!("summarizer.temperature must be in [0.0, 2.0]");
        }
        if self.summarizer.timeout_secs == 0 {
            bail!("summarizer.timeout_secs must be > 0");
        }
        if self.cache.enabled && self.cache.max_size == 0 {
            bail!("cache.max_size must be >= 1 when the cache is enabled");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }
        if matches!(self.embedding.provider.as_str(), "openai" | "ollama") {
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.summarizer.provider.as_str() {
            "disabled" | "ollama" | "openai" => {}
            other => bail!(
                "Unknown summarizer provider: '{}'. Must be disabled, ollama, or openai.",
                other
            ),
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {}: '{}' ({})", name, raw, e)),
        None => Ok(None),
    }
}

fn parse_bool_var<F>(lookup: &F, name: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim() {
        v if v.eq_ignore_ascii_case("true") => Ok(Some(true)),
        v if v.eq_ignore_ascii_case("false") => Ok(Some(false)),
        _ => bail!("invalid value for {}: '{}' (expected true or false)", name, raw),
    }
}

/// Parse a configuration file, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.apply_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

/// Defaults plus environment overrides, for running without a config file.
pub fn default_config() -> Result<Config> {
    let mut config = Config::default();
    config.apply_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}
