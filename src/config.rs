//! Configuration loading and validation.
//!
//! Narrative Search is configured from a TOML file. Every section has
//! defaults, so an empty file is a valid configuration that runs with the
//! in-memory vector store and the embedding provider disabled.
//!
//! ```toml
//! [db]
//! path = "data/vectors.sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [sync]
//! debounce_ms = 2000
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use narrative_search_core::content::{CHUNK_OVERLAP, MAX_CONTENT_LENGTH, MIN_CONTENT_LENGTH};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Vector persistence. Without a `path` the in-memory store is used.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DbConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            min_content_length: default_min_content_length(),
            max_content_length: default_max_content_length(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_min_content_length() -> usize {
    MIN_CONTENT_LENGTH
}
fn default_max_content_length() -> usize {
    MAX_CONTENT_LENGTH
}
fn default_chunk_overlap() -> usize {
    CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    2000
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Seconds between background sweeps of expired entries. `0` disables
    /// the sweep.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_max_entries() -> usize {
    100
}
fn default_prune_interval_secs() -> u64 {
    60
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            default_limit: default_limit(),
        }
    }
}

fn default_threshold() -> f32 {
    0.6
}
fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate content
    if config.content.max_content_length == 0 {
        anyhow::bail!("content.max_content_length must be > 0");
    }
    if config.content.chunk_overlap >= config.content.max_content_length / 2 {
        anyhow::bail!(
            "content.chunk_overlap ({}) must be less than half of content.max_content_length ({})",
            config.content.chunk_overlap,
            config.content.max_content_length
        );
    }

    // Validate cache
    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if config.cache.max_entries == 0 {
        anyhow::bail!("cache.max_entries must be > 0");
    }

    // Validate search
    if !(0.0..=1.0).contains(&config.search.default_threshold) {
        anyhow::bail!("search.default_threshold must be in [0.0, 1.0]");
    }
    if config.search.default_limit < 1 {
        anyhow::bail!("search.default_limit must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.db.path.is_none());
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.content.min_content_length, 10);
        assert_eq!(config.content.max_content_length, 8000);
        assert_eq!(config.content.chunk_overlap, 200);
        assert_eq!(config.sync.debounce(), Duration::from_millis(2000));
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.max_entries, 100);
        assert_eq!(config.cache.prune_interval_secs, 60);
        assert!((config.search.default_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[db]
path = "data/vectors.sqlite"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768
url = "http://gpu-box:11434"

[sync]
debounce_ms = 250

[search]
default_threshold = 0.4
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.db.path, Some(PathBuf::from("data/vectors.sqlite")));
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.dims, Some(768));
        assert_eq!(config.embedding.url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(config.sync.debounce_ms, 250);
        assert!((config.search.default_threshold - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_config(Path::new("/nonexistent/narrative.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse_config("[embedding]\nprovider = \"cohere\"").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let err = parse_config("[embedding]\nprovider = \"openai\"\ndims = 1536").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let err = parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(parse_config("[embedding]\nbatch_size = 0").is_err());
        assert!(parse_config("[cache]\nmax_entries = 0").is_err());
        assert!(parse_config("[cache]\nttl_secs = 0").is_err());
        assert!(parse_config("[search]\ndefault_threshold = 1.5").is_err());
        assert!(parse_config("[search]\ndefault_limit = 0").is_err());
        assert!(parse_config("[content]\nmax_content_length = 300\nchunk_overlap = 200").is_err());
    }
}
