//! Embedding provider implementations.
//!
//! Concrete backends for the [`EmbeddingProvider`] trait defined in
//! `narrative-search-core`:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs models in-process via fastembed (feature
//!   `local-embeddings-fastembed`); no network calls after model download.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use narrative_search::config::EmbeddingConfig;
//! # use narrative_search::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use narrative_search_core::embedding::{embed_one, EmbeddingProvider};

use crate::config::EmbeddingConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

// ============ Disabled Provider ============

/// An embedding provider that always fails.
///
/// Used when `embedding.provider = "disabled"`. Sync passes log the error
/// and leave stored vectors untouched; searches return it to the caller.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Shared HTTP retry loop ============

/// POST `body` to `url`, retrying transient failures, and parse the
/// successful response with `parse`.
async fn post_with_retry(
    client: &reqwest::Client,
    label: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    parse: fn(&serde_json::Value) -> Result<Vec<Vec<f32>>>,
) -> Result<Vec<Vec<f32>>> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            tracing::warn!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse(&json);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        label,
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "{} connection error ({}): {}",
                    label,
                    url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", label)))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http_client(config)?,
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        post_with_retry(
            &self.client,
            "OpenAI",
            OPENAI_EMBEDDINGS_URL,
            Some(&self.api_key),
            &body,
            self.max_retries,
            parse_openai_response,
        )
        .await
    }
}

/// Parse the OpenAI embeddings response.
///
/// Items are placed by their `index` field when present so the output
/// always matches input order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using an Ollama instance.
///
/// Calls `POST {url}/api/embed` (default `http://localhost:11434`).
/// Requires an embedding model to be pulled, e.g. `ollama pull nomic-embed-text`.
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client: http_client(config)?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        post_with_retry(
            &self.client,
            "Ollama",
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            parse_ollama_response,
        )
        .await
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// In-process embedding provider backed by fastembed.
///
/// The model is downloaded from Hugging Face on first use, then cached and
/// reused for every later call.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        // Fail at construction on unknown names.
        config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let slot = Arc::clone(&self.model);
        let model_name = self.model_name.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("Local embedding model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(config_to_fastembed_model(&model_name)?)
                        .with_show_download_progress(false),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("Local embedding model unavailable"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

/// Create the [`EmbeddingProvider`] selected by configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_backoff_schedule() {
        let secs: Vec<u64> = (1..=8).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 32, 32]);
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let parsed = parse_openai_response(&json).unwrap();
        assert_eq!(parsed, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        let parsed = parse_ollama_response(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!((parsed[1][0] - 0.3).abs() < 1e-6);
        assert!(parse_ollama_response(&serde_json::json!({"embeddings": [1]})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert!(provider.embed(&["text".to_string()]).await.is_err());
    }

    #[test]
    fn test_ollama_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            dims: Some(768),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }

    // ─── Minimal HTTP fixture ───

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    return;
                }
            }
        }
    }

    /// Serve one canned response per connection, in order.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;
                let reply = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}", addr), hits)
    }

    fn ollama_config(url: String, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(2),
            max_retries,
            timeout_secs: 5,
            url: Some(url),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ollama_retries_server_error() {
        let (url, hits) = serve(vec![
            (503, r#"{"error":"loading"}"#),
            (200, r#"{"embeddings":[[1.0,0.0]]}"#),
        ])
        .await;
        let provider = OllamaProvider::new(&ollama_config(url, 2)).unwrap();
        let out = provider.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0]]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ollama_client_error_is_not_retried() {
        let (url, hits) = serve(vec![(400, r#"{"error":"bad model"}"#)]).await;
        let provider = OllamaProvider::new(&ollama_config(url, 3)).unwrap();
        let err = provider.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("400"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
