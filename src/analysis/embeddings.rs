//! Embedding providers
//!
//! - OpenAI (`text-embedding-3-small` by default)
//! - Ollama-compatible HTTP servers (`POST /api/embeddings`)
//! - deterministic local hashing embedder for offline use and tests

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client as OpenAIClient,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EmbeddingSettings;
use crate::error::{Error, Result};
use crate::graph::keywords::tokenize;

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
const MAX_INPUT_CHARS: usize = 8000;

/// Source of fixed-dimension text embeddings.
///
/// `embed_batch` returns exactly one vector per input, in input order. Blank
/// inputs map to empty vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Vector size; 0 when not known yet.
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingProvider("No embedding returned".into()))
    }
}

/// Which provider the configuration asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI when `OPENAI_API_KEY` is set, local otherwise
    Auto,
    OpenAI,
    Ollama,
    Local,
    /// No vector path at all
    Disabled,
}

impl EmbeddingBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingBackend::Auto => "auto",
            EmbeddingBackend::OpenAI => "openai",
            EmbeddingBackend::Ollama => "ollama",
            EmbeddingBackend::Local => "local",
            EmbeddingBackend::Disabled => "none",
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(EmbeddingBackend::Auto),
            "openai" => Ok(EmbeddingBackend::OpenAI),
            "ollama" => Ok(EmbeddingBackend::Ollama),
            "local" | "hash" => Ok(EmbeddingBackend::Local),
            "none" | "off" | "disabled" => Ok(EmbeddingBackend::Disabled),
            other => Err(Error::InvalidArgument(format!(
                "Unknown embedding provider: {other}"
            ))),
        }
    }
}

/// Build the configured provider. `Ok(None)` means the vector path is disabled.
pub fn provider_from_settings(
    settings: &EmbeddingSettings,
) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    let provider: Arc<dyn EmbeddingProvider> = match settings.backend {
        EmbeddingBackend::Disabled => return Ok(None),
        EmbeddingBackend::Auto => match OpenAIEmbeddings::from_env(settings.model.clone()) {
            Ok(openai) => Arc::new(openai),
            Err(_) => {
                info!("OPENAI_API_KEY not set, using local embeddings");
                Arc::new(LocalEmbeddings::new(settings.dimension))
            }
        },
        EmbeddingBackend::OpenAI => Arc::new(OpenAIEmbeddings::from_env(settings.model.clone())?),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbeddings::new(
            &settings.url,
            settings.model.as_deref().unwrap_or(DEFAULT_OLLAMA_MODEL),
        )?),
        EmbeddingBackend::Local => Arc::new(LocalEmbeddings::new(settings.dimension)),
    };
    debug!(provider = provider.name(), "Embedding provider ready");
    Ok(Some(provider))
}

/// OpenAI embeddings API.
pub struct OpenAIEmbeddings {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
}

impl OpenAIEmbeddings {
    /// Create from `OPENAI_API_KEY`.
    pub fn from_env(model: Option<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::EmbeddingProvider("OPENAI_API_KEY not set".into()))?;
        Ok(Self::with_config(
            OpenAIConfig::new().with_api_key(api_key),
            model,
        ))
    }

    pub fn with_config(config: OpenAIConfig, model: Option<String>) -> Self {
        Self {
            client: OpenAIClient::with_config(config),
            model: model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddings {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let processed: Vec<String> = texts
            .iter()
            .map(|t| truncate_chars(t.trim(), MAX_INPUT_CHARS))
            .filter(|t| !t.is_empty())
            .collect();

        if processed.is_empty() {
            return Ok(vec![Vec::new(); texts.len()]);
        }

        debug!("Generating embeddings for {} texts", processed.len());

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(processed))
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        debug!(
            "Generated {} embeddings, tokens used: {}",
            response.data.len(),
            response.usage.total_tokens
        );

        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        let mut embed_iter = data.into_iter();

        // Map back to original indices (blank texts get empty vectors)
        let mut result = Vec::with_capacity(texts.len());
        for text in texts {
            if text.trim().is_empty() {
                result.push(Vec::new());
            } else {
                let embedding = embed_iter.next().ok_or_else(|| {
                    Error::EmbeddingProvider("OpenAI returned fewer embeddings than inputs".into())
                })?;
                result.push(embedding.embedding);
            }
        }

        Ok(result)
    }
}

/// Ollama-compatible embeddings endpoint.
#[derive(Debug)]
pub struct OllamaEmbeddings {
    http: Client,
    base_url: String,
    model: String,
    dimension: AtomicUsize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbeddings {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension: AtomicUsize::new(0),
        })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("Ollama request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingProvider(format!(
                "Ollama error {}: {}",
                status, text
            )));
        }

        let body: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("Invalid response: {}", e)))?;

        if body.embedding.is_empty() {
            return Err(Error::EmbeddingProvider("Ollama returned an empty embedding".into()));
        }
        Ok(body.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut result = Vec::with_capacity(texts.len());
        for text in texts {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                result.push(Vec::new());
                continue;
            }
            let embedding = self
                .embed_one(&truncate_chars(trimmed, MAX_INPUT_CHARS))
                .await?;
            let previous = self.dimension.swap(embedding.len(), Ordering::Relaxed);
            if previous != 0 && previous != embedding.len() {
                warn!(previous, current = embedding.len(), "Ollama embedding size changed");
            }
            result.push(embedding);
        }
        Ok(result)
    }
}

/// Deterministic, fast embedding for offline/local use.
#[derive(Debug, Clone)]
pub struct LocalEmbeddings {
    dim: usize,
}

impl LocalEmbeddings {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    /// Hashes each token into a bucket and L2-normalizes the counts.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dim;
            vec[idx] += 1.0;
        }

        normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddings {
    fn name(&self) -> &str {
        "local"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.trim().is_empty() {
                    Vec::new()
                } else {
                    self.embed_text(t)
                }
            })
            .collect())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::{LazyLock, Mutex};

    static ENV_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    struct OpenAiKeyGuard {
        original: Option<String>,
    }

    impl OpenAiKeyGuard {
        fn set(value: Option<&str>) -> Self {
            let original = std::env::var("OPENAI_API_KEY").ok();
            match value {
                Some(v) => std::env::set_var("OPENAI_API_KEY", v),
                None => std::env::remove_var("OPENAI_API_KEY"),
            }
            Self { original }
        }
    }

    impl Drop for OpenAiKeyGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.original {
                std::env::set_var("OPENAI_API_KEY", value);
            } else {
                std::env::remove_var("OPENAI_API_KEY");
            }
        }
    }

    fn settings(backend: EmbeddingBackend) -> EmbeddingSettings {
        EmbeddingSettings {
            backend,
            model: None,
            url: "http://localhost:11434".into(),
            dimension: 32,
        }
    }

    #[test]
    fn cosine_similarity_handles_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);

        let aligned = cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]);
        assert!((aligned - 1.0).abs() < 1e-6);

        let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(orthogonal.abs() < 1e-6);
    }

    #[test]
    fn normalize_scales_vector_to_unit_length() {
        let mut vec = vec![3.0, 4.0];
        normalize(&mut vec);
        let norm = (vec[0].powi(2) + vec[1].powi(2)).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert!(zero.iter().all(|&v| v == 0.0));
    }

    #[tokio::test]
    async fn local_embeddings_are_deterministic_and_normalized() {
        let local = LocalEmbeddings::new(64);
        let texts = vec!["Morning Run, felt great".to_string(), "   ".to_string()];

        let first = local.embed_batch(&texts).await.unwrap();
        let second = local.embed_batch(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].len(), 64);
        assert!(first[1].is_empty());

        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn local_embeddings_ignore_case_and_punctuation() {
        let local = LocalEmbeddings::new(64);
        let a = local.embed("Morning run!").await.unwrap();
        let b = local.embed("morning RUN").await.unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn local_dimension_has_floor() {
        assert_eq!(LocalEmbeddings::new(2).dimension(), 8);
    }

    #[test]
    fn backend_parses_aliases() {
        assert_eq!("OpenAI".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::OpenAI);
        assert_eq!("hash".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::Local);
        assert_eq!("off".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::Disabled);
        assert!("quantum".parse::<EmbeddingBackend>().is_err());
    }

    #[test]
    fn factory_auto_falls_back_to_local_without_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = OpenAiKeyGuard::set(None);

        let provider = provider_from_settings(&settings(EmbeddingBackend::Auto))
            .unwrap()
            .unwrap();
        assert_eq!(provider.name(), "local");
        assert_eq!(provider.dimension(), 32);
    }

    #[test]
    fn factory_auto_prefers_openai_with_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = OpenAiKeyGuard::set(Some("test_key"));

        let provider = provider_from_settings(&settings(EmbeddingBackend::Auto))
            .unwrap()
            .unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.dimension(), 1536);
    }

    #[test]
    fn factory_openai_requires_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = OpenAiKeyGuard::set(None);

        let result = provider_from_settings(&settings(EmbeddingBackend::OpenAI));
        assert!(matches!(result, Err(Error::EmbeddingProvider(_))));
    }

    #[test]
    fn factory_disabled_yields_none() {
        assert!(provider_from_settings(&settings(EmbeddingBackend::Disabled))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ollama_embeds_each_text() {
        let server = MockServer::start_async().await;

        let embed_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/embeddings")
                .json_body_includes(r#"{"model": "nomic-embed-text"}"#);
            then.status(200)
                .json_body(json!({ "embedding": [0.1, 0.2, 0.3] }));
        });

        let provider = OllamaEmbeddings::new(&server.base_url(), DEFAULT_OLLAMA_MODEL).unwrap();
        assert_eq!(provider.dimension(), 0);

        let texts = vec!["first".to_string(), "".to_string(), "second".to_string()];
        let vectors = provider.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
        assert!(vectors[1].is_empty());
        assert_eq!(provider.dimension(), 3);
        embed_mock.assert_calls(2);
    }

    #[tokio::test]
    async fn ollama_error_status_is_reported() {
        let server = MockServer::start_async().await;

        let embed_mock = server.mock(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(500).body("model not loaded");
        });

        let provider = OllamaEmbeddings::new(&server.base_url(), "custom").unwrap();
        let err = provider.embed("hello").await.unwrap_err();

        let msg = format!("{err}");
        assert!(matches!(err, Error::EmbeddingProvider(_)));
        assert!(msg.contains("Ollama error 500"));
        assert!(msg.contains("model not loaded"));
        embed_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn openai_maps_embeddings_back_to_inputs() {
        let server = MockServer::start_async().await;

        let embed_mock = server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "object": "list",
                "model": "text-embedding-3-small",
                "data": [
                    { "object": "embedding", "index": 1, "embedding": [0.0, 1.0] },
                    { "object": "embedding", "index": 0, "embedding": [1.0, 0.0] }
                ],
                "usage": { "prompt_tokens": 4, "total_tokens": 4 }
            }));
        });

        let config = OpenAIConfig::new()
            .with_api_key("test_key")
            .with_api_base(server.base_url());
        let provider = OpenAIEmbeddings::with_config(config, None);

        let texts = vec!["alpha".to_string(), " ".to_string(), "beta".to_string()];
        let vectors = provider.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], Vec::new(), vec![0.0, 1.0]]);
        embed_mock.assert_calls(1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("저녁약속", 2), "저녁");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
