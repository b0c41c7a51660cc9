//! Embeddings module — pluggable embedding providers.
//!
//! Chunk text is turned into dense `f32` vectors by an [`EmbeddingProvider`].
//! The default provider is a deterministic feature-hashing encoder that
//! needs no model weights; an OpenAI-compatible remote provider is
//! available for deployments with a real sentence-transformer behind an
//! HTTP API. Every provider is a pure function of its input text: the same
//! text always produces the same vector.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::{CorpusDbError, Result};

/// Configuration for embedding providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderType,
    pub model_name: String,
    pub dimension: usize,
    pub max_batch_size: usize,
    pub provider_config: ProviderConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::Hashing,
            model_name: "feature-hash-v1".to_string(),
            dimension: 384,
            max_batch_size: 32,
            provider_config: ProviderConfig::Hashing,
        }
    }
}

impl EmbeddingConfig {
    /// Deterministic local provider at the given dimension.
    pub fn hashing(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }
}

/// Available embedding provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingProviderType {
    Hashing,
    OpenAi,
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderConfig {
    Hashing,
    OpenAi {
        api_key: String,
        api_base: Option<String>, // For OpenAI-compatible APIs
        organization: Option<String>,
    },
}

/// Result of embedding generation.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
    pub model_used: String,
    pub tokens_used: Option<usize>,
}

/// Trait for embedding providers.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Generate embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CorpusDbError::Embedding("no embedding returned".to_string()))
    }

    /// The dimension of embeddings produced by this provider.
    fn dimension(&self) -> usize;

    /// The model name.
    fn model_name(&self) -> &str;

    /// The maximum batch size.
    fn max_batch_size(&self) -> usize;
}

/// Deterministic feature-hashing embedding provider.
///
/// Each lowercase alphanumeric token is hashed with xxh3 and the hash seeds
/// a xorshift projection into the target dimension; token vectors are
/// mean-pooled and L2-normalized. Distinct tokens land in near-orthogonal
/// directions, which is enough geometry for the exact kNN indices to rank
/// text overlap meaningfully, and identical texts map to identical vectors.
#[derive(Debug)]
pub struct HashingEmbeddingProvider {
    config: EmbeddingConfig,
}

impl HashingEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.provider != EmbeddingProviderType::Hashing {
            return Err(CorpusDbError::Embedding(
                "config is not for the hashing provider".to_string(),
            ));
        }
        if config.dimension == 0 {
            return Err(CorpusDbError::Embedding(
                "embedding dimension must be non-zero".to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }

    /// Project one token into the embedding space via a seeded xorshift.
    fn token_vector(token: &str, dimension: usize) -> Vec<f32> {
        // Seed must be non-zero for xorshift; the low bit is forced on.
        let mut state = xxh3_64(token.as_bytes()) | 1;
        (0..dimension)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                // Map the top 24 bits onto [-1, 1).
                ((state >> 40) as f32 / (1u64 << 23) as f32) - 1.0
            })
            .collect()
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let dimension = self.config.dimension;
        let tokens = Self::tokenize(text);
        if tokens.is_empty() {
            return vec![0.0; dimension];
        }

        let mut pooled = vec![0.0f32; dimension];
        for token in &tokens {
            for (acc, v) in pooled.iter_mut().zip(Self::token_vector(token, dimension)) {
                *acc += v;
            }
        }
        let n = tokens.len() as f32;
        for v in &mut pooled {
            *v /= n;
        }

        let norm: f32 = pooled.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut pooled {
                *v /= norm;
            }
        }
        pooled
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings = texts.iter().map(|t| self.encode(t)).collect();
        let tokens_used = texts.iter().map(|t| Self::tokenize(t).len()).sum();

        Ok(EmbeddingResult {
            embeddings,
            model_used: self.config.model_name.clone(),
            tokens_used: Some(tokens_used),
        })
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

/// OpenAI-compatible embedding provider.
#[derive(Debug)]
pub struct OpenAiEmbeddingProvider {
    config: EmbeddingConfig,
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let (api_key, api_base) = match &config.provider_config {
            ProviderConfig::OpenAi {
                api_key, api_base, ..
            } => (api_key.clone(), api_base.clone()),
            _ => {
                return Err(CorpusDbError::Embedding(
                    "config is not for the OpenAI provider".to_string(),
                ))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            config,
            client,
            api_key,
            api_base: api_base.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult {
                embeddings: Vec::new(),
                model_used: self.config.model_name.clone(),
                tokens_used: Some(0),
            });
        }

        #[derive(Serialize)]
        struct EmbeddingRequest {
            input: Vec<String>,
            model: String,
            encoding_format: String,
        }

        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
            usage: Usage,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }

        #[derive(Deserialize)]
        struct Usage {
            total_tokens: usize,
        }

        let request = EmbeddingRequest {
            input: texts.to_vec(),
            model: self.config.model_name.clone(),
            encoding_format: "float".to_string(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(CorpusDbError::Embedding(format!(
                "embedding API error: {error_text}"
            )));
        }

        let embedding_response: EmbeddingResponse = response.json().await?;

        // Sort embeddings by index to maintain order
        let mut sorted_data = embedding_response.data;
        sorted_data.sort_by_key(|d| d.index);

        let embeddings = sorted_data.into_iter().map(|d| d.embedding).collect();

        Ok(EmbeddingResult {
            embeddings,
            model_used: self.config.model_name.clone(),
            tokens_used: Some(embedding_response.usage.total_tokens),
        })
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

/// Embedding service that manages a provider and a text → vector cache.
pub struct EmbeddingService {
    provider: Box<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Vec<f32>>>,
}

impl EmbeddingService {
    /// Create a new embedding service with the given configuration.
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let provider: Box<dyn EmbeddingProvider> = match config.provider {
            EmbeddingProviderType::Hashing => Box::new(HashingEmbeddingProvider::new(config)?),
            EmbeddingProviderType::OpenAi => Box::new(OpenAiEmbeddingProvider::new(config)?),
        };

        Ok(Self {
            provider,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Generate an embedding for a single text, with caching.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(embedding) = self.cache.read().get(text) {
            return Ok(embedding.clone());
        }

        let embedding = self.provider.embed_text(text).await?;

        self.cache
            .write()
            .insert(text.to_string(), embedding.clone());

        Ok(embedding)
    }

    /// Generate embeddings for multiple texts (uncached).
    pub async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        self.provider.embed_texts(texts).await
    }

    /// The dimension of embeddings.
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// The model name.
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Clear the embedding cache.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    /// Number of cached entries.
    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }
}

/// Configurations for common setups.
pub mod models {
    use super::*;

    /// Deterministic feature-hashing encoder at 384 dimensions, matching
    /// the footprint of all-MiniLM-L6-v2-class sentence transformers.
    pub fn feature_hash_384() -> EmbeddingConfig {
        EmbeddingConfig::hashing(384)
    }

    /// Configuration for OpenAI text-embedding-3-small (1536 dimensions).
    pub fn openai_text_embedding_3_small(api_key: String) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: EmbeddingProviderType::OpenAi,
            model_name: "text-embedding-3-small".to_string(),
            dimension: 1536,
            max_batch_size: 2048,
            provider_config: ProviderConfig::OpenAi {
                api_key,
                api_base: None,
                organization: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_provider_shape_and_determinism() -> Result<()> {
        let provider = HashingEmbeddingProvider::new(EmbeddingConfig::hashing(384))?;

        let texts = vec!["Hello world".to_string(), "Test embedding".to_string()];
        let result = provider.embed_texts(&texts).await?;

        assert_eq!(result.embeddings.len(), 2);
        assert_eq!(result.embeddings[0].len(), 384);
        assert_eq!(result.model_used, "feature-hash-v1");

        // Same text, same vector — bit for bit.
        let again = provider.embed_text("Hello world").await?;
        assert_eq!(result.embeddings[0], again);

        Ok(())
    }

    #[tokio::test]
    async fn test_distinct_texts_produce_distant_vectors() -> Result<()> {
        let provider = HashingEmbeddingProvider::new(EmbeddingConfig::hashing(64))?;

        let a = provider.embed_text("alpha").await?;
        let b = provider.embed_text("beta").await?;
        let d = crate::distance::euclidean(&a, &b);
        assert!(d > 0.5, "unrelated tokens should be far apart, got {d}");

        Ok(())
    }

    #[tokio::test]
    async fn test_embeddings_are_normalized() -> Result<()> {
        let provider = HashingEmbeddingProvider::new(EmbeddingConfig::hashing(128))?;

        let v = provider.embed_text("the quick brown fox").await?;
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        // Empty text maps to the zero vector rather than an error.
        let zero = provider.embed_text("").await?;
        assert!(zero.iter().all(|x| *x == 0.0));

        Ok(())
    }

    #[tokio::test]
    async fn test_embedding_service_caching() -> Result<()> {
        let service = EmbeddingService::new(EmbeddingConfig::hashing(64))?;

        let text = "Hello world";

        let embedding1 = service.embed_text(text).await?;
        assert_eq!(embedding1.len(), 64);

        let embedding2 = service.embed_text(text).await?;
        assert_eq!(embedding1, embedding2);
        assert_eq!(service.cache_len(), 1);

        service.clear_cache();
        assert_eq!(service.cache_len(), 0);

        Ok(())
    }

    #[test]
    fn test_model_configurations() {
        let openai_config = models::openai_text_embedding_3_small("test-key".to_string());
        assert_eq!(openai_config.dimension, 1536);
        assert_eq!(openai_config.model_name, "text-embedding-3-small");

        let hash_config = models::feature_hash_384();
        assert_eq!(hash_config.dimension, 384);
        assert_eq!(hash_config.provider, EmbeddingProviderType::Hashing);
    }
}
