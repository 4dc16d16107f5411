//! Text embeddings and the relevance-filter similarity gate.
//!
//! The HTTP call shape matches `OpenRouterClient` in `llm.rs` (bearer auth,
//! per-call timeout, JSON body) against an OpenAI-compatible `/embeddings`
//! endpoint. `KeywordEmbeddingCache` is the only other process-wide mutable state
//! besides the graph cache: a single cached vector keyed by the exact corpus
//! string it was computed from, so a profile edit invalidates it for free.

use crate::retry::with_backoff;
use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn from_env(http: reqwest::Client) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .or_else(|_| std::env::var("EMBEDDING_API_KEY"))
            .context("OPENROUTER_API_KEY or EMBEDDING_API_KEY missing (set env var)")?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("embedding api key empty"));
        }
        let base_url = std::env::var("EMBEDDING_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model =
            std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string());
        Ok(Self {
            http,
            api_key,
            base_url,
            model,
        })
    }

    pub async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>> {
        let req = EmbeddingRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };

        let (status, body) = with_backoff("embedding.request", || {
            let req = &req;
            async move {
                let resp = self
                    .http
                    .post(format!("{}/embeddings", self.base_url))
                    .timeout(timeout)
                    .header(
                        reqwest::header::AUTHORIZATION,
                        format!("Bearer {}", self.api_key),
                    )
                    .json(req)
                    .send()
                    .await?;
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                Ok::<_, reqwest::Error>((status, body))
            }
        })
        .await
        .context("embedding request")?;
        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!("embedding api {}: {}", status.as_u16(), snippet));
        }

        let parsed: EmbeddingResponse =
            serde_json::from_str(&body).context("embedding json parse")?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("embedding response had no data"))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Cosine similarity in `[-1, 1]`; `0.0` if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..n {
        let x = a[i] as f64;
        let y = b[i] as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Caches the company keyword embedding, keyed by the exact corpus string it
/// was computed from so a profile change invalidates it without a separate
/// version counter.
#[derive(Default)]
pub struct KeywordEmbeddingCache {
    inner: RwLock<Option<(String, Vec<f32>)>>,
}

impl KeywordEmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_compute(
        &self,
        corpus: &str,
        client: &EmbeddingClient,
        timeout: Duration,
    ) -> Result<Vec<f32>> {
        if let Some((cached_corpus, vector)) = self.inner.read().as_ref() {
            if cached_corpus == corpus {
                return Ok(vector.clone());
            }
        }
        let vector = client.embed(corpus, timeout).await?;
        *self.inner.write() = Some((corpus.to_string(), vector.clone()));
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        let a = vec![0.0f32, 0.0];
        let b = vec![1.0f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[tokio::test]
    async fn keyword_cache_recomputes_only_when_corpus_changes() {
        let cache = KeywordEmbeddingCache::new();
        cache.inner.write().replace(("acme copper".to_string(), vec![1.0, 0.0]));

        let cached = cache.inner.read().as_ref().unwrap().1.clone();
        assert_eq!(cached, vec![1.0, 0.0]);
        assert_eq!(
            cache.inner.read().as_ref().unwrap().0,
            "acme copper".to_string()
        );
    }
}
