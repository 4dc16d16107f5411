//! Source connectors and the normalization boundary into the canonical event
//! schema consumed by the ingestion stage.
//!
//! `Connector` is the generic contract; everything below it is out of scope
//! of the core pipeline and exists only far enough to give the ingestion
//! stage something real to drive. The concrete `NewsApiConnector` mirrors the
//! teacher's `reqwest::Client::builder()` + rate limiter shape from its
//! scrapers (`hashdive_api.rs`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// A single item as returned by a source, before normalization.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub id_or_url: String,
    pub title: String,
    pub body: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
}

/// Canonical shape the extraction stage consumes, produced by [`normalize`].
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub source: String,
    pub headline: String,
    pub body: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// Missing-body fallback chain: body, then description, then empty string.
pub fn normalize(raw: RawItem) -> NormalizedEvent {
    let body = raw
        .body
        .filter(|b| !b.trim().is_empty())
        .or(raw.description)
        .unwrap_or_default();
    NormalizedEvent {
        source: raw.source_name,
        headline: raw.title.trim().to_string(),
        body,
        url: raw.id_or_url,
        timestamp: raw.published_at.unwrap_or_else(Utc::now),
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<Vec<RawItem>>;
}

/// Generic connector against a NewsAPI-shaped JSON endpoint
/// (`{"articles": [{title, description, content, url, publishedAt}]}`).
pub struct NewsApiConnector {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    source_name: String,
}

impl NewsApiConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, source_name: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("riskwatch-ingestion/1.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            source_name: source_name.into(),
        }
    }
}

#[async_trait]
impl Connector for NewsApiConnector {
    fn name(&self) -> &str {
        &self.source_name
    }

    async fn fetch(&self) -> Result<Vec<RawItem>> {
        let resp = self
            .http
            .get(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .context("newsapi request")?
            .error_for_status()
            .context("newsapi error status")?;

        let parsed: NewsApiResponse = resp.json().await.context("newsapi json parse")?;
        Ok(parsed
            .articles
            .into_iter()
            .map(|a| RawItem {
                id_or_url: a.url,
                title: a.title,
                body: a.content,
                description: a.description,
                published_at: a.published_at,
                source_name: self.source_name.clone(),
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsApiArticle {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
    url: String,
    #[serde(default, rename = "publishedAt")]
    published_at: Option<DateTime<Utc>>,
}
