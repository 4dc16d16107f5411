//! Structured-output LLM client for risk extraction and recommendation synthesis.
//!
//! `OpenRouterClient::chat_completion` handles bearer auth, optional referer/title
//! headers, per-call timeout, and the OpenRouter chat-completions wire format. On
//! top of that raw completion, this module adds the JSON schema risk extraction
//! asks for and a validate-then-retry-with-stricter-prompt discipline.

use crate::models::{Confirmation, RiskType, Severity, TimeHorizon};
use crate::retry::with_backoff;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LlmUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LlmCallOutput {
    pub model: String,
    pub content: String,
    pub usage: LlmUsage,
    pub latency_ms: u64,
}

#[derive(Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenRouterClient {
    pub fn from_env(http: reqwest::Client) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY missing (set env var)")?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("OPENROUTER_API_KEY empty"));
        }
        let referer = std::env::var("OPENROUTER_HTTP_REFERER")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let title = std::env::var("OPENROUTER_APP_TITLE")
            .ok()
            .filter(|s| !s.trim().is_empty());
        Ok(Self {
            http,
            api_key,
            referer,
            title,
        })
    }

    pub async fn chat_completion(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
        timeout: Duration,
    ) -> Result<LlmCallOutput> {
        let start = Instant::now();

        let req = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        };

        let (status, body) = with_backoff("openrouter.chat_completion", || {
            let req = &req;
            async move {
                let mut http_req = self
                    .http
                    .post("https://openrouter.ai/api/v1/chat/completions")
                    .timeout(timeout)
                    .header(
                        reqwest::header::AUTHORIZATION,
                        format!("Bearer {}", self.api_key),
                    )
                    .header(reqwest::header::CONTENT_TYPE, "application/json");

                if let Some(r) = &self.referer {
                    http_req = http_req.header("HTTP-Referer", r);
                }
                if let Some(t) = &self.title {
                    http_req = http_req.header("X-Title", t);
                }

                let resp = http_req.json(req).send().await?;
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                Ok::<_, reqwest::Error>((status, body))
            }
        })
        .await
        .context("openrouter request")?;

        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!("openrouter {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).context("openrouter json parse")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .unwrap_or_default();

        Ok(LlmCallOutput {
            model: model.to_string(),
            content,
            usage: LlmUsage {
                prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
                completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
                total_tokens: parsed.usage.as_ref().and_then(|u| u.total_tokens),
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    pub message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// Raw shape requested from the model; field names match the wire schema
/// exactly so `serde_json` rejects anything that doesn't conform.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSchema {
    pub is_risk: bool,
    #[serde(default)]
    pub risk_type: Option<RiskType>,
    #[serde(default)]
    pub affected_entities: Vec<String>,
    #[serde(default)]
    pub affected_supply_chain_nodes: Vec<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub is_confirmed: Option<String>,
    #[serde(default)]
    pub time_horizon: Option<TimeHorizon>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub recommended_action: Option<String>,
}

impl ExtractionSchema {
    pub fn confirmation(&self) -> Option<Confirmation> {
        match self.is_confirmed.as_deref() {
            Some("confirmed") => Some(Confirmation::Confirmed),
            Some("unconfirmed") => Some(Confirmation::Unconfirmed),
            Some("uncertain") => Some(Confirmation::Uncertain),
            _ => None,
        }
    }
}

/// Parses a completion body as the extraction schema, tolerating a fenced
/// ```` ```json ... ``` ```` code block around the object.
pub fn parse_extraction(raw: &str) -> Result<ExtractionSchema> {
    let trimmed = strip_code_fence(raw);
    serde_json::from_str(trimmed).context("extraction schema parse failure")
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        return rest.trim().trim_end_matches("```").trim();
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.trim().trim_end_matches("```").trim();
    }
    trimmed
}

/// Heuristic picking the capable model tier for long or geopolitically
/// loaded events; everything else uses the fast tier.
pub fn is_complex(headline: &str, body: &str) -> bool {
    const GEOPOLITICAL_TERMS: &[&str] = &[
        "sanction",
        "tariff",
        "embargo",
        "war",
        "coup",
        "invasion",
        "export control",
    ];
    let combined = format!("{headline} {body}").to_lowercase();
    combined.len() > 2000 || GEOPOLITICAL_TERMS.iter().any(|t| combined.contains(t))
}

pub const EXTRACTION_SYSTEM_PROMPT_TEMPLATE: &str = "\
You are a supply-chain risk analyst for {company}. Known suppliers: {suppliers}. \
Tracked raw materials: {materials}. Key geographies: {geographies}. \
Given a news article, decide whether it represents a supply-chain risk to this \
company and respond with a single JSON object matching exactly this shape, no \
prose, no markdown: \
{{\"is_risk\": bool, \"risk_type\": one of geopolitical|natural_disaster|financial|\
regulatory|operational|cybersecurity|esg|supply_disruption|price_volatility or null, \
\"affected_entities\": [string], \"affected_supply_chain_nodes\": [string], \
\"severity\": one of low|medium|high|critical or null, \
\"is_confirmed\": one of confirmed|unconfirmed|uncertain, \
\"time_horizon\": one of immediate|days|weeks|months or null, \
\"reasoning\": string, \"recommended_action\": string or null}}";

pub const STRICT_RETRY_SUFFIX: &str = "\
Your previous response did not parse as the required JSON object. Respond with \
ONLY the JSON object, no surrounding text, no markdown code fence, no trailing \
commentary.";

pub fn recommendation_prompt(risk_summary: &str, candidate_names: &[String]) -> String {
    format!(
        "Risk summary: {risk_summary}\nCandidate alternate suppliers (ranked, best first): {}.\n\
         Write one concise sentence recommending an action, naming the top candidate if any exist.",
        candidate_names.join(", ")
    )
}

/// Deterministic fallback used when the recommendation-synthesis call fails
/// or no candidates exist to describe.
pub fn template_recommendation(name: &str, country: &str, lead_time_weeks: f64) -> String {
    format!("Activate alternate supplier {name} from {country}; lead time {lead_time_weeks:.0}w.")
}
