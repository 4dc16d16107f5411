//! Pipeline configuration, loaded env-first with `clap` CLI overrides.
//!
//! `dotenv().ok()` first, then `std::env::var(...).unwrap_or(...)` with a typed
//! default for every field.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "riskwatch", about = "Supply chain risk pipeline")]
pub struct Config {
    /// Ingestion scheduler period, in minutes.
    #[arg(long, env = "FETCH_INTERVAL_MINUTES", default_value_t = 15)]
    pub fetch_interval_minutes: u64,

    /// Dedup fingerprint retention, in seconds.
    #[arg(long, env = "DEDUP_TTL_SECONDS", default_value_t = 172_800)]
    pub dedup_ttl_seconds: u64,

    /// Minimum cosine similarity for an article to pass the relevance filter.
    #[arg(long, env = "RELEVANCE_THRESHOLD", default_value_t = 0.30)]
    pub relevance_threshold: f64,

    /// Fast-tier model id used for extraction unless the complexity heuristic escalates.
    #[arg(long, env = "EXTRACTION_MODEL_FAST", default_value = "openai/gpt-4o-mini")]
    pub extraction_model_fast: String,

    /// Capable-tier model id used for complex events.
    #[arg(long, env = "EXTRACTION_MODEL_CAPABLE", default_value = "openai/gpt-4o")]
    pub extraction_model_capable: String,

    /// Minimum composite score required to raise an alert.
    #[arg(long, env = "ALERT_THRESHOLD", default_value_t = 3.0)]
    pub alert_threshold: f64,

    /// Propagation stops once a candidate score falls below this value.
    #[arg(long, env = "PROPAGATION_THRESHOLD", default_value_t = 1.0)]
    pub propagation_threshold: f64,

    /// Max entries per stream consume call.
    #[arg(long, env = "WORKER_BATCH_SIZE", default_value_t = 10)]
    pub worker_batch_size: usize,

    /// Stream consume block timeout, in milliseconds.
    #[arg(long, env = "WORKER_BLOCK_MS", default_value_t = 5_000)]
    pub worker_block_ms: u64,

    /// Per-call LLM timeout, in milliseconds.
    #[arg(long, env = "LLM_TIMEOUT_MS", default_value_t = 30_000)]
    pub llm_timeout_ms: u64,

    /// Per-call embedding timeout, in milliseconds.
    #[arg(long, env = "EMBEDDING_TIMEOUT_MS", default_value_t = 10_000)]
    pub embedding_timeout_ms: u64,

    /// Per-call notification timeout, in milliseconds.
    #[arg(long, env = "NOTIFICATION_TIMEOUT_MS", default_value_t = 5_000)]
    pub notification_timeout_ms: u64,

    /// Pending-entry idle time before it becomes eligible for Claim, in milliseconds.
    #[arg(long, env = "CLAIM_MIN_IDLE_MS", default_value_t = 300_000)]
    pub claim_min_idle_ms: u64,

    /// Stage-level deadline per message, in milliseconds.
    #[arg(long, env = "STAGE_DEADLINE_MS", default_value_t = 60_000)]
    pub stage_deadline_ms: u64,

    /// Event store SQLite path.
    #[arg(long, env = "STORE_DB_PATH", default_value = "riskwatch.db")]
    pub store_db_path: String,

    /// Redis URL backing the stream substrate.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Use the in-memory stream substrate instead of Redis (local/dev runs).
    #[arg(long, env = "USE_MEMORY_STREAM", default_value_t = false)]
    pub use_memory_stream: bool,

    /// Path to a JSON seed file for the company profile, applied once at
    /// startup if the store has no company row yet. The company profile is
    /// seeded once and read-only to the core thereafter.
    #[arg(long, env = "COMPANY_SEED_PATH")]
    pub company_seed_path: Option<String>,

    /// Path to a JSON seed file (array of suppliers), applied once at startup
    /// if the store has no suppliers yet.
    #[arg(long, env = "SUPPLIER_SEED_PATH")]
    pub supplier_seed_path: Option<String>,
}

impl Config {
    /// Loads `.env` (if present), then parses real process argv through `clap`,
    /// so CLI flags take precedence over environment variables, which take
    /// precedence over the documented defaults.
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        Config::parse()
    }

    pub fn worker_block(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.worker_block_ms)
    }

    pub fn llm_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.llm_timeout_ms)
    }

    pub fn embedding_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn notification_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.notification_timeout_ms)
    }

    pub fn stage_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stage_deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::parse_from(std::iter::once("riskwatch".to_string()));
        assert_eq!(cfg.fetch_interval_minutes, 15);
        assert_eq!(cfg.dedup_ttl_seconds, 172_800);
        assert!((cfg.relevance_threshold - 0.30).abs() < 1e-9);
        assert!((cfg.alert_threshold - 3.0).abs() < 1e-9);
        assert!((cfg.propagation_threshold - 1.0).abs() < 1e-9);
        assert_eq!(cfg.worker_batch_size, 10);
        assert_eq!(cfg.claim_min_idle_ms, 300_000);
    }
}
