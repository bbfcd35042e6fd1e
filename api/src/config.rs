use std::time::Duration;

use mio_core::retrieval::DEFAULT_MIN_SIMILARITY;
use mio_core::reward::{RewardConfig, RewardError, RewardTable};
use url::Url;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_CACHE_TTL_SECONDS: u64 = 3_600;
const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_LLM_MAX_TOKENS: u32 = 1_024;
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1_536;
const DEFAULT_HASHING_DIMENSIONS: usize = 256;
const DEFAULT_MIN_PATTERN_ROWS: i64 = 1;
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
    #[error("MIO_REWARD_WEIGHTS: {0}")]
    Reward(#[from] RewardError),
}

#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Clone)]
pub enum EmbeddingConfig {
    OpenAi {
        api_key: String,
        base_url: Url,
        model: String,
        dimensions: usize,
    },
    Hashing {
        dimensions: usize,
    },
}

#[derive(Clone)]
pub struct PushRelayConfig {
    pub url: Url,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Postgres,
    Memory,
}

/// Everything the service needs from its environment. Credentials live here
/// and are handed to each client explicitly.
#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub service_key: String,
    pub cors_origins: Vec<String>,
    pub http_timeout: Duration,
    pub llm: Option<LlmConfig>,
    pub embedding: EmbeddingConfig,
    pub push_relay: Option<PushRelayConfig>,
    pub cache_backend: CacheBackend,
    pub cache_ttl_seconds: u64,
    pub reward_table: RewardTable,
    pub reward_config: RewardConfig,
    pub min_pattern_rows: i64,
    pub min_similarity: f64,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match non_empty(value) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            message: format!("expected a number, got '{raw}'"),
        }),
    }
}

fn parse_url(name: &'static str, value: Option<String>, default: &str) -> Result<Url, ConfigError> {
    let raw = non_empty(value).unwrap_or_else(|| default.to_string());
    Url::parse(&raw).map_err(|err| ConfigError::Invalid {
        name,
        message: format!("'{raw}' is not a URL: {err}"),
    })
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            non_empty(lookup("DATABASE_URL")).ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let service_key =
            non_empty(lookup("MIO_SERVICE_KEY")).ok_or(ConfigError::Missing("MIO_SERVICE_KEY"))?;

        let port = parse_number("PORT", lookup("PORT"), DEFAULT_PORT)?;
        let http_timeout = Duration::from_secs(parse_number(
            "MIO_HTTP_TIMEOUT_SECONDS",
            lookup("MIO_HTTP_TIMEOUT_SECONDS"),
            DEFAULT_HTTP_TIMEOUT_SECONDS,
        )?);

        let cors_origins = non_empty(lookup("MIO_CORS_ORIGINS"))
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let llm = match non_empty(lookup("ANTHROPIC_API_KEY")) {
            None => None,
            Some(api_key) => Some(LlmConfig {
                api_key,
                base_url: parse_url(
                    "ANTHROPIC_BASE_URL",
                    lookup("ANTHROPIC_BASE_URL"),
                    DEFAULT_ANTHROPIC_BASE_URL,
                )?,
                model: non_empty(lookup("MIO_LLM_MODEL"))
                    .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                max_tokens: parse_number(
                    "MIO_LLM_MAX_TOKENS",
                    lookup("MIO_LLM_MAX_TOKENS"),
                    DEFAULT_LLM_MAX_TOKENS,
                )?,
            }),
        };

        let embedding = match non_empty(lookup("OPENAI_API_KEY")) {
            Some(api_key) => EmbeddingConfig::OpenAi {
                api_key,
                base_url: parse_url(
                    "OPENAI_BASE_URL",
                    lookup("OPENAI_BASE_URL"),
                    DEFAULT_OPENAI_BASE_URL,
                )?,
                model: non_empty(lookup("MIO_EMBEDDING_MODEL"))
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                dimensions: parse_number(
                    "MIO_EMBEDDING_DIMENSIONS",
                    lookup("MIO_EMBEDDING_DIMENSIONS"),
                    DEFAULT_EMBEDDING_DIMENSIONS,
                )?,
            },
            None => EmbeddingConfig::Hashing {
                dimensions: parse_number(
                    "MIO_EMBEDDING_DIMENSIONS",
                    lookup("MIO_EMBEDDING_DIMENSIONS"),
                    DEFAULT_HASHING_DIMENSIONS,
                )?,
            },
        };
        let dimensions = match &embedding {
            EmbeddingConfig::OpenAi { dimensions, .. } | EmbeddingConfig::Hashing { dimensions } => {
                *dimensions
            }
        };
        if dimensions == 0 {
            return Err(ConfigError::Invalid {
                name: "MIO_EMBEDDING_DIMENSIONS",
                message: "must be greater than zero".to_string(),
            });
        }

        let push_relay = match non_empty(lookup("MIO_PUSH_RELAY_URL")) {
            None => None,
            Some(raw) => Some(PushRelayConfig {
                url: parse_url("MIO_PUSH_RELAY_URL", Some(raw), "")?,
                api_key: non_empty(lookup("MIO_PUSH_RELAY_KEY")),
            }),
        };

        let cache_backend = match non_empty(lookup("MIO_CACHE_BACKEND"))
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "" | "postgres" => CacheBackend::Postgres,
            "memory" => CacheBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    name: "MIO_CACHE_BACKEND",
                    message: format!("expected 'postgres' or 'memory', got '{other}'"),
                });
            }
        };
        let cache_ttl_seconds = parse_number(
            "MIO_CACHE_TTL_SECONDS",
            lookup("MIO_CACHE_TTL_SECONDS"),
            DEFAULT_CACHE_TTL_SECONDS,
        )?;

        let reward_table = match non_empty(lookup("MIO_REWARD_WEIGHTS")) {
            Some(weights) => RewardTable::parse(&weights)?,
            None => RewardTable::default(),
        };

        let min_pattern_rows = parse_number(
            "MIO_MIN_PATTERN_ROWS",
            lookup("MIO_MIN_PATTERN_ROWS"),
            DEFAULT_MIN_PATTERN_ROWS,
        )?;
        let min_similarity = parse_number(
            "MIO_MIN_SIMILARITY",
            lookup("MIO_MIN_SIMILARITY"),
            DEFAULT_MIN_SIMILARITY,
        )?;
        if !(-1.0..=1.0).contains(&min_similarity) {
            return Err(ConfigError::Invalid {
                name: "MIO_MIN_SIMILARITY",
                message: format!("must be within [-1, 1], got {min_similarity}"),
            });
        }

        Ok(Self {
            database_url,
            port,
            service_key,
            cors_origins,
            http_timeout,
            llm,
            embedding,
            push_relay,
            cache_backend,
            cache_ttl_seconds,
            reward_table,
            reward_config: RewardConfig::default(),
            min_pattern_rows,
            min_similarity,
        })
    }
}
