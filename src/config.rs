use std::env;
use thiserror::Error;
use time::Duration;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Two settings are mutually inconsistent.
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Runtime configuration for the document pipeline.
///
/// Loaded once at startup and passed to pipeline components at construction;
/// components never read the environment themselves.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores chunk vectors.
    pub qdrant_url: String,
    /// Name of the Qdrant collection holding all document partitions.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Upper bound on input characters accepted by the embedding provider.
    pub embedding_max_chars: usize,
    /// Number of chunk texts sent to the provider per batch request.
    pub embedding_batch_size: usize,
    /// Base URL of the Ollama runtime for embedding, generation, and OCR.
    pub ollama_url: String,
    /// API key for the OpenAI embedding endpoint, when that provider is selected.
    pub openai_api_key: Option<String>,
    /// Generation model used for summaries and answers.
    pub generation_model: String,
    /// Context window of the generation model, in tokens.
    pub generation_context_tokens: usize,
    /// Vision model used to transcribe image uploads.
    pub ocr_model: String,
    /// Chunk length in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters; always below `chunk_size`.
    pub chunk_overlap: usize,
    /// Default number of chunks returned by retrieval.
    pub retrieval_top_k: usize,
    /// How long a document lives before the expiration sweep removes it.
    pub retention: Duration,
    /// Interval between expiration sweeps, in seconds.
    pub sweep_interval_secs: u64,
    /// Maximum accepted upload size in bytes.
    pub max_file_bytes: u64,
    /// Attempt ceiling for transient provider failures.
    pub retry_max_attempts: u32,
    /// Initial backoff delay in milliseconds; doubles per attempt.
    pub retry_base_delay_ms: u64,
    /// Word budget requested from the summarizer.
    pub summary_max_words: usize,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env_or("QDRANT_COLLECTION_NAME", "documents"),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env_or("EMBEDDING_PROVIDER", "ollama")
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: parse_env("EMBEDDING_DIMENSION", None)?,
            embedding_max_chars: parse_env("EMBEDDING_MAX_CHARS", Some(8000))?,
            embedding_batch_size: parse_env("EMBEDDING_BATCH_SIZE", Some(32))?,
            ollama_url: load_env_or("OLLAMA_URL", "http://127.0.0.1:11434"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            generation_model: load_env("GENERATION_MODEL")?,
            generation_context_tokens: parse_env("GENERATION_CONTEXT_TOKENS", Some(8192))?,
            ocr_model: load_env_or("OCR_MODEL", "llava"),
            chunk_size: parse_env("CHUNK_SIZE", Some(1000))?,
            chunk_overlap: parse_env("CHUNK_OVERLAP", Some(200))?,
            retrieval_top_k: parse_env("RETRIEVAL_TOP_K", Some(5))?,
            retention: Duration::days(parse_env("RETENTION_DAYS", Some(7))?),
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", Some(3600))?,
            max_file_bytes: parse_env("MAX_FILE_BYTES", Some(20 * 1024 * 1024))?,
            retry_max_attempts: parse_env("RETRY_MAX_ATTEMPTS", Some(3))?,
            retry_base_delay_ms: parse_env("RETRY_BASE_DELAY_MS", Some(250))?,
            summary_max_words: parse_env("SUMMARY_MAX_WORDS", Some(200))?,
        };
        config.validate()?;
        tracing::debug!(
            qdrant_url = %config.qdrant_url,
            collection = %config.qdrant_collection_name,
            embedding_provider = ?config.embedding_provider,
            chunk_size = config.chunk_size,
            chunk_overlap = config.chunk_overlap,
            retention_days = config.retention.whole_days(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Inconsistent(
                "CHUNK_OVERLAP must be smaller than CHUNK_SIZE".to_string(),
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("RETRY_MAX_ATTEMPTS".to_string()));
        }
        if matches!(self.embedding_provider, EmbeddingProvider::OpenAI)
            && self.openai_api_key.is_none()
        {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".to_string()));
        }
        Ok(())
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: Option<T>) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => default.ok_or_else(|| ConfigError::MissingVariable(key.to_string())),
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            qdrant_url: "http://127.0.0.1:6333".into(),
            qdrant_collection_name: "documents".into(),
            qdrant_api_key: None,
            embedding_provider: EmbeddingProvider::Ollama,
            embedding_model: "nomic-embed-text".into(),
            embedding_dimension: 768,
            embedding_max_chars: 8000,
            embedding_batch_size: 32,
            ollama_url: "http://127.0.0.1:11434".into(),
            openai_api_key: None,
            generation_model: "llama3.1".into(),
            generation_context_tokens: 8192,
            ocr_model: "llava".into(),
            chunk_size: 1000,
            chunk_overlap: 200,
            retrieval_top_k: 5,
            retention: Duration::days(7),
            sweep_interval_secs: 3600,
            max_file_bytes: 20 * 1024 * 1024,
            retry_max_attempts: 3,
            retry_base_delay_ms: 250,
            summary_max_words: 200,
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_overlap_at_or_above_chunk_size() {
        let mut config = base_config();
        config.chunk_overlap = config.chunk_size;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Inconsistent(_))
        ));
    }

    #[test]
    fn validate_requires_openai_key_for_openai_provider() {
        let mut config = base_config();
        config.embedding_provider = EmbeddingProvider::OpenAI;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingVariable(_))
        ));
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!(
            "OpenAI".parse::<EmbeddingProvider>(),
            Ok(EmbeddingProvider::OpenAI)
        );
        assert!("chroma".parse::<EmbeddingProvider>().is_err());
    }
}
