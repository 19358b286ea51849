use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::MedragError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for MedragError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing(setting) => MedragError::ConfigurationMissing(setting),
            other => MedragError::Config(other.to_string()),
        }
    }
}

/// Main configuration for medrag
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MedragConfig {
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LLMConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub filter: FilterFieldsConfig,

    #[serde(default)]
    pub prompts: PromptConfig,

    #[serde(default)]
    pub rerank: RerankConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection to the externally populated vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Connection URI, e.g. "http://localhost:6334"
    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    /// Collection (index) name
    #[serde(default)]
    pub collection: Option<String>,

    #[serde(default = "default_vector_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            api_key: None,
            collection: None,
            timeout_secs: default_vector_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogConfig {
    /// Path to the comma-delimited product catalog
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: only "ollama" is currently supported
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Must match the model the index was built with
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: default_ollama_url(),
            dimension: default_embedding_dimension(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

/// LLM configuration.
///
/// The backend is chosen by the presence of `api_key`: with a key the hosted
/// API is used, otherwise the self-hosted server at `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Self-hosted (Ollama) server URL
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Hosted API key
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    /// Hosted API base URL
    #[serde(default = "default_hosted_base_url")]
    pub hosted_base_url: String,

    #[serde(default = "default_hosted_model")]
    pub hosted_model: String,

    #[serde(default = "default_self_hosted_model")]
    pub self_hosted_model: String,

    /// Overrides the backend's default context window
    #[serde(default)]
    pub context_window: Option<usize>,

    /// Tokens reserved for the generated answer
    #[serde(default = "default_num_output")]
    pub num_output: usize,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries performed by the provider client (the core never retries)
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            api_key: None,
            hosted_base_url: default_hosted_base_url(),
            hosted_model: default_hosted_model(),
            self_hosted_model: default_self_hosted_model(),
            context_window: None,
            num_output: default_num_output(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: 0,
        }
    }
}

impl LLMConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .map(|k| !k.expose_secret().trim().is_empty())
            .unwrap_or(false)
    }
}

/// Retrieval, probe and chunking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Result limit of the structural probe search
    #[serde(default = "default_probe_limit")]
    pub probe_limit: usize,

    /// Constant every component of the probe vector is set to
    #[serde(default = "default_probe_value")]
    pub probe_value: f32,

    /// Chunk size (tokens) the index was built with
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            probe_limit: default_probe_limit(),
            probe_value: default_probe_value(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Payload field names the filter is compiled against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterFieldsConfig {
    #[serde(default = "default_product_key")]
    pub product_key: String,

    #[serde(default = "default_strength_key")]
    pub strength_key: String,
}

impl Default for FilterFieldsConfig {
    fn default() -> Self {
        Self {
            product_key: default_product_key(),
            strength_key: default_strength_key(),
        }
    }
}

/// Optional prompt template overrides (plain text files)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptConfig {
    #[serde(default)]
    pub text_qa_path: Option<PathBuf>,

    #[serde(default)]
    pub refine_path: Option<PathBuf>,
}

/// Reranking service credentials. Loaded but not used by retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RerankConfig {
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rotated log files
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Write log files in addition to stderr
    #[serde(default = "default_true")]
    pub file: bool,

    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: default_log_directory(),
            file: true,
            max_files: default_max_log_files(),
        }
    }
}

fn default_vector_timeout_secs() -> u64 {
    30
}
fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_dimension() -> usize {
    768
}
fn default_batch_size() -> usize {
    32
}
fn default_embedding_timeout_secs() -> u64 {
    60
}
fn default_hosted_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_hosted_model() -> String {
    "gpt-4".to_string()
}
fn default_self_hosted_model() -> String {
    "llama3.1:70b".to_string()
}
fn default_num_output() -> usize {
    256
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_top_k() -> usize {
    10
}
fn default_probe_limit() -> usize {
    10
}
fn default_probe_value() -> f32 {
    0.1
}
fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    10
}
fn default_product_key() -> String {
    "product_id".to_string()
}
fn default_strength_key() -> String {
    "strength".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}
fn default_true() -> bool {
    true
}
fn default_max_log_files() -> usize {
    20
}

/// Configuration manager with smart defaults
pub struct ConfigManager {
    config: MedragConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (`explicit`, else .medrag.toml, else ~/.medrag/config.toml)
    /// 3. Sensible defaults
    ///
    /// Fails when a required setting is missing; the service must not start.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                (Self::read_toml_file(path)?, Some(path.to_path_buf()))
            }
            None => Self::load_config_file()?,
        };

        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        let llm_backend = if config.llm.has_api_key() {
            "hosted"
        } else {
            "self-hosted"
        };
        info!(
            config_file = %config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
            collection = config.vector_store.collection.as_deref().unwrap_or_default(),
            embedding_model = %config.embedding.model,
            llm_backend,
            "Configuration loaded"
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Build a manager around an already assembled configuration.
    pub fn from_config(config: MedragConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".medrag.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .medrag.env: {}", e);
                }
            }
        }
    }

    /// Search order:
    /// 1. ./.medrag.toml
    /// 2. ~/.medrag/config.toml
    /// 3. defaults
    fn load_config_file() -> Result<(MedragConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".medrag.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".medrag").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((MedragConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<MedragConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(mut config: MedragConfig) -> MedragConfig {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        // Vector store
        if let Some(uri) = var("MEDRAG_VECTOR_URI") {
            config.vector_store.uri = Some(uri);
        }
        if let Some(key) = var("MEDRAG_VECTOR_API_KEY") {
            config.vector_store.api_key = Some(SecretString::from(key));
        }
        if let Some(collection) = var("MEDRAG_COLLECTION") {
            config.vector_store.collection = Some(collection);
        }

        if let Some(path) = var("MEDRAG_CATALOG_PATH") {
            config.catalog.path = Some(PathBuf::from(path));
        }

        // Embedding
        if let Some(url) = var("MEDRAG_EMBEDDING_URL") {
            config.embedding.base_url = url;
        }
        if let Some(model) = var("MEDRAG_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dim) = var("MEDRAG_EMBEDDING_DIMENSION").and_then(|d| d.parse().ok()) {
            config.embedding.dimension = dim;
        }

        // LLM
        if let Some(url) = var("MEDRAG_LLM_URL") {
            config.llm.base_url = url;
        }
        if let Some(key) = var("MEDRAG_LLM_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
            config.llm.api_key = Some(SecretString::from(key));
        }
        if let Some(model) = var("MEDRAG_LLM_MODEL") {
            if config.llm.has_api_key() {
                config.llm.hosted_model = model;
            } else {
                config.llm.self_hosted_model = model;
            }
        }

        if let Some(key) = var("MEDRAG_RERANK_API_KEY") {
            config.rerank.api_key = Some(SecretString::from(key));
        }

        if let Some(top_k) = var("MEDRAG_TOP_K").and_then(|k| k.parse().ok()) {
            config.retrieval.top_k = top_k;
        }

        if let Some(level) = var("RUST_LOG") {
            config.logging.level = level;
        }

        config
    }

    fn validate_config(config: &MedragConfig) -> Result<(), ConfigError> {
        let present = |value: Option<&str>| value.map(|v| !v.trim().is_empty()).unwrap_or(false);

        if !present(config.vector_store.uri.as_deref()) {
            return Err(ConfigError::Missing(
                "vector_store.uri (MEDRAG_VECTOR_URI)".to_string(),
            ));
        }
        if !present(config.vector_store.collection.as_deref()) {
            return Err(ConfigError::Missing(
                "vector_store.collection (MEDRAG_COLLECTION)".to_string(),
            ));
        }
        if config.catalog.path.is_none() {
            return Err(ConfigError::Missing(
                "catalog.path (MEDRAG_CATALOG_PATH)".to_string(),
            ));
        }

        if config.embedding.provider != "ollama" {
            return Err(ConfigError::ValidationError(format!(
                "Invalid embedding provider: {}. Must be: ollama",
                config.embedding.provider
            )));
        }
        if config.embedding.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimension must be greater than zero".to_string(),
            ));
        }
        if config.retrieval.top_k == 0 || config.retrieval.probe_limit == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k and retrieval.probe_limit must be greater than zero".to_string(),
            ));
        }
        if config.retrieval.chunk_overlap >= config.retrieval.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "retrieval.chunk_overlap ({}) must be smaller than retrieval.chunk_size ({})",
                config.retrieval.chunk_overlap, config.retrieval.chunk_size
            )));
        }

        // RUST_LOG may carry directives such as "medrag=debug", only check bare levels
        let level = config.logging.level.as_str();
        if !level.contains('=') && !level.contains(',') {
            match level {
                "trace" | "debug" | "info" | "warn" | "error" => {}
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                        other
                    )))
                }
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &MedragConfig {
        &self.config
    }

    pub fn into_config(self) -> MedragConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Write a default config file. Secrets are never written.
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let mut config = MedragConfig::default();
        config.vector_store.uri = Some("http://localhost:6334".to_string());
        config.vector_store.collection = Some("products".to_string());
        config.catalog.path = Some(PathBuf::from("catalog.csv"));

        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            }
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> MedragConfig {
        let mut config = MedragConfig::default();
        config.vector_store.uri = Some("http://localhost:6334".into());
        config.vector_store.collection = Some("products".into());
        config.catalog.path = Some(PathBuf::from("catalog.csv"));
        config
    }

    #[test]
    fn test_default_config() {
        let config = MedragConfig::default();
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.probe_limit, 10);
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.llm.timeout_secs, 120);
        assert!(!config.llm.has_api_key());
    }

    #[test]
    fn test_missing_required_settings() {
        let err = ConfigManager::validate_config(&MedragConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));

        let mut config = valid_config();
        config.vector_store.collection = Some("  ".into());
        let err: MedragError = ConfigManager::validate_config(&config).unwrap_err().into();
        assert!(matches!(err, MedragError::ConfigurationMissing(_)));
    }

    #[test]
    fn test_config_validation() {
        let config = valid_config();
        assert!(ConfigManager::validate_config(&config).is_ok());

        let mut bad = config.clone();
        bad.logging.level = "loud".into();
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut directives = config.clone();
        directives.logging.level = "medrag=debug,info".into();
        assert!(ConfigManager::validate_config(&directives).is_ok());

        let mut bad = config.clone();
        bad.retrieval.chunk_overlap = bad.retrieval.chunk_size;
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = config;
        bad.retrieval.top_k = 0;
        assert!(ConfigManager::validate_config(&bad).is_err());
    }

    #[test]
    fn test_api_key_selects_backend() {
        let mut config = valid_config();
        config.llm.api_key = Some(SecretString::from(String::new()));
        assert!(!config.llm.has_api_key());
        config.llm.api_key = Some(SecretString::from("sk-test".to_string()));
        assert!(config.llm.has_api_key());
    }
}
