use std::fmt;
use thiserror::Error;

/// External service a request depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamService {
    VectorStore,
    Embedding,
    Llm,
}

impl fmt::Display for UpstreamService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamService::VectorStore => write!(f, "vector store"),
            UpstreamService::Embedding => write!(f, "embedding service"),
            UpstreamService::Llm => write!(f, "llm"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MedragError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required configuration: {0}")]
    ConfigurationMissing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Prompt template error: {0}")]
    Template(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{service} unavailable: {message}")]
    Upstream {
        service: UpstreamService,
        message: String,
    },
}

impl MedragError {
    pub fn upstream(service: UpstreamService, msg: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: msg.into(),
        }
    }

    pub fn vector_store(msg: impl Into<String>) -> Self {
        Self::upstream(UpstreamService::VectorStore, msg)
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::upstream(UpstreamService::Embedding, msg)
    }

    pub fn llm(msg: impl Into<String>) -> Self {
        Self::upstream(UpstreamService::Llm, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn missing(setting: impl Into<String>) -> Self {
        Self::ConfigurationMissing(setting.into())
    }

    /// Which upstream service failed, if this is an availability error.
    pub fn upstream_service(&self) -> Option<UpstreamService> {
        match self {
            MedragError::Upstream { service, .. } => Some(*service),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MedragError>;
