use medrag_core::MedragError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {0}, got {1}")]
    DimensionMismatch(usize, usize),

    #[error("Vector is empty")]
    EmptyVector,

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Search error: {0}")]
    Search(String),
}

impl From<VectorError> for MedragError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch(..) | VectorError::EmptyVector => {
                MedragError::InvalidInput(err.to_string())
            }
            VectorError::CollectionNotFound(_) => MedragError::Config(err.to_string()),
            VectorError::Embedding(msg) => MedragError::embedding(msg),
            VectorError::Search(msg) => MedragError::vector_store(msg),
        }
    }
}
