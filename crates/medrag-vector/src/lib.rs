pub mod error;
pub mod filter;
pub mod memory_store;
pub mod ollama_embedding_provider;
pub mod prep;
pub mod probe;
pub mod providers;
pub mod qdrant_store;
pub mod rag;
pub mod retriever;

pub use filter::*;
pub use memory_store::*;
pub use ollama_embedding_provider::*;
pub use prep::*;
pub use probe::*;
pub use providers::*;
pub use qdrant_store::*;
pub use rag::*;
pub use retriever::*;

// Re-export common types for convenience
pub use error::VectorError;
pub use medrag_core::{MedragError, ProductId, Result};
