use crate::{CollectionInfo, FilterExpression, Result, SearchHit};
use async_trait::async_trait;

/// Read-side capability of an externally owned vector index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Nearest-neighbour search restricted by an optional filter.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<SearchHit>>;

    /// Attach to an existing collection. Never creates or populates it.
    async fn attach(&self, collection: &str) -> Result<CollectionInfo>;

    fn backend_name(&self) -> &str;
}
