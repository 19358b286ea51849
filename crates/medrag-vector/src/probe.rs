use medrag_core::{FilterExpression, Result, VectorStore};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const DEFAULT_PROBE_LIMIT: usize = 10;
pub const DEFAULT_PROBE_VALUE: f32 = 0.1;

/// Checks whether a filter selects anything before it is used for retrieval.
///
/// The probe searches with a constant vector: only the existence of matching
/// records matters, not their ranking. When the filter selects nothing the
/// caller falls back to unfiltered retrieval.
pub struct FallbackSearchProbe {
    store: Arc<dyn VectorStore>,
    collection: String,
    dimension: usize,
    limit: usize,
    value: f32,
}

impl FallbackSearchProbe {
    pub fn new(store: Arc<dyn VectorStore>, collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            store,
            collection: collection.into(),
            dimension,
            limit: DEFAULT_PROBE_LIMIT,
            value: DEFAULT_PROBE_VALUE,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_value(mut self, value: f32) -> Self {
        self.value = value;
        self
    }

    fn probe_vector(&self) -> Vec<f32> {
        vec![self.value; self.dimension]
    }

    /// Returns the filter unchanged when it selects at least one record,
    /// otherwise `None`. Store errors are propagated.
    #[instrument(skip(self, filter), fields(collection = %self.collection))]
    pub async fn resolve(
        &self,
        filter: Option<FilterExpression>,
    ) -> Result<Option<FilterExpression>> {
        let Some(filter) = filter else {
            debug!("No filter to probe");
            return Ok(None);
        };

        let hits = self
            .store
            .search(&self.collection, &self.probe_vector(), self.limit, Some(&filter))
            .await?;

        if hits.is_empty() {
            warn!(filter = %filter, "Probe found no passages for filter, filter dropped");
            return Ok(None);
        }

        debug!(hits = hits.len(), "Probe matched, keeping filter");
        Ok(Some(filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryVectorStore;
    use medrag_core::FieldCondition;
    use serde_json::json;

    fn store() -> Arc<InMemoryVectorStore> {
        let store = InMemoryVectorStore::new();
        store.create_collection("leaflets", 3);
        store
            .upsert(
                "leaflets",
                "1",
                vec![0.2, 0.3, 0.4],
                json!({"product_id": "LOS"}).as_object().cloned().unwrap(),
            )
            .unwrap();
        Arc::new(store)
    }

    fn product_filter(id: &str) -> FilterExpression {
        FilterExpression::all(vec![FieldCondition::AnyOf {
            key: "product_id".into(),
            values: vec![id.into()],
        }])
        .unwrap()
    }

    #[tokio::test]
    async fn keeps_filter_with_hits() {
        let store = store();
        let probe = FallbackSearchProbe::new(store.clone(), "leaflets", 3);
        let resolved = probe.resolve(Some(product_filter("LOS"))).await.unwrap();
        assert_eq!(resolved, Some(product_filter("LOS")));
        assert_eq!(store.search_count(), 1);
    }

    #[tokio::test]
    async fn drops_filter_without_hits() {
        let probe = FallbackSearchProbe::new(store(), "leaflets", 3);
        let resolved = probe.resolve(Some(product_filter("AML"))).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn absent_filter_skips_the_store() {
        let store = store();
        let probe = FallbackSearchProbe::new(store.clone(), "leaflets", 3);
        assert!(probe.resolve(None).await.unwrap().is_none());
        assert_eq!(store.search_count(), 0);
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let store = store();
        store.set_unavailable(true);
        let probe = FallbackSearchProbe::new(store, "leaflets", 3);
        let err = probe.resolve(Some(product_filter("LOS"))).await.unwrap_err();
        assert!(err.upstream_service().is_some());
    }
}
