//! In-process vector store with exact cosine search.
//!
//! Stands in for the external index in tests and local experiments. Points are
//! loaded explicitly through [`InMemoryVectorStore::upsert`]; the retrieval
//! path only ever reads.
use async_trait::async_trait;
use medrag_core::{
    filter_matches, CollectionInfo, FilterExpression, MedragError, Payload, Result, SearchHit,
    VectorStore,
};
use parking_lot::RwLock;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

use crate::error::VectorError;

#[derive(Debug, Clone)]
struct StoredPoint {
    id: String,
    vector: Vec<f32>,
    payload: Payload,
}

#[derive(Debug, Default)]
struct MemoryCollection {
    dimension: usize,
    points: Vec<StoredPoint>,
}

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    search_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_collection(&self, name: impl Into<String>, dimension: usize) {
        self.collections.write().insert(
            name.into(),
            MemoryCollection {
                dimension,
                points: Vec::new(),
            },
        );
    }

    /// Insert or replace a point.
    pub fn upsert(
        &self,
        collection: &str,
        id: impl Into<String>,
        vector: Vec<f32>,
        payload: Payload,
    ) -> Result<()> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;
        if vector.is_empty() {
            return Err(VectorError::EmptyVector.into());
        }
        if vector.len() != coll.dimension {
            return Err(VectorError::DimensionMismatch(coll.dimension, vector.len()).into());
        }

        let id = id.into();
        coll.points.retain(|p| p.id != id);
        coll.points.push(StoredPoint {
            id,
            vector,
            payload,
        });
        Ok(())
    }

    /// Number of `search` calls served so far.
    pub fn search_count(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Simulate an outage: every call fails with an upstream error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(MedragError::vector_store("in-memory store marked unavailable"))
        } else {
            Ok(())
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<SearchHit>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;
        if vector.len() != coll.dimension {
            return Err(VectorError::DimensionMismatch(coll.dimension, vector.len()).into());
        }

        let mut hits: Vec<SearchHit> = coll
            .points
            .iter()
            .filter(|p| filter_matches(filter, &p.payload))
            .map(|p| SearchHit {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);

        debug!(
            collection,
            hits = hits.len(),
            filtered = filter.is_some(),
            "In-memory search"
        );
        Ok(hits)
    }

    async fn attach(&self, collection: &str) -> Result<CollectionInfo> {
        self.check_available()?;
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;
        Ok(CollectionInfo {
            name: collection.to_string(),
            vector_size: Some(coll.dimension),
            points_count: Some(coll.points.len() as u64),
        })
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
