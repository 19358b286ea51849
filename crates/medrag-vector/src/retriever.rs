use medrag_core::{FilterExpression, Payload, Result, SearchHit, SourceNode, VectorStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::providers::EmbeddingProvider;

pub const DEFAULT_TOP_K: usize = 10;

const TEXT_FIELD: &str = "text";
const NODE_CONTENT_FIELD: &str = "_node_content";

/// Embeds a query and fetches the `top_k` nearest passages, optionally
/// restricted by a filter.
pub struct VectorIndexRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    top_k: usize,
    filter: Option<FilterExpression>,
}

impl VectorIndexRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            top_k: DEFAULT_TOP_K,
            filter: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_filter(mut self, filter: Option<FilterExpression>) -> Self {
        self.filter = filter;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn filter(&self) -> Option<&FilterExpression> {
        self.filter.as_ref()
    }

    #[instrument(skip(self, query), fields(top_k = self.top_k, filtered = self.filter.is_some()))]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<SourceNode>> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self
            .store
            .search(&self.collection, &embedding, self.top_k, self.filter.as_ref())
            .await?;

        debug!(hits = hits.len(), "Retrieved passages");
        Ok(hits.into_iter().map(source_node_from_hit).collect())
    }
}

/// Convert a raw hit into a source node.
///
/// Passage text lives in `text`, or inside the JSON document stored under
/// `_node_content`. Underscore-prefixed keys are internal and not exposed.
pub fn source_node_from_hit(hit: SearchHit) -> SourceNode {
    let text = payload_text(&hit.payload).unwrap_or_default();
    let metadata: Payload = hit
        .payload
        .into_iter()
        .filter(|(key, _)| !key.starts_with('_') && key != TEXT_FIELD)
        .collect();

    SourceNode {
        node_id: hit.id,
        score: hit.score,
        text,
        metadata,
    }
}

fn payload_text(payload: &Payload) -> Option<String> {
    if let Some(Value::String(text)) = payload.get(TEXT_FIELD) {
        return Some(text.clone());
    }

    let content = match payload.get(NODE_CONTENT_FIELD)? {
        Value::String(raw) => serde_json::from_str::<Value>(raw).ok()?,
        Value::Object(obj) => Value::Object(obj.clone()),
        _ => return None,
    };
    content
        .get(TEXT_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(payload: Value) -> SearchHit {
        SearchHit {
            id: "n1".into(),
            score: 0.8,
            payload: payload.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn text_field_wins() {
        let node = source_node_from_hit(hit(json!({
            "text": "Take once daily.",
            "product_id": "LOS",
            "_node_type": "TextNode"
        })));
        assert_eq!(node.text, "Take once daily.");
        assert_eq!(node.metadata.len(), 1);
        assert_eq!(node.metadata["product_id"], "LOS");
    }

    #[test]
    fn falls_back_to_serialized_node_content() {
        let content = json!({"text": "Store below 25C.", "id_": "abc"}).to_string();
        let node = source_node_from_hit(hit(json!({
            "_node_content": content,
            "strength": "50mg"
        })));
        assert_eq!(node.text, "Store below 25C.");
        assert_eq!(node.metadata["strength"], "50mg");
        assert!(!node.metadata.contains_key("_node_content"));
    }

    #[test]
    fn missing_text_is_empty() {
        let node = source_node_from_hit(hit(json!({"_node_content": "not json"})));
        assert!(node.text.is_empty());
        assert_eq!(node.node_id, "n1");
    }
}
