//! Read-only adapter over an existing Qdrant collection.
use async_trait::async_trait;
use medrag_core::{
    CollectionInfo, FieldCondition, FilterExpression, MedragError, Payload, Result, SearchHit,
    VectorStore, VectorStoreConfig,
};
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, vectors_config::Config as VectorsConfigKind,
    Condition, Filter, PointId, SearchPointsBuilder, Value as QdrantValue,
};
use qdrant_client::Qdrant;
use secrecy::ExposeSecret;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

pub struct QdrantStore {
    client: Qdrant,
    uri: String,
}

impl QdrantStore {
    pub fn new(uri: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Qdrant::from_url(uri)
            .api_key(api_key)
            .timeout(timeout)
            .build()
            .map_err(|e| MedragError::vector_store(format!("failed to create client: {}", e)))?;

        info!(uri, "Qdrant client created");
        Ok(Self {
            client,
            uri: uri.to_string(),
        })
    }

    pub fn from_config(config: &VectorStoreConfig) -> Result<Self> {
        let uri = config
            .uri
            .as_deref()
            .ok_or_else(|| MedragError::missing("vector_store.uri"))?;
        let api_key = config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string());
        Self::new(uri, api_key, Duration::from_secs(config.timeout_secs))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Translate a filter expression into Qdrant's `must` filter.
pub fn to_qdrant_filter(expr: &FilterExpression) -> Filter {
    Filter::must(expr.must.iter().map(|condition| match condition {
        FieldCondition::AnyOf { key, values } => Condition::matches(key.clone(), values.clone()),
        FieldCondition::Equals { key, value } => Condition::matches(key.clone(), value.clone()),
    }))
}

fn point_id_to_string(id: Option<PointId>) -> String {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Num(n)) => n.to_string(),
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        None => String::new(),
    }
}

fn qdrant_value_to_json(value: QdrantValue) -> Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(qdrant_value_to_json).collect())
        }
        Some(Kind::StructValue(st)) => Value::Object(
            st.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_value_to_json(v)))
                .collect(),
        ),
    }
}

pub(crate) fn payload_to_json(payload: HashMap<String, QdrantValue>) -> Payload {
    payload
        .into_iter()
        .map(|(k, v)| (k, qdrant_value_to_json(v)))
        .collect::<Map<String, Value>>()
}

#[async_trait]
impl VectorStore for QdrantStore {
    #[instrument(skip(self, vector, filter), fields(dimension = vector.len()))]
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let mut request =
            SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64).with_payload(true);
        if let Some(expr) = filter {
            request = request.filter(to_qdrant_filter(expr));
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| MedragError::vector_store(format!("search failed: {}", e)))?;

        let hits: Vec<SearchHit> = response
            .result
            .into_iter()
            .map(|point| SearchHit {
                id: point_id_to_string(point.id),
                score: point.score,
                payload: payload_to_json(point.payload),
            })
            .collect();

        debug!(
            hits = hits.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Qdrant search complete"
        );
        Ok(hits)
    }

    async fn attach(&self, collection: &str) -> Result<CollectionInfo> {
        let response = self
            .client
            .collection_info(collection)
            .await
            .map_err(|e| {
                MedragError::vector_store(format!(
                    "failed to read collection '{}': {}",
                    collection, e
                ))
            })?;

        let info = response.result.ok_or_else(|| {
            MedragError::vector_store(format!("collection '{}' returned no info", collection))
        })?;

        // Named vectors: use the only one, otherwise the size is ambiguous
        let vector_size = info
            .config
            .as_ref()
            .and_then(|c| c.params.as_ref())
            .and_then(|p| p.vectors_config.as_ref())
            .and_then(|v| v.config.as_ref())
            .and_then(|config| match config {
                VectorsConfigKind::Params(params) => Some(params.size as usize),
                VectorsConfigKind::ParamsMap(map) if map.map.len() == 1 => {
                    map.map.values().next().map(|params| params.size as usize)
                }
                VectorsConfigKind::ParamsMap(_) => None,
            });

        info!(
            collection,
            vector_size = ?vector_size,
            points = ?info.points_count,
            "Attached to Qdrant collection"
        );

        Ok(CollectionInfo {
            name: collection.to_string(),
            vector_size,
            points_count: info.points_count,
        })
    }

    fn backend_name(&self) -> &str {
        "qdrant"
    }
}
