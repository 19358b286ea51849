use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Payload attached to an indexed record.
pub type Payload = Map<String, Value>;

/// Identifier of a product as stored in the catalog and in record payloads.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProductId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single predicate over one payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldCondition {
    /// `key` holds one of `values`
    AnyOf { key: String, values: Vec<String> },
    /// `key` holds exactly `value`
    Equals { key: String, value: String },
}

impl FieldCondition {
    pub fn key(&self) -> &str {
        match self {
            FieldCondition::AnyOf { key, .. } | FieldCondition::Equals { key, .. } => key,
        }
    }

    /// Evaluate against a payload. Only string values are compared, like a
    /// keyword match; array-valued fields match when any string element does.
    pub fn matches(&self, payload: &Payload) -> bool {
        let Some(field) = payload.get(self.key()) else {
            return false;
        };
        let candidates = keyword_strings(field);
        match self {
            FieldCondition::AnyOf { values, .. } => candidates
                .iter()
                .any(|candidate| values.iter().any(|v| v.as_str() == *candidate)),
            FieldCondition::Equals { value, .. } => {
                candidates.iter().any(|candidate| *candidate == value.as_str())
            }
        }
    }
}

fn keyword_strings(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Conjunction of field conditions restricting a vector search.
///
/// An absent filter is modelled as `Option::<FilterExpression>::None` and
/// matches every record; a `FilterExpression` always carries at least one
/// condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterExpression {
    pub must: Vec<FieldCondition>,
}

impl FilterExpression {
    /// Returns `None` for an empty condition list so that no always-true or
    /// always-false expression is ever constructed.
    pub fn all(conditions: Vec<FieldCondition>) -> Option<Self> {
        if conditions.is_empty() {
            None
        } else {
            Some(Self { must: conditions })
        }
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|condition| condition.matches(payload))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, condition) in self.must.iter().enumerate() {
            if idx > 0 {
                write!(f, " AND ")?;
            }
            match condition {
                FieldCondition::AnyOf { key, values } => {
                    write!(f, "{} IN [{}]", key, values.join(", "))?
                }
                FieldCondition::Equals { key, value } => write!(f, "{} == {}", key, value)?,
            }
        }
        Ok(())
    }
}

/// Evaluate an optional filter; the absent filter matches everything.
pub fn filter_matches(filter: Option<&FilterExpression>, payload: &Payload) -> bool {
    filter.map_or(true, |f| f.matches(payload))
}

/// One scored record returned by a vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: Payload,
}

/// Shape of an existing collection the pipeline attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    /// Dimension of the dense vectors, when the store reports it
    pub vector_size: Option<usize>,
    pub points_count: Option<u64>,
}

/// Everything needed to run retrieval for one question.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub products: BTreeSet<ProductId>,
    pub strength: Option<String>,
    pub filter: Option<FilterExpression>,
    pub top_k: usize,
}

/// Retrieved passage used to ground an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceNode {
    pub node_id: String,
    pub score: f32,
    pub text: String,
    #[serde(default)]
    pub metadata: Payload,
}

/// Final answer handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub response: String,
    pub sources: Vec<SourceNode>,
    pub elapsed_seconds: f64,
}

impl AnswerResult {
    /// Elapsed time rounded to whole seconds, e.g. `"3s"`.
    pub fn elapsed_display(&self) -> String {
        format!("{}s", self.elapsed_seconds.max(0.0).round() as u64)
    }
}
