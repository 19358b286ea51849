use async_trait::async_trait;
use medrag_ai::{
    AnswerEngine, EngineContext, GenerationConfig, LLMProvider, LLMResponse, LLMResult, Message,
    ProviderCharacteristics, CONTEXT_DELIMITER, EMPTY_RESPONSE,
};
use medrag_core::{
    MedragError, MetadataCatalog, Payload, ProductId, ProductRef, Result, UpstreamService,
};
use medrag_vector::{EmbeddingProvider, InMemoryVectorStore};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const COLLECTION: &str = "leaflets";
const DIM: usize = 4;

struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        Ok(vec![
            text.contains("dose") as u8 as f32,
            text.contains("stor") as u8 as f32,
            text.contains("side effect") as u8 as f32,
            1.0,
        ])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn embedding_dimension(&self) -> usize {
        DIM
    }

    fn provider_name(&self) -> &str {
        "keyword"
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn performance_characteristics(&self) -> medrag_vector::ProviderCharacteristics {
        medrag_vector::ProviderCharacteristics {
            typical_latency: Duration::ZERO,
            max_batch_size: 16,
            requires_network: false,
        }
    }
}

/// Answers with a fixed string and keeps every prompt it was sent.
#[derive(Default)]
struct ScriptedLlm {
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn generate_chat(
        &self,
        messages: &[Message],
        _config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        self.prompts
            .lock()
            .extend(messages.iter().map(|m| m.content.clone()));
        Ok(LLMResponse {
            content: "Take one tablet daily.".into(),
            prompt_tokens: None,
            completion_tokens: None,
            finish_reason: Some("stop".into()),
            model: "scripted".into(),
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: 3900,
            num_output: 256,
            avg_latency_ms: 0,
            hosted: false,
        }
    }
}

struct FailingLlm;

#[async_trait]
impl LLMProvider for FailingLlm {
    async fn generate_chat(
        &self,
        _messages: &[Message],
        _config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        Err(MedragError::llm("connection refused"))
    }

    async fn is_available(&self) -> bool {
        false
    }

    fn provider_name(&self) -> &str {
        "failing"
    }

    fn model_name(&self) -> &str {
        "failing"
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: 3900,
            num_output: 256,
            avg_latency_ms: 0,
            hosted: false,
        }
    }
}

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

fn seeded_store() -> Arc<InMemoryVectorStore> {
    let store = InMemoryVectorStore::new();
    store.create_collection(COLLECTION, DIM);
    let points = [
        ("los-dose", [1.0, 0.0, 0.0, 1.0], json!({"product_id": "LOS", "strength": "50mg", "text": "Losartan 50mg: one tablet daily."})),
        ("los-storage", [0.0, 1.0, 0.0, 1.0], json!({"product_id": "LOS", "strength": "50mg", "text": "Store losartan below 30C."})),
        ("los-100-dose", [1.0, 0.0, 0.0, 1.0], json!({"product_id": "LOS", "strength": "100mg", "text": "Losartan 100mg: one tablet daily."})),
        ("aml-dose", [1.0, 0.0, 0.0, 1.0], json!({"product_id": "AML", "strength": "5mg", "text": "Amlodipine 5mg once daily."})),
    ];
    for (id, vector, body) in points {
        store
            .upsert(COLLECTION, id, vector.to_vec(), payload(body))
            .unwrap();
    }
    Arc::new(store)
}

fn catalog() -> Arc<MetadataCatalog> {
    Arc::new(MetadataCatalog::from_products(vec![
        ProductRef::new("LOS", "Losartan")
            .with_strengths(["50mg", "100mg"])
            .with_attribute("form", "tablet"),
        ProductRef::new("AML", "Amlodipine").with_strengths(["5mg"]),
        ProductRef::new("MET", "Metformin").with_synonyms(["glucophage"]),
    ]))
}

fn engine(llm: Arc<dyn LLMProvider>, store: Arc<InMemoryVectorStore>) -> AnswerEngine {
    let ctx = EngineContext::new(catalog(), Arc::new(KeywordEmbedder), llm, store, COLLECTION)
        .unwrap();
    AnswerEngine::new(Arc::new(ctx))
}

fn ids(result: &medrag_core::AnswerResult) -> Vec<&str> {
    result.sources.iter().map(|s| s.node_id.as_str()).collect()
}

#[tokio::test]
async fn auto_mode_applies_detected_product_filter() {
    let llm = Arc::new(ScriptedLlm::default());
    let store = seeded_store();
    let engine = engine(llm.clone(), store.clone());

    let result = engine
        .answer_auto("What is the usual losartan dose?")
        .await
        .unwrap();

    assert_eq!(result.response, "Take one tablet daily.");
    assert!(!result.sources.is_empty());
    assert!(result
        .sources
        .iter()
        .all(|s| s.metadata["product_id"] == "LOS"));
    // probe + retrieval
    assert_eq!(store.search_count(), 2);

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(CONTEXT_DELIMITER));
    assert!(prompts[0].contains("Product: Losartan (id: LOS)"));
    assert!(prompts[0].contains("Available strengths: 50mg, 100mg"));
    assert!(prompts[0].contains("form: tablet"));
}

#[tokio::test]
async fn filter_is_dropped_when_product_has_no_passages() {
    let llm = Arc::new(ScriptedLlm::default());
    let store = seeded_store();
    let engine = engine(llm.clone(), store.clone());

    let result = engine.answer_auto("Glucophage dose for adults").await.unwrap();

    // Unfiltered retrieval over the whole collection
    assert_eq!(result.sources.len(), 4);
    assert!(ids(&result).contains(&"aml-dose"));
    assert_eq!(store.search_count(), 2);
    assert!(llm.prompts()[0].contains("Product: Metformin (id: MET)"));
}

#[tokio::test]
async fn filtered_mode_honours_strength_and_keeps_query() {
    let llm = Arc::new(ScriptedLlm::default());
    let engine = engine(llm.clone(), seeded_store());

    let products = BTreeSet::from([ProductId::new("LOS")]);
    let result = engine
        .answer_filtered("What is the dose?", products, Some("100mg".into()))
        .await
        .unwrap();

    assert_eq!(ids(&result), vec!["los-100-dose"]);

    let prompt = &llm.prompts()[0];
    assert!(prompt.contains("Question: What is the dose?\nAnswer"));
    assert!(!prompt.contains(CONTEXT_DELIMITER));
    assert!(!prompt.contains("Product: Losartan"));
}

#[tokio::test]
async fn llm_failure_propagates() {
    let engine = engine(Arc::new(FailingLlm), seeded_store());

    let err = engine
        .answer_auto("What is the usual losartan dose?")
        .await
        .unwrap_err();

    assert_eq!(err.upstream_service(), Some(UpstreamService::Llm));
}

#[tokio::test]
async fn vector_store_failure_propagates() {
    let store = seeded_store();
    store.set_unavailable(true);
    let engine = engine(Arc::new(ScriptedLlm::default()), store);

    let err = engine.answer_auto("losartan dose").await.unwrap_err();
    assert_eq!(err.upstream_service(), Some(UpstreamService::VectorStore));
}

#[tokio::test]
async fn unknown_product_uses_unfiltered_search() {
    let llm = Arc::new(ScriptedLlm::default());
    let store = seeded_store();
    let engine = engine(llm.clone(), store.clone());

    assert!(engine.detect("How should tablets be stored?").is_empty());
    let result = engine
        .answer_auto("How should tablets be stored?")
        .await
        .unwrap();

    assert_eq!(result.sources.len(), 4);
    assert_eq!(result.sources[0].node_id, "los-storage");
    // No filter means no probe search
    assert_eq!(store.search_count(), 1);
    // The delimiter is appended even without context
    assert!(llm.prompts()[0].contains(CONTEXT_DELIMITER.trim_end()));
    assert!(result.elapsed_seconds >= 0.0);
}

#[tokio::test]
async fn empty_collection_gives_empty_response() {
    let llm = Arc::new(ScriptedLlm::default());
    let store = InMemoryVectorStore::new();
    store.create_collection(COLLECTION, DIM);
    let engine = engine(llm.clone(), Arc::new(store));

    let result = engine.answer_auto("any dose advice?").await.unwrap();
    assert_eq!(result.response, EMPTY_RESPONSE);
    assert!(result.sources.is_empty());
    assert!(llm.prompts().is_empty());
}

#[tokio::test]
async fn dimension_mismatch_is_a_config_error() {
    let store = InMemoryVectorStore::new();
    store.create_collection(COLLECTION, DIM + 1);
    let engine = engine(Arc::new(ScriptedLlm::default()), Arc::new(store));

    let err = engine.answer_auto("dose").await.unwrap_err();
    assert!(matches!(err, MedragError::Config(_)));
}

#[tokio::test]
async fn missing_collection_is_reported() {
    let store = InMemoryVectorStore::new();
    let engine = engine(Arc::new(ScriptedLlm::default()), Arc::new(store));

    assert!(engine.answer_auto("dose").await.is_err());
}

#[tokio::test]
async fn engine_serves_concurrent_requests() {
    let llm = Arc::new(ScriptedLlm::default());
    let engine = Arc::new(engine(llm.clone(), seeded_store()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine.answer_auto("losartan dose").await
            } else {
                engine
                    .answer_filtered(
                        "dose",
                        BTreeSet::from([ProductId::new("AML")]),
                        None,
                    )
                    .await
            }
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(!result.sources.is_empty());
    }
    assert_eq!(llm.prompts().len(), 8);
}
