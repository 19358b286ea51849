use async_trait::async_trait;
use medrag_core::{MetadataCatalog, Payload, ProductRef, Result};
use medrag_vector::{
    EmbeddingProvider, FallbackSearchProbe, FilterCompiler, InMemoryVectorStore,
    ProductDetector, ProviderCharacteristics, VectorIndexRetriever,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const COLLECTION: &str = "leaflets";
const DIM: usize = 4;

/// Embeds by keyword so tests control similarity.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        Ok(vec![
            text.contains("dose") as u8 as f32,
            text.contains("storage") as u8 as f32,
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

    fn performance_characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            typical_latency: Duration::ZERO,
            max_batch_size: 16,
            requires_network: false,
        }
    }
}

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

fn seeded_store() -> Arc<InMemoryVectorStore> {
    let store = InMemoryVectorStore::new();
    store.create_collection(COLLECTION, DIM);
    store
        .upsert(
            COLLECTION,
            "los-dose",
            vec![1.0, 0.0, 0.0, 1.0],
            payload(json!({"product_id": "LOS", "strength": "50mg", "text": "Losartan 50mg: one tablet daily."})),
        )
        .unwrap();
    store
        .upsert(
            COLLECTION,
            "los-storage",
            vec![0.0, 1.0, 0.0, 1.0],
            payload(json!({"product_id": "LOS", "strength": "50mg", "text": "Store losartan below 30C."})),
        )
        .unwrap();
    store
        .upsert(
            COLLECTION,
            "aml-dose",
            vec![1.0, 0.0, 0.0, 1.0],
            payload(json!({"product_id": "AML", "strength": "5mg", "text": "Amlodipine 5mg once daily."})),
        )
        .unwrap();
    Arc::new(store)
}

fn detector() -> ProductDetector {
    ProductDetector::new(Arc::new(MetadataCatalog::from_products(vec![
        ProductRef::new("LOS", "Losartan").with_strengths(["50mg"]),
        ProductRef::new("AML", "Amlodipine").with_strengths(["5mg"]),
        ProductRef::new("MET", "Metformin"),
    ])))
}

#[tokio::test]
async fn detected_product_restricts_retrieval() {
    let store = seeded_store();
    let detection = detector().detect("What is the usual losartan dose?");
    let filter = FilterCompiler::default().compile(&detection.products, None);

    let probe = FallbackSearchProbe::new(store.clone(), COLLECTION, DIM);
    let resolved = probe.resolve(filter.clone()).await.unwrap();
    assert_eq!(resolved, filter);

    let retriever = VectorIndexRetriever::new(Arc::new(KeywordEmbedder), store, COLLECTION)
        .with_filter(resolved);
    let nodes = retriever.retrieve("What is the usual losartan dose?").await.unwrap();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].node_id, "los-dose");
    assert!(nodes.iter().all(|n| n.metadata["product_id"] == "LOS"));
}

#[tokio::test]
async fn product_without_passages_falls_back_to_unfiltered() {
    let store = seeded_store();
    let detection = detector().detect("metformin dose");
    assert_eq!(detection.products.len(), 1);

    let filter = FilterCompiler::default().compile(&detection.products, None);
    assert!(filter.is_some());

    let probe = FallbackSearchProbe::new(store.clone(), COLLECTION, DIM);
    let resolved = probe.resolve(filter).await.unwrap();
    assert!(resolved.is_none());

    let retriever = VectorIndexRetriever::new(Arc::new(KeywordEmbedder), store, COLLECTION)
        .with_top_k(10)
        .with_filter(resolved);
    let nodes = retriever.retrieve("metformin dose").await.unwrap();
    assert_eq!(nodes.len(), 3);
}

#[tokio::test]
async fn strength_narrows_the_filter() {
    let store = seeded_store();
    let products = detector().detect("losartan").products;

    let compiler = FilterCompiler::default();
    let probe = FallbackSearchProbe::new(store.clone(), COLLECTION, DIM);

    let matching = compiler.compile(&products, Some("50mg"));
    assert!(probe.resolve(matching).await.unwrap().is_some());

    let missing = compiler.compile(&products, Some("100mg"));
    assert!(probe.resolve(missing).await.unwrap().is_none());
}

#[tokio::test]
async fn top_k_limits_results() {
    let retriever = VectorIndexRetriever::new(Arc::new(KeywordEmbedder), seeded_store(), COLLECTION)
        .with_top_k(1);
    let nodes = retriever.retrieve("storage").await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].text, "Store losartan below 30C.");
}
