use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};

use medrag_core::{
    AnswerResult, FilterExpression, MedragConfig, MedragError, MetadataCatalog, ProductId,
    Result, RetrievalRequest, VectorStore,
};
use medrag_vector::{
    ChunkingPolicy, Detection, EmbeddingProvider, FallbackSearchProbe, FilterCompiler,
    OllamaEmbeddingProvider, ProductDetector, QdrantStore, DEFAULT_PROBE_LIMIT,
    DEFAULT_PROBE_VALUE, DEFAULT_TOP_K,
};

use crate::llm_factory::LLMProviderFactory;
use crate::llm_provider::{GenerationConfig, LLMProvider};
use crate::rag::pipeline::QueryPipelineBuilder;
use crate::rag::prompts::PromptTemplates;

/// Separates the user question from the catalog context in auto mode.
pub const CONTEXT_DELIMITER: &str =
    "\n---------\nContext and more information about the products:\n";

fn filter_json(filter: Option<&FilterExpression>) -> String {
    filter.map_or_else(|| "none".to_string(), FilterExpression::to_json)
}

/// Long-lived collaborators shared by every request.
pub struct EngineContext {
    pub catalog: Arc<MetadataCatalog>,
    pub detector: ProductDetector,
    pub compiler: FilterCompiler,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LLMProvider>,
    pub store: Arc<dyn VectorStore>,
    pub collection: String,
    pub templates: PromptTemplates,
    pub chunking: ChunkingPolicy,
    pub generation: GenerationConfig,
    pub top_k: usize,
    pub probe_limit: usize,
    pub probe_value: f32,
}

impl EngineContext {
    pub fn new(
        catalog: Arc<MetadataCatalog>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LLMProvider>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            detector: ProductDetector::new(catalog.clone()),
            catalog,
            compiler: FilterCompiler::default(),
            embedder,
            llm,
            store,
            collection: collection.into(),
            templates: PromptTemplates::defaults()?,
            chunking: ChunkingPolicy::default(),
            generation: GenerationConfig::default(),
            top_k: DEFAULT_TOP_K,
            probe_limit: DEFAULT_PROBE_LIMIT,
            probe_value: DEFAULT_PROBE_VALUE,
        })
    }

    /// Build every client from configuration. Nothing is contacted yet.
    pub fn from_config(config: &MedragConfig) -> Result<Self> {
        let catalog_path = config
            .catalog
            .path
            .as_ref()
            .ok_or_else(|| MedragError::missing("catalog.path"))?;
        let collection = config
            .vector_store
            .collection
            .clone()
            .ok_or_else(|| MedragError::missing("vector_store.collection"))?;

        let catalog = Arc::new(MetadataCatalog::from_path(catalog_path)?);
        let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::from_config(&config.vector_store)?);
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(OllamaEmbeddingProvider::new((&config.embedding).into()));
        let llm = LLMProviderFactory::create_from_config(&config.llm)?;

        info!(
            collection = %collection,
            products = catalog.len(),
            llm = llm.provider_name(),
            embedder = embedder.provider_name(),
            "Engine context ready"
        );

        Ok(Self::new(catalog, embedder, llm, store, collection)?
            .with_compiler(FilterCompiler::from_config(&config.filter))
            .with_templates(PromptTemplates::from_config(&config.prompts)?)
            .with_chunking(ChunkingPolicy::from(&config.retrieval))
            .with_generation(LLMProviderFactory::generation_config(&config.llm))
            .with_top_k(config.retrieval.top_k)
            .with_probe(config.retrieval.probe_limit, config.retrieval.probe_value))
    }

    pub fn with_compiler(mut self, compiler: FilterCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingPolicy) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_probe(mut self, limit: usize, value: f32) -> Self {
        self.probe_limit = limit;
        self.probe_value = value;
        self
    }
}

/// Answers product questions against the indexed documentation.
///
/// In auto mode products are detected from the question and their catalog
/// context is appended to it. In filtered mode the caller names the products
/// and the question is sent as is. Either way the resulting filter is probed
/// first and dropped when it would select no passages.
#[derive(Clone)]
pub struct AnswerEngine {
    ctx: Arc<EngineContext>,
}

impl AnswerEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn detect(&self, query: &str) -> Detection {
        self.ctx.detector.detect(query)
    }

    pub fn compile_filter(
        &self,
        products: &BTreeSet<ProductId>,
        strength: Option<&str>,
    ) -> Option<FilterExpression> {
        self.ctx.compiler.compile(products, strength)
    }

    pub async fn answer_auto(&self, query: &str) -> Result<AnswerResult> {
        self.answer(query, None, None).await
    }

    pub async fn answer_filtered(
        &self,
        query: &str,
        products: BTreeSet<ProductId>,
        strength: Option<String>,
    ) -> Result<AnswerResult> {
        self.answer(query, Some(products), strength).await
    }

    #[instrument(
        skip(self, query, product_override, strength_override),
        fields(filtered = product_override.is_some())
    )]
    pub async fn answer(
        &self,
        query: &str,
        product_override: Option<BTreeSet<ProductId>>,
        strength_override: Option<String>,
    ) -> Result<AnswerResult> {
        let start = Instant::now();
        let ctx = &self.ctx;

        let (augmented, products) = match product_override {
            Some(products) => (query.to_string(), products),
            None => {
                let detection = self.detect(query);
                (
                    format!("{}{}{}", query, CONTEXT_DELIMITER, detection.context),
                    detection.products,
                )
            }
        };

        let compiled = self.compile_filter(&products, strength_override.as_deref());
        info!(filter = %filter_json(compiled.as_ref()), "Compiled filter");

        let probe = FallbackSearchProbe::new(
            ctx.store.clone(),
            ctx.collection.clone(),
            ctx.embedder.embedding_dimension(),
        )
        .with_limit(ctx.probe_limit)
        .with_value(ctx.probe_value);
        let resolved = probe.resolve(compiled).await?;
        info!(filter = %filter_json(resolved.as_ref()), "Resolved filter");

        let request = RetrievalRequest {
            query: augmented,
            products,
            strength: strength_override,
            filter: resolved,
            top_k: ctx.top_k,
        };
        info!(query = %request.query, "Augmented query");

        let pipeline = QueryPipelineBuilder::new(
            ctx.embedder.clone(),
            ctx.llm.clone(),
            ctx.store.clone(),
            ctx.collection.clone(),
        )
        .chunking(ctx.chunking)
        .prompt_templates(ctx.templates.clone())
        .generation(ctx.generation.clone())
        .top_k(request.top_k)
        .filter(request.filter)
        .build()
        .await?;

        let response = pipeline.query(&request.query).await?;
        let elapsed_seconds = start.elapsed().as_secs_f64();
        info!(
            elapsed_seconds,
            sources = response.source_nodes.len(),
            "Answer ready"
        );

        Ok(AnswerResult {
            response: response.response,
            sources: response.source_nodes,
            elapsed_seconds,
        })
    }
}
