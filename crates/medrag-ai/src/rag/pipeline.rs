use crate::llm_provider::{GenerationConfig, LLMProvider};
use crate::rag::prompts::{PromptTemplate, PromptTemplates};
use crate::rag::synthesizer::CompactAndRefine;
use medrag_core::{FilterExpression, MedragError, Result, SourceNode, VectorStore};
use medrag_vector::{ChunkingPolicy, EmbeddingProvider, VectorIndexRetriever, DEFAULT_TOP_K};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Synthesised answer with the passages it was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
    pub source_nodes: Vec<SourceNode>,
}

/// Wires a retriever and a synthesiser over an existing collection.
pub struct QueryPipelineBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LLMProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    chunking: ChunkingPolicy,
    templates: Option<(PromptTemplate, PromptTemplate)>,
    generation: GenerationConfig,
    top_k: usize,
    filter: Option<FilterExpression>,
}

impl QueryPipelineBuilder {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LLMProvider>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            llm,
            store,
            collection: collection.into(),
            chunking: ChunkingPolicy::default(),
            templates: None,
            generation: GenerationConfig::default(),
            top_k: DEFAULT_TOP_K,
            filter: None,
        }
    }

    /// Chunking the collection was indexed with. Its overlap also drives
    /// repacking in the synthesiser.
    pub fn chunking(mut self, policy: ChunkingPolicy) -> Self {
        self.chunking = policy;
        self
    }

    pub fn templates(mut self, text_qa: PromptTemplate, refine: PromptTemplate) -> Self {
        self.templates = Some((text_qa, refine));
        self
    }

    pub fn prompt_templates(self, templates: PromptTemplates) -> Self {
        self.templates(templates.text_qa, templates.refine)
    }

    pub fn generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn filter(mut self, filter: Option<FilterExpression>) -> Self {
        self.filter = filter;
        self
    }

    /// Attach to the collection and check it was embedded with the same
    /// dimension as the query embedder. No index is built.
    #[instrument(skip(self), fields(collection = %self.collection, top_k = self.top_k))]
    pub async fn build(self) -> Result<QueryPipeline> {
        let info = self.store.attach(&self.collection).await?;
        let dimension = self.embedder.embedding_dimension();
        if let Some(vector_size) = info.vector_size {
            if vector_size != dimension {
                return Err(MedragError::Config(format!(
                    "collection '{}' stores {}-dimensional vectors but {} produces {}",
                    self.collection,
                    vector_size,
                    self.embedder.provider_name(),
                    dimension
                )));
            }
        }
        debug!(
            vector_size = ?info.vector_size,
            points = ?info.points_count,
            "Attached to collection"
        );

        let templates = match self.templates {
            Some((text_qa, refine)) => PromptTemplates::new(text_qa, refine)?,
            None => PromptTemplates::defaults()?,
        };

        let retriever = VectorIndexRetriever::new(self.embedder, self.store, self.collection)
            .with_top_k(self.top_k)
            .with_filter(self.filter);
        let synthesizer =
            CompactAndRefine::new(self.llm, templates, self.generation, self.chunking);

        Ok(QueryPipeline {
            retriever,
            synthesizer,
        })
    }
}

pub struct QueryPipeline {
    retriever: VectorIndexRetriever,
    synthesizer: CompactAndRefine,
}

impl QueryPipeline {
    pub fn filter(&self) -> Option<&FilterExpression> {
        self.retriever.filter()
    }

    pub fn top_k(&self) -> usize {
        self.retriever.top_k()
    }

    /// Retrieve the nearest passages and synthesise an answer from them.
    #[instrument(skip(self, query))]
    pub async fn query(&self, query: &str) -> Result<QueryResponse> {
        let source_nodes = self.retriever.retrieve(query).await?;
        let response = self.synthesizer.synthesize(query, &source_nodes).await?;
        info!(sources = source_nodes.len(), "Query answered");

        Ok(QueryResponse {
            response,
            source_nodes,
        })
    }
}
