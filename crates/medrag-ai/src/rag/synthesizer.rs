use crate::llm_provider::{GenerationConfig, LLMProvider};
use crate::rag::prompts::PromptTemplates;
use medrag_core::{MedragError, Result, SourceNode};
use medrag_vector::{estimate_tokens, ChunkingPolicy, SentenceSplitter};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Answer returned when retrieval produced nothing to ground on.
pub const EMPTY_RESPONSE: &str = "Empty Response";

/// Packs retrieved passages into as few prompts as the model's context window
/// allows, answers with the first and refines the answer with the rest.
pub struct CompactAndRefine {
    llm: Arc<dyn LLMProvider>,
    templates: PromptTemplates,
    generation: GenerationConfig,
    chunk_overlap: usize,
}

impl CompactAndRefine {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        templates: PromptTemplates,
        generation: GenerationConfig,
        policy: ChunkingPolicy,
    ) -> Self {
        Self {
            llm,
            templates,
            generation,
            chunk_overlap: policy.chunk_overlap,
        }
    }

    /// Tokens left for passage text in a single prompt.
    fn context_budget(&self, query: &str) -> Result<usize> {
        let characteristics = self.llm.characteristics();
        let num_output = self
            .generation
            .max_tokens
            .unwrap_or(characteristics.num_output);
        let query_tokens = estimate_tokens(query);

        let qa_overhead = self.templates.text_qa.overhead_chars().div_ceil(4) + query_tokens;
        // A refine prompt also carries the previous answer
        let refine_overhead =
            self.templates.refine.overhead_chars().div_ceil(4) + query_tokens + num_output;
        let reserved = num_output + qa_overhead.max(refine_overhead);

        match characteristics.max_tokens.checked_sub(reserved) {
            Some(budget) if budget > 0 => Ok(budget),
            _ => Err(MedragError::InvalidInput(format!(
                "query does not fit the {}-token context window of {}",
                characteristics.max_tokens,
                self.llm.model_name()
            ))),
        }
    }

    fn compact(&self, nodes: &[SourceNode], budget: usize) -> Vec<String> {
        let joined = nodes
            .iter()
            .map(|n| n.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let splitter = SentenceSplitter::new(ChunkingPolicy {
            chunk_size: budget,
            chunk_overlap: self.chunk_overlap,
        });
        let pieces = splitter.split(&joined);
        if pieces.is_empty() {
            vec![String::new()]
        } else {
            pieces
        }
    }

    #[instrument(skip(self, query, nodes), fields(nodes = nodes.len()))]
    pub async fn synthesize(&self, query: &str, nodes: &[SourceNode]) -> Result<String> {
        if nodes.is_empty() {
            debug!("No passages retrieved");
            return Ok(EMPTY_RESPONSE.to_string());
        }

        let budget = self.context_budget(query)?;
        let pieces = self.compact(nodes, budget);
        debug!(pieces = pieces.len(), budget, "Packed passages into prompts");

        let mut answer: Option<String> = None;
        for piece in &pieces {
            let prompt = match &answer {
                None => self
                    .templates
                    .text_qa
                    .format(&[("context_str", piece), ("query_str", query)])?,
                Some(existing) => self.templates.refine.format(&[
                    ("query_str", query),
                    ("existing_answer", existing),
                    ("context_msg", piece),
                ])?,
            };

            let response = self
                .llm
                .generate_with_config(&prompt, &self.generation)
                .await?;
            answer = Some(response.content.trim().to_string());
        }

        Ok(answer.unwrap_or_else(|| EMPTY_RESPONSE.to_string()))
    }
}
