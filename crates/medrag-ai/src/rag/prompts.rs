use medrag_core::{MedragError, PromptConfig, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

pub const DEFAULT_TEXT_QA_TEMPLATE: &str = "\
You are an assistant answering questions about medicinal products.
Context information from the product documentation is below.
---------------------
{context_str}
---------------------
Using only the context information and no prior knowledge, answer the question.
If the context does not contain the answer, say that the documentation does not cover it.
Question: {query_str}
Answer: ";

pub const DEFAULT_REFINE_TEMPLATE: &str = "\
The original question is as follows: {query_str}
We have provided an existing answer: {existing_answer}
We have the opportunity to refine the existing answer (only if needed) with some more product documentation below.
------------
{context_msg}
------------
Given the new context, refine the original answer to better answer the question.
If the context isn't useful, return the original answer.
Refined Answer: ";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// Text with `{name}` placeholders. `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let segments = parse(&source)?;
        Ok(Self { source, segments })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            MedragError::Template(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::new(source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Variable(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Substitute every placeholder. A placeholder without a value is an error.
    pub fn format(&self, vars: &[(&str, &str)]) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => {
                    let value = vars
                        .iter()
                        .find(|(k, _)| *k == name.as_str())
                        .map(|(_, v)| *v)
                        .ok_or_else(|| {
                            MedragError::Template(format!("missing value for '{{{}}}'", name))
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Length of the template with every placeholder left empty.
    pub fn overhead_chars(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.chars().count(),
                Segment::Variable(_) => 0,
            })
            .sum()
    }

    fn require(&self, names: &[&str]) -> Result<()> {
        let vars = self.variables();
        for name in names {
            if !vars.contains(name) {
                return Err(MedragError::Template(format!(
                    "template is missing the '{{{}}}' placeholder",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn parse(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) if ch.is_alphanumeric() || ch == '_' => name.push(ch),
                        Some(ch) => {
                            return Err(MedragError::Template(format!(
                                "invalid character '{}' in placeholder",
                                ch
                            )))
                        }
                        None => {
                            return Err(MedragError::Template(
                                "unterminated placeholder".to_string(),
                            ))
                        }
                    }
                }
                if name.is_empty() {
                    return Err(MedragError::Template("empty placeholder".to_string()));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Variable(name));
            }
            '}' => {
                return Err(MedragError::Template(
                    "unmatched '}' (use '}}' for a literal brace)".to_string(),
                ))
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// The question-answering and refine templates used by the synthesiser.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub text_qa: PromptTemplate,
    pub refine: PromptTemplate,
}

impl PromptTemplates {
    pub fn new(text_qa: PromptTemplate, refine: PromptTemplate) -> Result<Self> {
        text_qa.require(&["context_str", "query_str"])?;
        refine.require(&["query_str", "existing_answer", "context_msg"])?;
        Ok(Self { text_qa, refine })
    }

    pub fn defaults() -> Result<Self> {
        Self::new(
            PromptTemplate::new(DEFAULT_TEXT_QA_TEMPLATE)?,
            PromptTemplate::new(DEFAULT_REFINE_TEMPLATE)?,
        )
    }

    /// Defaults, with either template replaced by a file when configured.
    pub fn from_config(config: &PromptConfig) -> Result<Self> {
        let text_qa = match &config.text_qa_path {
            Some(path) => {
                info!(path = %path.display(), "Loading text QA template");
                PromptTemplate::from_file(path)?
            }
            None => PromptTemplate::new(DEFAULT_TEXT_QA_TEMPLATE)?,
        };
        let refine = match &config.refine_path {
            Some(path) => {
                info!(path = %path.display(), "Loading refine template");
                PromptTemplate::from_file(path)?
            }
            None => PromptTemplate::new(DEFAULT_REFINE_TEMPLATE)?,
        };
        Self::new(text_qa, refine)
    }
}
