use medrag_core::{MetadataCatalog, ProductId, ProductRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Products mentioned in a query plus descriptive context for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub products: BTreeSet<ProductId>,
    pub context: String,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

struct ProductTerms {
    id: ProductId,
    terms: Vec<Vec<String>>,
}

/// Finds catalog products mentioned in free text.
///
/// A product matches when the token sequence of its id, name or one of its
/// synonyms appears contiguously in the query. Comparison ignores case and
/// accents.
pub struct ProductDetector {
    catalog: Arc<MetadataCatalog>,
    index: Vec<ProductTerms>,
}

impl ProductDetector {
    pub fn new(catalog: Arc<MetadataCatalog>) -> Self {
        let index = catalog
            .iter()
            .map(|product| {
                let mut terms: Vec<Vec<String>> = Vec::new();
                for term in product.terms() {
                    let tokens = tokenize(term);
                    if !tokens.is_empty() && !terms.contains(&tokens) {
                        terms.push(tokens);
                    }
                }
                ProductTerms {
                    id: product.id.clone(),
                    terms,
                }
            })
            .collect();

        Self { catalog, index }
    }

    pub fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    #[instrument(skip(self, query))]
    pub fn detect(&self, query: &str) -> Detection {
        let query_tokens = tokenize(query);
        let products: BTreeSet<ProductId> = self
            .index
            .iter()
            .filter(|entry| {
                entry
                    .terms
                    .iter()
                    .any(|term| contains_sequence(&query_tokens, term))
            })
            .map(|entry| entry.id.clone())
            .collect();

        debug!(detected = products.len(), "Product detection finished");
        let context = self.context_for(&products);
        Detection { products, context }
    }

    /// Render the context block for the given products, in id order.
    /// Identifiers missing from the catalog are skipped.
    pub fn context_for(&self, products: &BTreeSet<ProductId>) -> String {
        products
            .iter()
            .filter_map(|id| self.catalog.get(id))
            .map(render_product)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn render_product(product: &ProductRef) -> String {
    let mut lines = vec![format!("Product: {} (id: {})", product.name, product.id)];
    if !product.strengths.is_empty() {
        lines.push(format!(
            "Available strengths: {}",
            product.strengths.join(", ")
        ));
    }
    for (key, value) in &product.attributes {
        lines.push(format!("{}: {}", key, value));
    }
    lines.join("\n")
}

/// Lowercase, strip accents and split into alphanumeric words.
fn tokenize(text: &str) -> Vec<String> {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();

    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_sequence(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|window| window == needle)
}
