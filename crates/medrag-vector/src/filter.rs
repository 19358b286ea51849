use medrag_core::{FieldCondition, FilterExpression, FilterFieldsConfig, ProductId};
use std::collections::BTreeSet;

/// Compiles detected products and an optional strength into a search filter.
#[derive(Debug, Clone)]
pub struct FilterCompiler {
    product_key: String,
    strength_key: String,
}

impl Default for FilterCompiler {
    fn default() -> Self {
        Self::from_config(&FilterFieldsConfig::default())
    }
}

impl FilterCompiler {
    pub fn new(product_key: impl Into<String>, strength_key: impl Into<String>) -> Self {
        Self {
            product_key: product_key.into(),
            strength_key: strength_key.into(),
        }
    }

    pub fn from_config(config: &FilterFieldsConfig) -> Self {
        Self::new(config.product_key.clone(), config.strength_key.clone())
    }

    /// `None` means "no restriction". Identifiers are not checked against the
    /// catalog; unknown ones simply match nothing in the index.
    pub fn compile(
        &self,
        products: &BTreeSet<ProductId>,
        strength: Option<&str>,
    ) -> Option<FilterExpression> {
        let strength = strength.map(str::trim).filter(|s| !s.is_empty());

        let mut conditions = Vec::with_capacity(2);
        if !products.is_empty() {
            conditions.push(FieldCondition::AnyOf {
                key: self.product_key.clone(),
                values: products.iter().map(|p| p.as_str().to_string()).collect(),
            });
        }
        if let Some(strength) = strength {
            conditions.push(FieldCondition::Equals {
                key: self.strength_key.clone(),
                value: strength.to_string(),
            });
        }

        FilterExpression::all(conditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrag_core::Payload;
    use serde_json::json;

    fn products(ids: &[&str]) -> BTreeSet<ProductId> {
        ids.iter().map(|id| ProductId::new(*id)).collect()
    }

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn nothing_to_filter_on() {
        let compiler = FilterCompiler::default();
        assert!(compiler.compile(&BTreeSet::new(), None).is_none());
        assert!(compiler.compile(&BTreeSet::new(), Some("   ")).is_none());
    }

    #[test]
    fn product_membership_only() {
        let filter = FilterCompiler::default()
            .compile(&products(&["P2", "P1"]), None)
            .unwrap();
        assert_eq!(filter.must.len(), 1);
        assert_eq!(filter.to_string(), "product_id IN [P1, P2]");

        assert!(filter.matches(&payload(json!({"product_id": "P1"}))));
        assert!(filter.matches(&payload(json!({"product_id": "P2", "strength": "10mg"}))));
        assert!(!filter.matches(&payload(json!({"product_id": "P3"}))));
    }

    #[test]
    fn product_and_strength() {
        let filter = FilterCompiler::default()
            .compile(&products(&["P1"]), Some(" 50mg "))
            .unwrap();
        assert_eq!(filter.to_string(), "product_id IN [P1] AND strength == 50mg");
        assert!(filter.matches(&payload(json!({"product_id": "P1", "strength": "50mg"}))));
        assert!(!filter.matches(&payload(json!({"product_id": "P1", "strength": "100mg"}))));
    }

    #[test]
    fn strength_without_products() {
        let filter = FilterCompiler::default()
            .compile(&BTreeSet::new(), Some("50mg"))
            .unwrap();
        assert_eq!(filter.must.len(), 1);
        assert_eq!(filter.must[0].key(), "strength");
    }

    #[test]
    fn unknown_ids_pass_through_with_custom_keys() {
        let compiler = FilterCompiler::new("sku", "dosage");
        let filter = compiler
            .compile(&products(&["NOT-IN-CATALOG"]), Some("5mg"))
            .unwrap();
        assert_eq!(filter.to_string(), "sku IN [NOT-IN-CATALOG] AND dosage == 5mg");
    }
}
