//! Read-only product metadata loaded from a delimited file at startup.

use crate::{MedragError, ProductId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

const ID_COLUMN: &str = "product_id";
const NAME_COLUMN: &str = "name";
const SYNONYMS_COLUMN: &str = "synonyms";
const STRENGTHS_COLUMN: &str = "strengths";

/// Metadata for one catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Alternative names the product is referred to by
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    /// Available strengths / dosages, e.g. "50mg"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strengths: Vec<String>,
    /// Any further catalog columns, keyed by header
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ProductRef {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            synonyms: Vec::new(),
            strengths: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_synonyms<I, S>(mut self, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synonyms = synonyms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strengths<I, S>(mut self, strengths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strengths = strengths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Terms the product may be mentioned by in a question: its name and
    /// synonyms. Catalog ids are codes and are never matched.
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.synonyms.iter().map(String::as_str))
    }
}

/// Product lookup table. Built once, then only read.
#[derive(Debug, Clone, Default)]
pub struct MetadataCatalog {
    products: BTreeMap<ProductId, ProductRef>,
}

impl MetadataCatalog {
    pub fn from_products(products: impl IntoIterator<Item = ProductRef>) -> Self {
        let mut catalog = Self::default();
        for product in products {
            catalog.insert(product);
        }
        catalog
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            MedragError::Catalog(format!("failed to open {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_reader(file)?;
        info!(
            path = %path.display(),
            products = catalog.len(),
            "Loaded product catalog"
        );
        Ok(catalog)
    }

    /// Parse comma-delimited rows with a header line.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b',')
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let column = |name: &str| headers.iter().position(|h| h == name);
        let id_idx = column(ID_COLUMN).ok_or_else(|| {
            MedragError::Catalog(format!("catalog is missing the '{}' column", ID_COLUMN))
        })?;
        let name_idx = column(NAME_COLUMN).ok_or_else(|| {
            MedragError::Catalog(format!("catalog is missing the '{}' column", NAME_COLUMN))
        })?;
        let synonyms_idx = column(SYNONYMS_COLUMN);
        let strengths_idx = column(STRENGTHS_COLUMN);

        let mut catalog = Self::default();
        for (row_idx, record) in csv_reader.records().enumerate() {
            let record = record?;
            let id = record.get(id_idx).unwrap_or_default();
            if id.is_empty() {
                warn!(row = row_idx + 2, "Skipping catalog row without product id");
                continue;
            }

            let name = match record.get(name_idx).unwrap_or_default() {
                "" => id,
                name => name,
            };

            let mut product = ProductRef::new(id, name);
            if let Some(idx) = synonyms_idx {
                product.synonyms = split_multi(record.get(idx).unwrap_or_default());
            }
            if let Some(idx) = strengths_idx {
                product.strengths = split_multi(record.get(idx).unwrap_or_default());
            }
            for (idx, header) in headers.iter().enumerate() {
                if Some(idx) == synonyms_idx
                    || Some(idx) == strengths_idx
                    || idx == id_idx
                    || idx == name_idx
                {
                    continue;
                }
                if let Some(value) = record.get(idx).filter(|v| !v.is_empty()) {
                    product.attributes.insert(header.clone(), value.to_string());
                }
            }

            if catalog.products.contains_key(&product.id) {
                warn!(product_id = %product.id, "Duplicate catalog entry ignored");
                continue;
            }
            catalog.insert(product);
        }

        Ok(catalog)
    }

    fn insert(&mut self, product: ProductRef) {
        self.products.insert(product.id.clone(), product);
    }

    pub fn get(&self, id: &ProductId) -> Option<&ProductRef> {
        self.products.get(id)
    }

    pub fn contains(&self, id: &ProductId) -> bool {
        self.products.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProductRef> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

fn split_multi(raw: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for part in raw.split(|c| c == ';' || c == '|') {
        let part = part.trim();
        if !part.is_empty() && !values.iter().any(|v| v == part) {
            values.push(part.to_string());
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Product_ID, Name ,Synonyms,Strengths,Manufacturer
P100,Paracetamol,acetaminophen;Tylenol,500mg|1g,Acme
P200,Ibuprofen,,200mg;400mg;200mg,
,Orphan,,,
P100,Duplicate,,,
";

    #[test]
    fn parses_rows_and_multi_valued_columns() {
        let catalog = MetadataCatalog::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);

        let paracetamol = catalog.get(&ProductId::new("P100")).unwrap();
        assert_eq!(paracetamol.name, "Paracetamol");
        assert_eq!(paracetamol.synonyms, vec!["acetaminophen", "Tylenol"]);
        assert_eq!(paracetamol.strengths, vec!["500mg", "1g"]);
        assert_eq!(
            paracetamol.attributes.get("manufacturer").map(String::as_str),
            Some("Acme")
        );

        let ibuprofen = catalog.get(&ProductId::new("P200")).unwrap();
        assert_eq!(ibuprofen.strengths, vec!["200mg", "400mg"]);
        assert!(ibuprofen.attributes.is_empty());
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let err = MetadataCatalog::from_reader("id,name\n1,x\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("product_id"));
    }

    #[test]
    fn missing_name_falls_back_to_id() {
        let catalog = MetadataCatalog::from_reader("product_id,name\nX9,\n".as_bytes()).unwrap();
        assert_eq!(catalog.get(&ProductId::new("X9")).unwrap().name, "X9");
    }

    #[test]
    fn missing_file_is_a_catalog_error() {
        let err = MetadataCatalog::from_path("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, MedragError::Catalog(_)));
    }
}
