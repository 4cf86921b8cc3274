//! Product/knowledge catalog
//!
//! The catalog fingerprint is the single input to the re-work caching rule:
//! an unchanged fingerprint plus a prior completed result means a company can
//! be skipped outright.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tenk_common::{Error, Result};

/// One sellable product or knowledge entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Pain themes this product addresses
    #[serde(default)]
    pub themes: Vec<String>,
}

/// Loaded catalog plus its content fingerprint
#[derive(Debug, Clone)]
pub struct Catalog {
    pub products: Vec<Product>,
    fingerprint: String,
}

impl Catalog {
    /// Load a catalog from a JSON file and fingerprint its raw bytes
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Config(format!("Read catalog {} failed: {}", path.display(), e)))?;
        let products: Vec<Product> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("Parse catalog {} failed: {}", path.display(), e)))?;

        Ok(Self {
            products,
            fingerprint: fingerprint_bytes(&bytes),
        })
    }

    /// Build a catalog from in-memory products (tests and embedded defaults)
    pub fn from_products(products: Vec<Product>) -> Result<Self> {
        let canonical = serde_json::to_vec(&products)
            .map_err(|e| Error::Internal(format!("Serialize catalog failed: {}", e)))?;
        Ok(Self {
            products,
            fingerprint: fingerprint_bytes(&canonical),
        })
    }

    /// Deterministic content fingerprint (hex SHA-256)
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

fn fingerprint_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {}", id),
            description: "does things".to_string(),
            themes: vec!["supply chain".to_string()],
        }
    }

    #[test]
    fn test_fingerprint_stable_for_same_content() {
        let a = Catalog::from_products(vec![product("p-1")]).unwrap();
        let b = Catalog::from_products(vec![product("p-1")]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = Catalog::from_products(vec![product("p-1")]).unwrap();
        let b = Catalog::from_products(vec![product("p-1"), product("p-2")]).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        std::fs::write(
            &path,
            r#"[{"id":"p-1","name":"Resilience Suite","themes":["supply chain"]}]"#,
        )
        .unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.products.len(), 1);
        assert_eq!(catalog.products[0].id, "p-1");
        assert!(!catalog.is_empty());
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Catalog::load(&dir.path().join("absent.json")).is_err());
    }
}
