//! Chunk embeddings with per-company caching and cosine search
//!
//! One collection per company, persisted as JSON next to the database. A
//! collection is reused only when the filing's accession number, filing date,
//! and the source file's modification fingerprint all match; any mismatch
//! regenerates the whole collection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tenk_common::{Error, Result};
use tenk_common::config::ChunkingConfig;

use super::filing_source::Filing;
use crate::providers::EmbeddingGateway;

#[derive(Debug, Serialize, Deserialize)]
struct Collection {
    accession_number: String,
    filing_date: String,
    source_fingerprint: String,
    dimension: usize,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Chunk {
    text: String,
    vector: Vec<f32>,
}

/// A ranked search hit
#[derive(Debug, Clone)]
pub struct Snippet {
    pub text: String,
    pub score: f32,
}

pub struct VectorStore {
    root: PathBuf,
    chunking: ChunkingConfig,
}

/// Result of preparing a company's filing for search
pub struct PreparedFiling {
    collection: Collection,
    pub from_cache: bool,
}

impl VectorStore {
    pub fn new(root: PathBuf, chunking: ChunkingConfig) -> Self {
        Self { root, chunking }
    }

    fn collection_path(&self, cik: &str) -> PathBuf {
        self.root.join(format!("{}.json", cik))
    }

    /// Load the cached collection or chunk-and-embed the filing text.
    ///
    /// The source fingerprint folds in the cached text file's modification
    /// time and length, so a rewritten file invalidates even when accession
    /// and date are unchanged.
    pub async fn prepare(
        &self,
        filing: &Filing,
        embeddings: &EmbeddingGateway,
    ) -> Result<PreparedFiling> {
        let fingerprint = source_fingerprint(&filing.path)?;
        let path = self.collection_path(&filing.cik);

        if let Some(collection) = self.load_collection(&path) {
            if collection.accession_number == filing.accession_number
                && collection.filing_date == filing.filing_date
                && collection.source_fingerprint == fingerprint
            {
                tracing::debug!(cik = %filing.cik, "Embeddings served from cache");
                return Ok(PreparedFiling {
                    collection,
                    from_cache: true,
                });
            }
        }

        let texts = chunk_text(&filing.text, self.chunking.chunk_size, self.chunking.chunk_overlap);
        if texts.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Filing for {} produced no chunks",
                filing.cik
            )));
        }

        tracing::info!(cik = %filing.cik, chunks = texts.len(), "Embedding filing chunks");
        let vectors = embeddings.embed(&texts).await?;
        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);

        let collection = Collection {
            accession_number: filing.accession_number.clone(),
            filing_date: filing.filing_date.clone(),
            source_fingerprint: fingerprint,
            dimension,
            chunks: texts
                .into_iter()
                .zip(vectors)
                .map(|(text, vector)| Chunk { text, vector })
                .collect(),
        };
        self.store_collection(&path, &collection)?;

        Ok(PreparedFiling {
            collection,
            from_cache: false,
        })
    }

    fn load_collection(&self, path: &Path) -> Option<Collection> {
        // A corrupt or missing collection file is a cache miss
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
    }

    fn store_collection(&self, path: &Path, collection: &Collection) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(collection)
            .map_err(|e| Error::Internal(format!("Serialize collection failed: {}", e)))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl PreparedFiling {
    /// Top-k chunks by cosine similarity against a query embedding
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        embeddings: &EmbeddingGateway,
    ) -> Result<Vec<Snippet>> {
        let query_vectors = embeddings.embed(std::slice::from_ref(&query.to_string())).await?;
        let query_vector = query_vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("Embedding gateway returned no vector".to_string()))?;

        let mut scored: Vec<Snippet> = self
            .collection
            .chunks
            .iter()
            .map(|chunk| Snippet {
                text: chunk.text.clone(),
                score: cosine(&chunk.vector, &query_vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn chunk_count(&self) -> usize {
        self.collection.chunks.len()
    }
}

/// Overlapping fixed-size character chunks on whitespace-friendly boundaries
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size.saturating_sub(1));
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }

    chunks
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn source_fingerprint(path: &Path) -> Result<String> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(format!("{}:{}", mtime, metadata.len()))
}
