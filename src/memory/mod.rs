//! The memory subsystem: an append-only log as source of truth, a
//! rebuildable vector index over it, and the manager that keeps them in step.

pub mod consolidation;
pub mod importance;
pub mod index;
pub mod log;
pub mod manager;
pub mod stats;
pub mod types;

pub use manager::{MemoryManager, MemorySettings, Recall, RetrievalMode};
pub use types::{MemoryContent, MemoryEntry, MemoryType, Metadata, SearchFilter};

use crate::error::{Error, Result};

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Inverse of [`embedding_to_bytes`].
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Reject vectors the index cannot rank: wrong width, non-finite values, or
/// zero norm (cosine distance is undefined for those).
pub fn check_embedding(embedding: &[f32], dimensions: usize) -> Result<()> {
    if embedding.len() != dimensions {
        return Err(Error::embedding(format!(
            "expected {dimensions} dimensions, got {}",
            embedding.len()
        )));
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(Error::embedding("embedding contains non-finite values"));
    }
    if embedding.iter().all(|x| *x == 0.0) {
        return Err(Error::embedding("embedding has zero norm"));
    }
    Ok(())
}
