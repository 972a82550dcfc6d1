//! Interfaces to components outside the orchestration core
//!
//! The metadata catalog and the embedding storage engine live elsewhere; the
//! core only consumes them through these traits.

use async_trait::async_trait;

use crate::{NameVariant, ResourceID, Result};

/// Resolves human-readable source names into resource identifiers
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Fails with `NotFound` for an unknown source
    async fn resolve_source(&self, source: &NameVariant) -> Result<ResourceID>;
}

/// Keyed storage for fixed-dimension float vectors
///
/// `set` rejects vectors whose length differs from `dims()`.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    fn dims(&self) -> usize;

    async fn set(&self, key: &str, vector: Vec<f32>) -> Result<()>;

    /// Returns `NotFound` for a key that was never set
    async fn get(&self, key: &str) -> Result<Vec<f32>>;
}
