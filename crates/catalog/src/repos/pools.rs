//! Tape pool repository.

use crate::error::CatalogResult;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for tape pool membership.
#[async_trait]
pub trait PoolRepo: Send + Sync {
    /// Create a pool. Creating an existing pool is a constraint violation.
    async fn create_pool(&self, pool: &str, created_at: OffsetDateTime) -> CatalogResult<()>;

    /// Delete a pool. Fails with `PoolNotExists` for an unknown pool and
    /// `PoolNotEmpty` while cartridges are still assigned.
    async fn delete_pool(&self, pool: &str) -> CatalogResult<()>;

    /// Assign a tape to a pool.
    async fn add_to_pool(&self, pool: &str, tape_id: &str) -> CatalogResult<()>;

    /// Remove a tape from a pool.
    async fn remove_from_pool(&self, pool: &str, tape_id: &str) -> CatalogResult<()>;

    /// All pool names, ordered.
    async fn list_pools(&self) -> CatalogResult<Vec<String>>;

    /// Tape ids assigned to a pool.
    async fn tapes_in_pool(&self, pool: &str) -> CatalogResult<Vec<String>>;
}
