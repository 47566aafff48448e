//! Tape list repository.

use crate::error::CatalogResult;
use crate::models::{TapeRow, TapeState};
use async_trait::async_trait;

/// Repository for the persisted cartridge view.
#[async_trait]
pub trait TapeRepo: Send + Sync {
    /// Insert a tape or refresh its pool/mount attributes, preserving an
    /// existing scheduling state.
    async fn upsert_tape(&self, tape: &TapeRow) -> CatalogResult<()>;

    /// All known tapes, ordered by id.
    async fn list_tapes(&self) -> CatalogResult<Vec<TapeRow>>;

    /// One tape by id.
    async fn get_tape(&self, tape_id: &str) -> CatalogResult<Option<TapeRow>>;

    /// Update a tape's scheduling state and drive binding.
    async fn set_tape_state(
        &self,
        tape_id: &str,
        state: TapeState,
        mounted: bool,
        drive_id: Option<&str>,
    ) -> CatalogResult<()>;
}
