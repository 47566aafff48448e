//! Request queue repository.

use crate::error::CatalogResult;
use crate::models::RequestRow;
use async_trait::async_trait;
use coldstore_core::RequestState;

/// Repository for request queue operations.
#[async_trait]
pub trait RequestRepo: Send + Sync {
    /// Insert a request row in state `new`.
    async fn insert_request(&self, request: &RequestRow) -> CatalogResult<()>;

    /// All rows in state `new`, oldest first.
    async fn new_requests(&self) -> CatalogResult<Vec<RequestRow>>;

    /// Atomically move a request from `new` to `in_progress` and its tape
    /// from `free` to `in_use` in one transaction. Returns false without
    /// side effects when either precondition no longer holds.
    async fn claim_request(&self, reqnum: i64, tape_id: &str) -> CatalogResult<bool>;

    /// Atomically move a `new` or `in_progress` request to a terminal state
    /// and release its tape back to `free`.
    async fn finish_request(
        &self,
        reqnum: i64,
        tape_id: &str,
        state: RequestState,
    ) -> CatalogResult<()>;

    /// Request rows, newest first, optionally restricted to one request
    /// number.
    async fn list_requests(&self, reqnum: Option<i64>) -> CatalogResult<Vec<RequestRow>>;

    /// Whether any request is still `new` or `in_progress`.
    async fn has_active_requests(&self) -> CatalogResult<bool>;
}
