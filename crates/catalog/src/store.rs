//! Catalog trait and the SQLite implementation.

use crate::error::{CatalogError, CatalogResult};
use crate::repos::{JobRepo, PoolRepo, RequestRepo, TapeRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined catalog trait.
#[async_trait]
pub trait Catalog: JobRepo + RequestRepo + TapeRepo + PoolRepo + Send + Sync {
    /// Create the schema. Idempotent.
    async fn migrate(&self) -> CatalogResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> CatalogResult<()>;
}

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    pool: Pool<Sqlite>,
}

impl SqliteCatalog {
    /// Open (or create) the catalog database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CatalogError::Internal(format!("create {}: {e}", parent.display())))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // A single connection keeps writes serialized; readers still overlap
        // through WAL snapshots.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory catalog.
    ///
    /// **For testing only.**
    pub async fn in_memory() -> CatalogResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS job_queue (
    id INTEGER PRIMARY KEY,
    operation TEXT NOT NULL,
    file_name TEXT NOT NULL,
    reqnum INTEGER NOT NULL,
    target_state TEXT NOT NULL,
    size INTEGER NOT NULL,
    fsid INTEGER NOT NULL,
    igen INTEGER NOT NULL,
    ino INTEGER NOT NULL,
    mtime_sec INTEGER NOT NULL,
    mtime_nsec INTEGER NOT NULL,
    last_upd TEXT NOT NULL,
    file_state TEXT NOT NULL,
    tape_id TEXT NOT NULL,
    start_block INTEGER NOT NULL,
    failed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_job_queue_req_tape ON job_queue (reqnum, tape_id);

CREATE TABLE IF NOT EXISTS request_queue (
    operation TEXT NOT NULL,
    reqnum INTEGER NOT NULL,
    target_state TEXT NOT NULL,
    coloc_group INTEGER,
    tape_id TEXT NOT NULL,
    pool TEXT,
    time_added TEXT NOT NULL,
    state TEXT NOT NULL,
    PRIMARY KEY (reqnum, tape_id)
);

CREATE INDEX IF NOT EXISTS idx_request_queue_state ON request_queue (state, time_added);

CREATE TABLE IF NOT EXISTS tape_list (
    tape_id TEXT PRIMARY KEY,
    pool TEXT,
    mounted INTEGER NOT NULL DEFAULT 0,
    drive_id TEXT,
    state TEXT NOT NULL DEFAULT 'free'
);

CREATE TABLE IF NOT EXISTS pools (
    pool_name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);
"#;

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn migrate(&self) -> CatalogResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> CatalogResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::jobs::JobOrder;
    use coldstore_core::RequestState;
    use time::OffsetDateTime;

    #[async_trait]
    impl JobRepo for SqliteCatalog {
        async fn insert_job(&self, job: &JobRow) -> CatalogResult<i64> {
            let result = sqlx::query(
                r#"
                INSERT INTO job_queue (
                    operation, file_name, reqnum, target_state, size,
                    fsid, igen, ino, mtime_sec, mtime_nsec, last_upd,
                    file_state, tape_id, start_block, failed
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&job.operation)
            .bind(&job.file_name)
            .bind(job.reqnum)
            .bind(&job.target_state)
            .bind(job.size)
            .bind(job.fsid)
            .bind(job.igen)
            .bind(job.ino)
            .bind(job.mtime_sec)
            .bind(job.mtime_nsec)
            .bind(job.last_upd)
            .bind(&job.file_state)
            .bind(&job.tape_id)
            .bind(job.start_block)
            .bind(job.failed)
            .execute(&self.pool)
            .await?;
            Ok(result.last_insert_rowid())
        }

        async fn jobs_for_group(
            &self,
            reqnum: i64,
            tape_id: &str,
            order: JobOrder,
        ) -> CatalogResult<Vec<JobRow>> {
            let sql = match order {
                JobOrder::Inode => {
                    "SELECT * FROM job_queue WHERE reqnum = ? AND tape_id = ? ORDER BY ino"
                }
                JobOrder::StartBlock => {
                    // Unreported start blocks order last so the known part of
                    // the group still reads sequentially.
                    "SELECT * FROM job_queue WHERE reqnum = ? AND tape_id = ? \
                     ORDER BY CASE WHEN start_block < 0 THEN 1 ELSE 0 END, start_block"
                }
            };
            let rows = sqlx::query_as::<_, JobRow>(sql)
                .bind(reqnum)
                .bind(tape_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn distinct_tapes(&self, reqnum: i64) -> CatalogResult<Vec<String>> {
            let rows: Vec<(String,)> = sqlx::query_as(
                "SELECT tape_id FROM job_queue WHERE reqnum = ? GROUP BY tape_id ORDER BY tape_id",
            )
            .bind(reqnum)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|(t,)| t).collect())
        }

        async fn set_file_state(
            &self,
            job_ids: &[i64],
            state: &str,
            updated: OffsetDateTime,
        ) -> CatalogResult<()> {
            if job_ids.is_empty() {
                return Ok(());
            }

            // SQLite caps bind parameters near 999; batch to stay under it.
            const BATCH_SIZE: usize = 900;
            for batch in job_ids.chunks(BATCH_SIZE) {
                let placeholders: Vec<&str> = batch.iter().map(|_| "?").collect();
                let sql = format!(
                    "UPDATE job_queue SET file_state = ?, last_upd = ? WHERE id IN ({})",
                    placeholders.join(", ")
                );
                let mut query = sqlx::query(&sql).bind(state).bind(updated);
                for id in batch {
                    query = query.bind(id);
                }
                query.execute(&self.pool).await?;
            }
            Ok(())
        }

        async fn mark_job_failed(&self, job_id: i64) -> CatalogResult<()> {
            let result = sqlx::query("UPDATE job_queue SET failed = 1 WHERE id = ?")
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!("job id {job_id}")));
            }
            Ok(())
        }

        async fn list_jobs(&self, reqnum: Option<i64>, limit: u32) -> CatalogResult<Vec<JobRow>> {
            let rows = match reqnum {
                Some(n) => {
                    sqlx::query_as::<_, JobRow>(
                        "SELECT * FROM job_queue WHERE reqnum = ? ORDER BY id LIMIT ?",
                    )
                    .bind(n)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, JobRow>(
                        "SELECT * FROM job_queue ORDER BY reqnum DESC, id LIMIT ?",
                    )
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(rows)
        }

        async fn job_counts(&self, reqnum: i64) -> CatalogResult<JobCounts> {
            let (total, done, failed): (i64, i64, i64) = sqlx::query_as(
                "SELECT COUNT(*), \
                 COALESCE(SUM(CASE WHEN file_state = target_state AND failed = 0 THEN 1 ELSE 0 END), 0), \
                 COALESCE(SUM(failed), 0) \
                 FROM job_queue WHERE reqnum = ?",
            )
            .bind(reqnum)
            .fetch_one(&self.pool)
            .await?;
            Ok(JobCounts {
                total: total as u64,
                done: done as u64,
                failed: failed as u64,
            })
        }

        async fn purge_request(&self, reqnum: i64) -> CatalogResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM job_queue WHERE reqnum = ?")
                .bind(reqnum)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM request_queue WHERE reqnum = ?")
                .bind(reqnum)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl RequestRepo for SqliteCatalog {
        async fn insert_request(&self, request: &RequestRow) -> CatalogResult<()> {
            sqlx::query(
                r#"
                INSERT INTO request_queue (
                    operation, reqnum, target_state, coloc_group, tape_id,
                    pool, time_added, state
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&request.operation)
            .bind(request.reqnum)
            .bind(&request.target_state)
            .bind(request.coloc_group)
            .bind(&request.tape_id)
            .bind(&request.pool)
            .bind(request.time_added)
            .bind(&request.state)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn new_requests(&self) -> CatalogResult<Vec<RequestRow>> {
            let rows = sqlx::query_as::<_, RequestRow>(
                "SELECT * FROM request_queue WHERE state = 'new' ORDER BY time_added",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn claim_request(&self, reqnum: i64, tape_id: &str) -> CatalogResult<bool> {
            let mut tx = self.pool.begin().await?;

            let request = sqlx::query(
                "UPDATE request_queue SET state = 'in_progress' \
                 WHERE reqnum = ? AND tape_id = ? AND state = 'new'",
            )
            .bind(reqnum)
            .bind(tape_id)
            .execute(&mut *tx)
            .await?;

            if request.rows_affected() == 0 {
                return Ok(false);
            }

            let tape = sqlx::query(
                "UPDATE tape_list SET state = 'in_use' WHERE tape_id = ? AND state = 'free'",
            )
            .bind(tape_id)
            .execute(&mut *tx)
            .await?;

            if tape.rows_affected() == 0 {
                // Tape got claimed in the meantime; dropping the transaction
                // rolls the request back to `new`.
                return Ok(false);
            }

            tx.commit().await?;
            Ok(true)
        }

        async fn finish_request(
            &self,
            reqnum: i64,
            tape_id: &str,
            state: RequestState,
        ) -> CatalogResult<()> {
            if !state.is_terminal() {
                return Err(CatalogError::Constraint(format!(
                    "finish_request with non-terminal state {state}"
                )));
            }

            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "UPDATE request_queue SET state = ? WHERE reqnum = ? AND tape_id = ? \
                 AND state IN ('new', 'in_progress')",
            )
            .bind(state.as_str())
            .bind(reqnum)
            .bind(tape_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("UPDATE tape_list SET state = 'free' WHERE tape_id = ? AND state = 'in_use'")
                .bind(tape_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        }

        async fn list_requests(&self, reqnum: Option<i64>) -> CatalogResult<Vec<RequestRow>> {
            let rows = match reqnum {
                Some(n) => {
                    sqlx::query_as::<_, RequestRow>(
                        "SELECT * FROM request_queue WHERE reqnum = ? ORDER BY tape_id",
                    )
                    .bind(n)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, RequestRow>(
                        "SELECT * FROM request_queue ORDER BY reqnum DESC, tape_id",
                    )
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(rows)
        }

        async fn has_active_requests(&self) -> CatalogResult<bool> {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM request_queue WHERE state IN ('new', 'in_progress'))",
            )
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }
    }

    #[async_trait]
    impl TapeRepo for SqliteCatalog {
        async fn upsert_tape(&self, tape: &TapeRow) -> CatalogResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tape_list (tape_id, pool, mounted, drive_id, state)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(tape_id) DO UPDATE SET
                    pool = excluded.pool,
                    mounted = excluded.mounted,
                    drive_id = excluded.drive_id
                "#,
            )
            .bind(&tape.tape_id)
            .bind(&tape.pool)
            .bind(tape.mounted)
            .bind(&tape.drive_id)
            .bind(&tape.state)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_tapes(&self) -> CatalogResult<Vec<TapeRow>> {
            let rows = sqlx::query_as::<_, TapeRow>("SELECT * FROM tape_list ORDER BY tape_id")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn get_tape(&self, tape_id: &str) -> CatalogResult<Option<TapeRow>> {
            let row = sqlx::query_as::<_, TapeRow>("SELECT * FROM tape_list WHERE tape_id = ?")
                .bind(tape_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn set_tape_state(
            &self,
            tape_id: &str,
            state: TapeState,
            mounted: bool,
            drive_id: Option<&str>,
        ) -> CatalogResult<()> {
            let result = sqlx::query(
                "UPDATE tape_list SET state = ?, mounted = ?, drive_id = ? WHERE tape_id = ?",
            )
            .bind(state.as_str())
            .bind(mounted)
            .bind(drive_id)
            .bind(tape_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!("tape {tape_id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PoolRepo for SqliteCatalog {
        async fn create_pool(&self, pool: &str, created_at: OffsetDateTime) -> CatalogResult<()> {
            let result = sqlx::query("INSERT OR IGNORE INTO pools (pool_name, created_at) VALUES (?, ?)")
                .bind(pool)
                .bind(created_at)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::Constraint(format!(
                    "pool '{pool}' already exists"
                )));
            }
            Ok(())
        }

        async fn delete_pool(&self, pool: &str) -> CatalogResult<()> {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM pools WHERE pool_name = ?)",
            )
            .bind(pool)
            .fetch_one(&self.pool)
            .await?;
            if !exists {
                return Err(CatalogError::PoolNotExists(pool.to_string()));
            }

            let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tape_list WHERE pool = ?")
                .bind(pool)
                .fetch_one(&self.pool)
                .await?;
            if members > 0 {
                return Err(CatalogError::PoolNotEmpty(pool.to_string()));
            }

            sqlx::query("DELETE FROM pools WHERE pool_name = ?")
                .bind(pool)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn add_to_pool(&self, pool: &str, tape_id: &str) -> CatalogResult<()> {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM pools WHERE pool_name = ?)",
            )
            .bind(pool)
            .fetch_one(&self.pool)
            .await?;
            if !exists {
                return Err(CatalogError::PoolNotExists(pool.to_string()));
            }

            let result = sqlx::query("UPDATE tape_list SET pool = ? WHERE tape_id = ?")
                .bind(pool)
                .bind(tape_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!("tape {tape_id}")));
            }
            Ok(())
        }

        async fn remove_from_pool(&self, pool: &str, tape_id: &str) -> CatalogResult<()> {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM pools WHERE pool_name = ?)",
            )
            .bind(pool)
            .fetch_one(&self.pool)
            .await?;
            if !exists {
                return Err(CatalogError::PoolNotExists(pool.to_string()));
            }

            let result =
                sqlx::query("UPDATE tape_list SET pool = NULL WHERE tape_id = ? AND pool = ?")
                    .bind(tape_id)
                    .bind(pool)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!(
                    "tape {tape_id} is not in pool '{pool}'"
                )));
            }
            Ok(())
        }

        async fn list_pools(&self) -> CatalogResult<Vec<String>> {
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT pool_name FROM pools ORDER BY pool_name")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows.into_iter().map(|(p,)| p).collect())
        }

        async fn tapes_in_pool(&self, pool: &str) -> CatalogResult<Vec<String>> {
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT tape_id FROM tape_list WHERE pool = ? ORDER BY tape_id")
                    .bind(pool)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows.into_iter().map(|(t,)| t).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobRow, RequestRow, TapeRow, TapeState};
    use crate::repos::jobs::JobOrder;
    use coldstore_core::RequestState;
    use time::OffsetDateTime;

    fn job(reqnum: i64, tape: &str, ino: i64, start_block: i64) -> JobRow {
        JobRow {
            id: 0,
            operation: "migrate".into(),
            file_name: format!("/fs/file{ino}"),
            reqnum,
            target_state: "migrated".into(),
            size: 1024,
            fsid: 1,
            igen: 1,
            ino,
            mtime_sec: 0,
            mtime_nsec: 0,
            last_upd: OffsetDateTime::now_utc(),
            file_state: "resident".into(),
            tape_id: tape.into(),
            start_block,
            failed: false,
        }
    }

    fn request(reqnum: i64, tape: &str) -> RequestRow {
        RequestRow {
            operation: "migrate".into(),
            reqnum,
            target_state: "migrated".into(),
            coloc_group: None,
            tape_id: tape.into(),
            pool: None,
            time_added: OffsetDateTime::now_utc(),
            state: "new".into(),
        }
    }

    fn tape(id: &str) -> TapeRow {
        TapeRow {
            tape_id: id.into(),
            pool: None,
            mounted: false,
            drive_id: None,
            state: "free".into(),
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = SqliteCatalog::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn jobs_order_by_inode_and_start_block() {
        let store = SqliteCatalog::in_memory().await.unwrap();
        store.insert_job(&job(1, "T1", 30, 200)).await.unwrap();
        store.insert_job(&job(1, "T1", 10, -1)).await.unwrap();
        store.insert_job(&job(1, "T1", 20, 100)).await.unwrap();

        let by_inode = store.jobs_for_group(1, "T1", JobOrder::Inode).await.unwrap();
        let inodes: Vec<i64> = by_inode.iter().map(|j| j.ino).collect();
        assert_eq!(inodes, vec![10, 20, 30]);

        let by_block = store
            .jobs_for_group(1, "T1", JobOrder::StartBlock)
            .await
            .unwrap();
        let blocks: Vec<i64> = by_block.iter().map(|j| j.start_block).collect();
        assert_eq!(blocks, vec![100, 200, -1]);
    }

    #[tokio::test]
    async fn claim_takes_request_and_tape_together() {
        let store = SqliteCatalog::in_memory().await.unwrap();
        store.upsert_tape(&tape("T1")).await.unwrap();
        store.insert_request(&request(1, "T1")).await.unwrap();
        store.insert_request(&request(2, "T1")).await.unwrap();

        assert!(store.claim_request(1, "T1").await.unwrap());

        // Tape is in use; the second claim must not go through, and the
        // request must stay new.
        assert!(!store.claim_request(2, "T1").await.unwrap());
        let remaining = store.new_requests().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].reqnum, 2);

        // Completion releases the tape and the waiting request becomes
        // claimable.
        store
            .finish_request(1, "T1", RequestState::Completed)
            .await
            .unwrap();
        assert!(store.claim_request(2, "T1").await.unwrap());
    }

    #[tokio::test]
    async fn claim_is_idempotent_without_new_work() {
        let store = SqliteCatalog::in_memory().await.unwrap();
        store.upsert_tape(&tape("T1")).await.unwrap();
        assert!(!store.claim_request(99, "T1").await.unwrap());
        let tapes = store.list_tapes().await.unwrap();
        assert_eq!(tapes[0].state, "free");
    }

    #[tokio::test]
    async fn job_counts_track_target_state() {
        let store = SqliteCatalog::in_memory().await.unwrap();
        let a = store.insert_job(&job(5, "T1", 1, 0)).await.unwrap();
        let b = store.insert_job(&job(5, "T1", 2, 0)).await.unwrap();
        store.insert_job(&job(5, "T1", 3, 0)).await.unwrap();

        store
            .set_file_state(&[a, b], "migrated", OffsetDateTime::now_utc())
            .await
            .unwrap();
        store.mark_job_failed(b).await.unwrap();

        let counts = store.job_counts(5).await.unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.done, 1);
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn pool_lifecycle_and_errors() {
        let store = SqliteCatalog::in_memory().await.unwrap();
        store.upsert_tape(&tape("T1")).await.unwrap();
        let now = OffsetDateTime::now_utc();

        store.create_pool("pool1", now).await.unwrap();
        assert!(matches!(
            store.create_pool("pool1", now).await.unwrap_err(),
            CatalogError::Constraint(_)
        ));

        store.add_to_pool("pool1", "T1").await.unwrap();
        assert!(matches!(
            store.delete_pool("pool1").await.unwrap_err(),
            CatalogError::PoolNotEmpty(_)
        ));
        assert!(matches!(
            store.delete_pool("nope").await.unwrap_err(),
            CatalogError::PoolNotExists(_)
        ));
        assert!(matches!(
            store.add_to_pool("nope", "T1").await.unwrap_err(),
            CatalogError::PoolNotExists(_)
        ));

        store.remove_from_pool("pool1", "T1").await.unwrap();
        store.delete_pool("pool1").await.unwrap();
        assert!(store.list_pools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_removes_jobs_and_requests() {
        let store = SqliteCatalog::in_memory().await.unwrap();
        store.upsert_tape(&tape("T1")).await.unwrap();
        store.insert_job(&job(7, "T1", 1, 0)).await.unwrap();
        store.insert_request(&request(7, "T1")).await.unwrap();

        store.purge_request(7).await.unwrap();
        assert!(store.list_jobs(Some(7), 10).await.unwrap().is_empty());
        assert!(store.list_requests(Some(7)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tape_state_updates_round_trip() {
        let store = SqliteCatalog::in_memory().await.unwrap();
        store.upsert_tape(&tape("T1")).await.unwrap();
        store
            .set_tape_state("T1", TapeState::Mounting, false, Some("D0"))
            .await
            .unwrap();
        let row = store.get_tape("T1").await.unwrap().unwrap();
        assert_eq!(row.state, "mounting");
        assert_eq!(row.drive_id.as_deref(), Some("D0"));

        assert!(matches!(
            store
                .set_tape_state("missing", TapeState::Free, false, None)
                .await
                .unwrap_err(),
            CatalogError::NotFound(_)
        ));
    }
}
