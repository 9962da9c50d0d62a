//! SQLite result store
//!
//! One table holds every row a scan produces, keyed by the session tuple
//! plus the 32-bit port key. Probe workers write rows as they complete;
//! the polling client reads them back through `dump`; the test-state row
//! is transitioned with `update`; `delete` removes a finished session and
//! `tidy` purges anything past the retention window.
//!
//! The database runs in WAL mode so the dispatcher's completion-wait
//! reads do not block concurrent worker writes.

use ipscan_core::{Error, Result, ResultCode, SessionKey};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// One stored result row, in store natural order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    /// Composite port key (port, special, protocol)
    pub portid: u32,
    /// Raw result value (may carry the indirect-response offset)
    pub result: i32,
    /// Printable router address for indirect ICMPv6 responses, else empty
    pub indirect_host: String,
}

/// Session-keyed scan result storage
///
/// All operations are row-at-a-time and idempotent by primary key; a
/// later `write` of the same key overwrites the earlier row in place.
pub struct ScanStore {
    pool: SqlitePool,
}

impl ScanStore {
    /// Open (and create if missing) the store at `database_path`
    ///
    /// Use `":memory:"` for an in-memory database in tests.
    pub async fn new(database_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path))
            .map_err(|e| Error::Storage(format!("Invalid database path: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        info!("Connected to result store: {}", database_path);

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hostmsb INTEGER NOT NULL,
                hostlsb INTEGER NOT NULL,
                createdate INTEGER NOT NULL,
                session INTEGER NOT NULL,
                portnum INTEGER NOT NULL,
                portresult INTEGER NOT NULL,
                indhost TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to create results table: {}", e)))?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_results_key \
             ON results (hostmsb, hostlsb, createdate, session, portnum)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to create results index: {}", e)))?;

        debug!("Result store schema initialised");
        Ok(())
    }

    /// Insert or overwrite one result row
    ///
    /// The upsert keeps the original rowid, so `dump` order is stable
    /// under rewrites of the same key.
    pub async fn write(
        &self,
        key: &SessionKey,
        portid: u32,
        result: i32,
        indirect_host: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO results
            (hostmsb, hostlsb, createdate, session, portnum, portresult, indhost)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (hostmsb, hostlsb, createdate, session, portnum)
            DO UPDATE SET portresult = excluded.portresult, indhost = excluded.indhost
            "#,
        )
        .bind(key.host_msb as i64)
        .bind(key.host_lsb as i64)
        .bind(key.start_time as i64)
        .bind(key.session as i64)
        .bind(i64::from(portid))
        .bind(result)
        .bind(indirect_host)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to write result: {}", e)))?;

        Ok(())
    }

    /// Update an existing row's result value
    ///
    /// Used for test-state transitions, where the row must already exist;
    /// updating a missing row is an error.
    pub async fn update(&self, key: &SessionKey, portid: u32, result: i32) -> Result<()> {
        let outcome = sqlx::query(
            "UPDATE results SET portresult = ? \
             WHERE hostmsb = ? AND hostlsb = ? AND createdate = ? AND session = ? AND portnum = ?",
        )
        .bind(result)
        .bind(key.host_msb as i64)
        .bind(key.host_lsb as i64)
        .bind(key.start_time as i64)
        .bind(key.session as i64)
        .bind(i64::from(portid))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to update result: {}", e)))?;

        if outcome.rows_affected() == 0 {
            return Err(Error::Storage(format!(
                "update matched no row for portid {:#x}",
                portid
            )));
        }
        Ok(())
    }

    /// Read one row's raw result value
    ///
    /// A missing row reads as `PortUnknown`, which callers treat as the
    /// signal to raise a database-error flag rather than a hard failure.
    pub async fn read(&self, key: &SessionKey, portid: u32) -> Result<i32> {
        let row = sqlx::query(
            "SELECT portresult FROM results \
             WHERE hostmsb = ? AND hostlsb = ? AND createdate = ? AND session = ? AND portnum = ?",
        )
        .bind(key.host_msb as i64)
        .bind(key.host_lsb as i64)
        .bind(key.start_time as i64)
        .bind(key.session as i64)
        .bind(i64::from(portid))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to read result: {}", e)))?;

        Ok(match row {
            Some(row) => row.get::<i32, _>(0),
            None => ResultCode::PortUnknown.as_raw(),
        })
    }

    /// Fetch every row for a session tuple in natural (insertion) order
    pub async fn dump(&self, key: &SessionKey) -> Result<Vec<StoredRow>> {
        let rows = sqlx::query(
            "SELECT portnum, portresult, indhost FROM results \
             WHERE hostmsb = ? AND hostlsb = ? AND createdate = ? AND session = ? \
             ORDER BY id",
        )
        .bind(key.host_msb as i64)
        .bind(key.host_lsb as i64)
        .bind(key.start_time as i64)
        .bind(key.session as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to dump results: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| StoredRow {
                portid: row.get::<i64, _>(0) as u32,
                result: row.get::<i32, _>(1),
                indirect_host: row.get::<String, _>(2),
            })
            .collect())
    }

    /// Delete every row for a session tuple, returning the count removed
    pub async fn delete(&self, key: &SessionKey) -> Result<u64> {
        let outcome = sqlx::query(
            "DELETE FROM results \
             WHERE hostmsb = ? AND hostlsb = ? AND createdate = ? AND session = ?",
        )
        .bind(key.host_msb as i64)
        .bind(key.host_lsb as i64)
        .bind(key.start_time as i64)
        .bind(key.session as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to delete results: {}", e)))?;

        debug!("Deleted {} rows for session {}", outcome.rows_affected(), key);
        Ok(outcome.rows_affected())
    }

    /// Purge rows older than the retention window
    ///
    /// Deletes exactly the rows with `start_time + retention < now`,
    /// covering sessions orphaned by crashed or abandoned tests.
    pub async fn tidy(&self, now: u64, retention_secs: u64) -> Result<u64> {
        let outcome = sqlx::query("DELETE FROM results WHERE createdate + ? < ?")
            .bind(retention_secs as i64)
            .bind(now as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to tidy results: {}", e)))?;

        if outcome.rows_affected() > 0 {
            info!("Tidied {} expired result rows", outcome.rows_affected());
        }
        Ok(outcome.rows_affected())
    }

    /// Row count for one session tuple
    pub async fn count(&self, key: &SessionKey) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM results \
             WHERE hostmsb = ? AND hostlsb = ? AND createdate = ? AND session = ?",
        )
        .bind(key.host_msb as i64)
        .bind(key.host_lsb as i64)
        .bind(key.start_time as i64)
        .bind(key.session as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to count results: {}", e)))?;

        Ok(row.get(0))
    }

    /// Total row count across every session (test support)
    pub async fn total_rows(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM results")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to count results: {}", e)))?;
        Ok(row.get(0))
    }

    /// Close the connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipscan_core::{encode_port_key, Protocol, TestState};
    use std::net::Ipv6Addr;

    fn key(session: u64) -> SessionKey {
        SessionKey::new("2001:db8::1".parse().unwrap(), 1_700_000_000, session)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let store = ScanStore::new(":memory:").await.unwrap();
        let key = key(42);
        let portid = encode_port_key(443, 0, Protocol::Tcp);

        store
            .write(&key, portid, ResultCode::PortRefused.as_raw(), "")
            .await
            .unwrap();

        let value = store.read(&key, portid).await.unwrap();
        assert_eq!(value, ResultCode::PortRefused.as_raw());
    }

    #[tokio::test]
    async fn test_missing_row_reads_unknown() {
        let store = ScanStore::new(":memory:").await.unwrap();
        let value = store
            .read(&key(1), encode_port_key(80, 0, Protocol::Tcp))
            .await
            .unwrap();
        assert_eq!(value, ResultCode::PortUnknown.as_raw());
    }

    #[tokio::test]
    async fn test_rewrite_is_idempotent() {
        let store = ScanStore::new(":memory:").await.unwrap();
        let key = key(42);
        let portid = encode_port_key(80, 0, Protocol::Tcp);

        store.write(&key, portid, 5, "").await.unwrap();
        store.write(&key, portid, 5, "").await.unwrap();

        assert_eq!(store.count(&key).await.unwrap(), 1);
        let rows = store.dump(&key).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, 5);
    }

    #[tokio::test]
    async fn test_overwrite_updates_in_place() {
        let store = ScanStore::new(":memory:").await.unwrap();
        let key = key(42);
        let first = encode_port_key(80, 0, Protocol::Tcp);
        let second = encode_port_key(443, 0, Protocol::Tcp);

        store.write(&key, first, 1, "").await.unwrap();
        store.write(&key, second, 2, "").await.unwrap();
        store.write(&key, first, 9, "").await.unwrap();

        // Natural order is unchanged by the rewrite
        let rows = store.dump(&key).await.unwrap();
        assert_eq!(rows[0].portid, first);
        assert_eq!(rows[0].result, 9);
        assert_eq!(rows[1].portid, second);
    }

    #[tokio::test]
    async fn test_update_requires_existing_row() {
        let store = ScanStore::new(":memory:").await.unwrap();
        let key = key(42);
        let state_id = encode_port_key(0, 0, Protocol::TestState);

        assert!(store.update(&key, state_id, 3).await.is_err());

        store
            .write(&key, state_id, TestState::RUNNING.bits(), "")
            .await
            .unwrap();
        store
            .update(&key, state_id, TestState::COMPLETE.bits())
            .await
            .unwrap();
        assert_eq!(
            store.read(&key, state_id).await.unwrap(),
            TestState::COMPLETE.bits()
        );
    }

    #[tokio::test]
    async fn test_delete_is_scoped_to_tuple() {
        let store = ScanStore::new(":memory:").await.unwrap();
        let mine = key(42);
        let other = key(43);
        let portid = encode_port_key(80, 0, Protocol::Tcp);

        store.write(&mine, portid, 1, "").await.unwrap();
        store.write(&other, portid, 2, "").await.unwrap();

        let removed = store.delete(&mine).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(&mine).await.unwrap(), 0);
        assert_eq!(store.count(&other).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tidy_removes_exactly_expired() {
        let store = ScanStore::new(":memory:").await.unwrap();
        let target: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let now = 1_700_001_000u64;
        let retention = 900u64;

        let expired = SessionKey::new(target, now - retention - 1, 1);
        let boundary = SessionKey::new(target, now - retention, 2);
        let fresh = SessionKey::new(target, now - 10, 3);
        let portid = encode_port_key(80, 0, Protocol::Tcp);

        for key in [&expired, &boundary, &fresh] {
            store.write(key, portid, 1, "").await.unwrap();
        }

        let removed = store.tidy(now, retention).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(&expired).await.unwrap(), 0);
        assert_eq!(store.count(&boundary).await.unwrap(), 1);
        assert_eq!(store.count(&fresh).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_indirect_host_round_trip() {
        let store = ScanStore::new(":memory:").await.unwrap();
        let key = key(42);
        let portid = encode_port_key(0, 0, Protocol::Icmpv6);

        store
            .write(&key, portid, ResultCode::EchoReply.as_raw() + 256, "fe80::1")
            .await
            .unwrap();

        let rows = store.dump(&key).await.unwrap();
        assert_eq!(rows[0].indirect_host, "fe80::1");
    }

    #[tokio::test]
    async fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        let store = ScanStore::new(path.to_str().unwrap()).await.unwrap();

        let key = key(7);
        store
            .write(&key, encode_port_key(22, 0, Protocol::Tcp), 0, "")
            .await
            .unwrap();
        assert_eq!(store.count(&key).await.unwrap(), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn test_dump_empty_session() {
        let store = ScanStore::new(":memory:").await.unwrap();
        assert!(store.dump(&key(99)).await.unwrap().is_empty());
    }
}
