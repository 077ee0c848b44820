//! SQLite result store -- schema, pool, and the `ResultStore` seam the
//! lifecycle engine persists through.

pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::probes::{Sample, TestConfig, TestStatus};

/// Connection pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Durable keyed storage for test configs and their append-only samples.
///
/// The engine treats persistence as an external collaborator: implementations
/// must be safe for concurrent use by many sampling loops at once.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist a new test configuration (status `pending`).
    async fn save_config(&self, config: &TestConfig) -> Result<()>;

    /// Mirror an engine-issued status transition.
    async fn update_status(&self, test_id: &str, status: TestStatus) -> Result<()>;

    /// Append one sample to a test's history.
    async fn save_result(&self, sample: &Sample) -> Result<()>;

    /// Read back a test's config and current status, if known.
    async fn get_config(&self, test_id: &str) -> Result<Option<TestConfig>>;

    /// Read back a test's samples in the order they were produced.
    async fn get_results(&self, test_id: &str) -> Result<Vec<Sample>>;
}

/// Production store over the r2d2 SQLite pool.
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ResultStore for SqliteStore {
    async fn save_config(&self, config: &TestConfig) -> Result<()> {
        let conn = self.pool.get()?;
        let params_json =
            serde_json::to_string(&config.params).context("failed to serialize test params")?;
        conn.execute(
            "INSERT INTO tests (test_id, kind, params_json, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                config.test_id,
                config.kind.to_string(),
                params_json,
                config.status.to_string(),
                config.created_at.to_rfc3339(),
            ],
        )
        .context("failed to insert test config")?;
        Ok(())
    }

    async fn update_status(&self, test_id: &str, status: TestStatus) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE tests SET status = ?2, updated_at = datetime('now') WHERE test_id = ?1",
            rusqlite::params![test_id, status.to_string()],
        )
        .context("failed to update test status")?;
        Ok(())
    }

    async fn save_result(&self, sample: &Sample) -> Result<()> {
        let conn = self.pool.get()?;
        let data_json =
            serde_json::to_string(&sample.data).context("failed to serialize sample data")?;
        conn.execute(
            "INSERT INTO samples (test_id, kind, seq, success, error, data_json, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                sample.test_id,
                sample.kind.to_string(),
                sample.seq as i64,
                sample.success as i64,
                sample.error,
                data_json,
                sample.recorded_at.to_rfc3339(),
            ],
        )
        .context("failed to insert sample")?;
        Ok(())
    }

    async fn get_config(&self, test_id: &str) -> Result<Option<TestConfig>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT kind, params_json, status, created_at FROM tests WHERE test_id = ?1",
        )?;

        let row = stmt
            .query_map(rusqlite::params![test_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .next();

        let Some(row) = row else { return Ok(None) };
        let (kind, params_json, status, created_at) = row?;

        Ok(Some(TestConfig {
            test_id: test_id.to_string(),
            kind: kind.parse()?,
            params: serde_json::from_str(&params_json)
                .context("failed to deserialize test params")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .context("invalid created_at timestamp")?
                .with_timezone(&Utc),
            status: status.parse()?,
        }))
    }

    async fn get_results(&self, test_id: &str) -> Result<Vec<Sample>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT kind, seq, success, error, data_json, recorded_at
             FROM samples WHERE test_id = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(rusqlite::params![test_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (kind, seq, success, error, data_json, recorded_at) = row?;
            samples.push(Sample {
                test_id: test_id.to_string(),
                kind: kind.parse()?,
                seq: seq as u64,
                recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                    .context("invalid recorded_at timestamp")?
                    .with_timezone(&Utc),
                data: serde_json::from_str(&data_json)
                    .context("failed to deserialize sample data")?,
                success: success != 0,
                error,
            });
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{TestKind, TestParams};
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netpulse-test.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, SqliteStore::new(pool))
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let (_dir, store) = temp_store();
        let config = TestConfig::new(TestKind::Speed, TestParams::default());
        store.save_config(&config).await.unwrap();

        let loaded = store.get_config(&config.test_id).await.unwrap().unwrap();
        assert_eq!(loaded.test_id, config.test_id);
        assert_eq!(loaded.kind, TestKind::Speed);
        assert_eq!(loaded.status, TestStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_config_is_none() {
        let (_dir, store) = temp_store();
        assert!(store.get_config("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_transition_persisted() {
        let (_dir, store) = temp_store();
        let config = TestConfig::new(TestKind::Signal, TestParams::default());
        store.save_config(&config).await.unwrap();
        store
            .update_status(&config.test_id, TestStatus::Completed)
            .await
            .unwrap();

        let loaded = store.get_config(&config.test_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TestStatus::Completed);
    }

    #[tokio::test]
    async fn test_samples_read_back_in_production_order() {
        let (_dir, store) = temp_store();
        let config = TestConfig::new(TestKind::Signal, TestParams::default());
        store.save_config(&config).await.unwrap();

        for seq in 0..5u64 {
            let sample = Sample::ok(
                &config.test_id,
                TestKind::Signal,
                seq,
                json!({ "rssi_dbm": -70.0 - seq as f64 }),
            );
            store.save_result(&sample).await.unwrap();
        }

        let samples = store.get_results(&config.test_id).await.unwrap();
        assert_eq!(samples.len(), 5);
        let seqs: Vec<u64> = samples.iter().map(|s| s.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_error_sample_round_trip() {
        let (_dir, store) = temp_store();
        let sample = Sample::failed("t-err", TestKind::Speed, 0, "connection reset".into());
        store.save_result(&sample).await.unwrap();

        let samples = store.get_results("t-err").await.unwrap();
        assert_eq!(samples.len(), 1);
        assert!(!samples[0].success);
        assert_eq!(samples[0].error.as_deref(), Some("connection reset"));
    }
}
