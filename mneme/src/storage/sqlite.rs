use super::{ExecutionLog, Result, StartRecord, StorageError};
use crate::core::{Invocation, InvocationStatus};
use async_trait::async_trait;
use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Default pool size for the SQLite connection pool.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_size: u32,
    /// Minimum number of idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Maximum time to wait for a connection from the pool.
    pub connection_timeout: Duration,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// Idle timeout for connections.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            max_lifetime: None,
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// SQLite-backed execution log with connection pooling.
///
/// Async methods hand the actual database work to `spawn_blocking` so
/// the runtime is never blocked on the rusqlite driver.
pub struct SqliteExecutionLog {
    pool: Pool<SqliteConnectionManager>,
    db_path: String,
}

impl SqliteExecutionLog {
    /// Creates a new SQLite execution log at the given path with the
    /// default pool configuration.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, PoolConfig::default())
    }

    /// Creates a new SQLite execution log with a custom pool configuration.
    pub fn with_config(db_path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();
        let manager = SqliteConnectionManager::file(&db_path_str);

        let pool = Self::build_pool(manager, &config)?;

        let log = Self {
            pool,
            db_path: db_path_str,
        };

        log.initialize()?;

        Ok(log)
    }

    /// Creates an in-memory SQLite execution log.
    ///
    /// In-memory databases are pinned to a single connection so every
    /// caller sees the same data.
    pub fn in_memory() -> Result<Self> {
        let config = PoolConfig {
            max_size: 1,
            min_idle: Some(0),
            ..PoolConfig::default()
        };

        let manager = SqliteConnectionManager::memory();
        let pool = Self::build_pool(manager, &config)?;

        let log = Self {
            pool,
            db_path: ":memory:".to_string(),
        };

        log.initialize()?;

        Ok(log)
    }

    fn build_pool(
        manager: SqliteConnectionManager,
        config: &PoolConfig,
    ) -> Result<Pool<SqliteConnectionManager>> {
        let mut builder = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout);

        if let Some(min_idle) = config.min_idle {
            builder = builder.min_idle(Some(min_idle));
        }

        if let Some(max_lifetime) = config.max_lifetime {
            builder = builder.max_lifetime(Some(max_lifetime));
        }

        if let Some(idle_timeout) = config.idle_timeout {
            builder = builder.idle_timeout(Some(idle_timeout));
        }

        let pool = builder.build(manager)?;
        Ok(pool)
    }

    /// Initialize pragmas and the schema.
    fn initialize(&self) -> Result<()> {
        let conn = self.pool.get()?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        Self::create_schema(&conn)?;

        Ok(())
    }

    fn create_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS execution_log (
                flow_id      TEXT    NOT NULL,
                step         INTEGER NOT NULL,
                timestamp    INTEGER NOT NULL,
                class_name   TEXT    NOT NULL,
                method_name  TEXT    NOT NULL,
                delay_ms     INTEGER,
                status       TEXT    NOT NULL
                             CHECK (status IN ('Pending','WaitingForSignal','Complete')),
                attempts     INTEGER NOT NULL DEFAULT 1,
                parameters   TEXT,
                return_value TEXT,
                PRIMARY KEY (flow_id, step)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_execution_log_flow
             ON execution_log(flow_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_execution_log_entry_status
             ON execution_log(step, status)",
            [],
        )?;

        Ok(())
    }

    fn get_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(StorageError::Pool)
    }

    /// Returns the current pool state for monitoring.
    pub fn pool_state(&self) -> r2d2::State {
        self.pool.state()
    }

    /// Returns the database path.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn row_to_invocation(row: &rusqlite::Row) -> rusqlite::Result<Invocation> {
        let id_str: String = row.get(0)?;
        let id = Uuid::parse_str(&id_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let step: i32 = row.get(1)?;
        let timestamp_millis: i64 = row.get(2)?;
        let timestamp =
            chrono::DateTime::from_timestamp_millis(timestamp_millis).unwrap_or_else(Utc::now);
        let class_name: String = row.get(3)?;
        let method_name: String = row.get(4)?;
        let status_str: String = row.get(5)?;
        let status = InvocationStatus::from_str(&status_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;
        let attempts: i32 = row.get(6)?;
        let parameters: Option<String> = row.get(7)?;
        let return_value: Option<String> = row.get(8)?;
        let delay_ms: Option<i64> = row.get(9)?;

        Ok(Invocation::new(
            id,
            step,
            timestamp,
            class_name,
            method_name,
            status,
            attempts,
            parameters.unwrap_or_default(),
            return_value,
            delay_ms,
        ))
    }
}

const SELECT_COLUMNS: &str = "flow_id, step, timestamp, class_name, method_name, \
     status, attempts, parameters, return_value, delay_ms";

#[async_trait]
impl ExecutionLog for SqliteExecutionLog {
    async fn log_invocation_start(&self, record: StartRecord<'_>) -> Result<()> {
        let StartRecord {
            id,
            step,
            class_name,
            method_name,
            delay,
            status,
            parameters,
        } = record;

        let class_name = class_name.to_string();
        let method_name = method_name.to_string();
        let parameters = parameters.to_string();

        let conn = self.get_connection()?;

        tokio::task::spawn_blocking(move || {
            let delay_ms = delay.map(|d| d.as_millis() as i64);

            conn.execute(
                "INSERT INTO execution_log
                     (flow_id, step, timestamp, class_name, method_name,
                      delay_ms, status, attempts, parameters)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(flow_id, step)
                 DO UPDATE SET attempts = attempts + 1",
                params![
                    id.to_string(),
                    step,
                    Utc::now().timestamp_millis(),
                    class_name,
                    method_name,
                    delay_ms,
                    status.as_str(),
                    1,
                    parameters,
                ],
            )?;

            debug!(
                "Logged invocation start: flow={}, step={}, method={}.{}",
                id, step, class_name, method_name
            );

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn log_invocation_completion(
        &self,
        id: Uuid,
        step: i32,
        return_value: &str,
    ) -> Result<Invocation> {
        let return_value = return_value.to_string();
        let conn = self.get_connection()?;

        tokio::task::spawn_blocking(move || {
            let updated = conn.execute(
                "UPDATE execution_log
                 SET status = 'Complete', return_value = ?
                 WHERE flow_id = ? AND step = ?",
                params![return_value, id.to_string(), step],
            )?;

            if updated == 0 {
                return Err(StorageError::InvocationNotFound { id, step });
            }

            let invocation = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM execution_log
                         WHERE flow_id = ? AND step = ?"
                    ),
                    params![id.to_string(), step],
                    SqliteExecutionLog::row_to_invocation,
                )
                .optional()?
                .ok_or(StorageError::InvocationNotFound { id, step })?;

            debug!("Logged invocation completion: flow={}, step={}", id, step);

            Ok(invocation)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn get_invocation(&self, id: Uuid, step: i32) -> Result<Option<Invocation>> {
        let conn = self.get_connection()?;

        tokio::task::spawn_blocking(move || {
            let invocation = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM execution_log
                         WHERE flow_id = ? AND step = ?"
                    ),
                    params![id.to_string(), step],
                    SqliteExecutionLog::row_to_invocation,
                )
                .optional()?;

            Ok(invocation)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn get_latest_invocation(&self, id: Uuid) -> Result<Option<Invocation>> {
        let conn = self.get_connection()?;

        tokio::task::spawn_blocking(move || {
            let invocation = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM execution_log
                         WHERE flow_id = ?
                         ORDER BY step DESC
                         LIMIT 1"
                    ),
                    params![id.to_string()],
                    SqliteExecutionLog::row_to_invocation,
                )
                .optional()?;

            Ok(invocation)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn get_invocations_for_flow(&self, id: Uuid) -> Result<Vec<Invocation>> {
        let conn = self.get_connection()?;

        tokio::task::spawn_blocking(move || {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM execution_log
                 WHERE flow_id = ?
                 ORDER BY step ASC"
            ))?;

            let invocations = stmt
                .query_map(
                    params![id.to_string()],
                    SqliteExecutionLog::row_to_invocation,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(invocations)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn get_incomplete_flows(&self) -> Result<Vec<Invocation>> {
        let conn = self.get_connection()?;

        tokio::task::spawn_blocking(move || {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM execution_log
                 WHERE step = 0
                   AND status <> 'Complete'
                 ORDER BY timestamp ASC"
            ))?;

            let invocations = stmt
                .query_map([], SqliteExecutionLog::row_to_invocation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            info!("Found {} incomplete flows", invocations.len());

            Ok(invocations)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn reset(&self) -> Result<()> {
        let conn = self.get_connection()?;

        tokio::task::spawn_blocking(move || {
            conn.execute("DROP TABLE IF EXISTS execution_log", [])?;
            SqliteExecutionLog::create_schema(&conn)?;
            info!("Reset execution log database");
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::serialize_value;

    #[tokio::test]
    async fn test_create_and_log_invocation() {
        let log = SqliteExecutionLog::in_memory().unwrap();
        let id = Uuid::new_v4();

        let params = serialize_value(&vec!["test".to_string()]).unwrap();

        log.log_invocation_start(StartRecord {
            id,
            step: 0,
            class_name: "TestFlow",
            method_name: "run()",
            delay: None,
            status: InvocationStatus::Pending,
            parameters: &params,
        })
        .await
        .unwrap();

        let invocation = log.get_invocation(id, 0).await.unwrap().unwrap();
        assert_eq!(invocation.id(), id);
        assert_eq!(invocation.step(), 0);
        assert_eq!(invocation.class_name(), "TestFlow");
        assert_eq!(invocation.method_name(), "run()");
        assert_eq!(invocation.status(), InvocationStatus::Pending);
        assert_eq!(invocation.attempts(), 1);
        assert_eq!(invocation.parameters(), params);
    }

    #[tokio::test]
    async fn test_log_completion() {
        let log = SqliteExecutionLog::in_memory().unwrap();
        let id = Uuid::new_v4();

        let params = serialize_value(&vec!["test".to_string()]).unwrap();
        log.log_invocation_start(StartRecord {
            id,
            step: 0,
            class_name: "TestFlow",
            method_name: "run()",
            delay: None,
            status: InvocationStatus::Pending,
            parameters: &params,
        })
        .await
        .unwrap();

        let return_val = serialize_value(&42i32).unwrap();
        let invocation = log
            .log_invocation_completion(id, 0, &return_val)
            .await
            .unwrap();

        assert_eq!(invocation.status(), InvocationStatus::Complete);
        assert_eq!(invocation.return_value(), Some(return_val.as_str()));
    }

    #[tokio::test]
    async fn test_completion_without_start_fails() {
        let log = SqliteExecutionLog::in_memory().unwrap();
        let id = Uuid::new_v4();

        let result = log.log_invocation_completion(id, 3, "null").await;
        assert!(matches!(
            result,
            Err(StorageError::InvocationNotFound { step: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_increments_attempts_and_freezes_columns() {
        let log = SqliteExecutionLog::in_memory().unwrap();
        let id = Uuid::new_v4();

        log.log_invocation_start(StartRecord {
            id,
            step: 1,
            class_name: "TestFlow",
            method_name: "step_one(String)",
            delay: Some(Duration::from_secs(5)),
            status: InvocationStatus::Pending,
            parameters: "[\"first\"]",
        })
        .await
        .unwrap();

        let first = log.get_invocation(id, 1).await.unwrap().unwrap();
        assert_eq!(first.attempts(), 1);

        // A retry passes different parameters and no delay; only attempts
        // may change.
        log.log_invocation_start(StartRecord {
            id,
            step: 1,
            class_name: "TestFlow",
            method_name: "step_one(String)",
            delay: None,
            status: InvocationStatus::Pending,
            parameters: "[\"second\"]",
        })
        .await
        .unwrap();

        let second = log.get_invocation(id, 1).await.unwrap().unwrap();
        assert_eq!(second.attempts(), 2);
        assert_eq!(second.parameters(), "[\"first\"]");
        assert_eq!(second.delay(), Some(Duration::from_secs(5)));
        assert_eq!(second.timestamp(), first.timestamp());
    }

    #[tokio::test]
    async fn test_get_incomplete_flows_is_entry_rows_only() {
        let log = SqliteExecutionLog::in_memory().unwrap();

        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        let id3 = Uuid::new_v4();

        for (id, status) in [
            (id1, InvocationStatus::Pending),
            (id2, InvocationStatus::WaitingForSignal),
            (id3, InvocationStatus::Complete),
        ] {
            log.log_invocation_start(StartRecord {
                id,
                step: 0,
                class_name: "TestFlow",
                method_name: "run()",
                delay: None,
                status,
                parameters: "[]",
            })
            .await
            .unwrap();
        }

        // A non-entry pending row must not show up.
        log.log_invocation_start(StartRecord {
            id: id3,
            step: 1,
            class_name: "TestFlow",
            method_name: "step_one()",
            delay: None,
            status: InvocationStatus::Pending,
            parameters: "[]",
        })
        .await
        .unwrap();

        let incomplete = log.get_incomplete_flows().await.unwrap();
        assert_eq!(incomplete.len(), 2);
        assert!(incomplete.iter().all(|i| i.step() == 0));
        assert!(incomplete.iter().any(|i| i.id() == id1));
        assert!(incomplete.iter().any(|i| i.id() == id2));
    }

    #[tokio::test]
    async fn test_get_latest_invocation() {
        let log = SqliteExecutionLog::in_memory().unwrap();
        let id = Uuid::new_v4();

        for step in 0..5 {
            log.log_invocation_start(StartRecord {
                id,
                step,
                class_name: "TestFlow",
                method_name: "say(String,i32)",
                delay: None,
                status: InvocationStatus::Complete,
                parameters: "[]",
            })
            .await
            .unwrap();
        }

        let latest = log.get_latest_invocation(id).await.unwrap().unwrap();
        assert_eq!(latest.step(), 4);

        let unknown = log.get_latest_invocation(Uuid::new_v4()).await.unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_reset_recreates_empty_table() {
        let log = SqliteExecutionLog::in_memory().unwrap();
        let id = Uuid::new_v4();

        log.log_invocation_start(StartRecord {
            id,
            step: 0,
            class_name: "TestFlow",
            method_name: "run()",
            delay: None,
            status: InvocationStatus::Pending,
            parameters: "[]",
        })
        .await
        .unwrap();

        log.reset().await.unwrap();

        assert!(log.get_invocation(id, 0).await.unwrap().is_none());
        assert!(log.get_incomplete_flows().await.unwrap().is_empty());
    }
}
