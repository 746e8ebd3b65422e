//! # Board Store
//!
//! Manages the persistent .db file using WAL mode. This module handles
//! database initialization, connection management, and provides utilities
//! for executing queries safely.
//!
//! The schema is static: users, sessions, questions, answers, comments and
//! the two voter join tables. Cascade deletes are enforced by the storage
//! engine (`foreign_keys=ON`), so removing a question removes its answers,
//! their comments and every related voter row in one statement.

use crate::error::{BoardError, BoardResult};
use rusqlite::TransactionBehavior;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// The board store: manages the database connection and provides query
/// utilities used by every service.
pub struct BoardStore {
    conn: Connection,
    path: String,
}

impl BoardStore {
    /// Creates a new BoardStore with the specified database path
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    /// A configured BoardStore with WAL mode enabled
    pub async fn new<P: AsRef<Path>>(path: P) -> BoardResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!("Opening board database at: {}", path_str);

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| BoardError::Database(format!("Failed to open database: {}", e)))?;

        Self::initialize_pragmas(&conn).await?;

        info!("✨ Board database opened with WAL mode");

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    /// Creates an in-memory database (useful for testing)
    pub async fn in_memory() -> BoardResult<Self> {
        info!("Opening in-memory board database");

        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| BoardError::Database(format!("Failed to create database: {}", e)))?;

        Self::initialize_pragmas(&conn).await?;

        Ok(Self {
            conn,
            path: ":memory:".to_string(),
        })
    }

    /// Initialize database pragmas.
    ///
    /// - PRAGMA journal_mode=WAL; (readers do not block the writer)
    /// - PRAGMA synchronous=NORMAL; (balance between safety and speed)
    /// - PRAGMA foreign_keys=ON; (cascade deletes happen in the engine)
    async fn initialize_pragmas(conn: &Connection) -> BoardResult<()> {
        debug!("Setting up database pragmas...");

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA foreign_keys=ON;",
            )?;
            Ok(())
        })
        .await
        .map_err(|e| BoardError::Database(format!("Failed to set pragmas: {}", e)))?;

        debug!("Database pragmas configured successfully");
        Ok(())
    }

    /// Create the board schema if it does not exist yet.
    ///
    /// Timestamps are stored as RFC 3339 text. The comments table keeps two
    /// nullable parent columns guarded by a CHECK constraint so that exactly
    /// one of question_id/answer_id is ever set.
    pub async fn initialize_schema(&self) -> BoardResult<()> {
        self.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                token TEXT UNIQUE NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_token ON sessions(token);

            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL,
                content TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                modified_at TEXT,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );
            CREATE INDEX IF NOT EXISTS idx_questions_created ON questions(created_at);

            CREATE TABLE IF NOT EXISTS answers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                modified_at TEXT,
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );
            CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id);

            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                question_id INTEGER,
                answer_id INTEGER,
                created_at TEXT NOT NULL,
                modified_at TEXT,
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE,
                FOREIGN KEY (answer_id) REFERENCES answers(id) ON DELETE CASCADE,
                CHECK ((question_id IS NULL) != (answer_id IS NULL))
            );
            CREATE INDEX IF NOT EXISTS idx_comments_question ON comments(question_id);
            CREATE INDEX IF NOT EXISTS idx_comments_answer ON comments(answer_id);

            CREATE TABLE IF NOT EXISTS question_voters (
                question_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                PRIMARY KEY (question_id, user_id),
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS answer_voters (
                answer_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                PRIMARY KEY (answer_id, user_id),
                FOREIGN KEY (answer_id) REFERENCES answers(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#
            .to_string(),
        )
        .await?;

        debug!("Board schema initialized");
        Ok(())
    }

    /// Execute a write query (INSERT, UPDATE, DELETE)
    pub async fn execute(&self, sql: String, params: Vec<SqlValue>) -> BoardResult<u64> {
        self.conn
            .call(move |conn| {
                let params_refs: Vec<&dyn rusqlite::ToSql> = params
                    .iter()
                    .map(|p| p as &dyn rusqlite::ToSql)
                    .collect();
                let affected = conn.execute(&sql, params_refs.as_slice())?;
                Ok(affected as u64)
            })
            .await
            .map_err(|e| BoardError::Database(format!("Execute failed: {}", e)))
    }

    /// Execute an INSERT and return the new row id
    pub async fn insert(&self, sql: String, params: Vec<SqlValue>) -> BoardResult<i64> {
        self.conn
            .call(move |conn| {
                let params_refs: Vec<&dyn rusqlite::ToSql> = params
                    .iter()
                    .map(|p| p as &dyn rusqlite::ToSql)
                    .collect();
                conn.execute(&sql, params_refs.as_slice())?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|e| BoardError::Database(format!("Insert failed: {}", e)))
    }

    /// Execute batch SQL
    pub async fn execute_batch(&self, sql: String) -> BoardResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(|e| BoardError::Database(format!("Batch execution failed: {}", e)))
    }

    /// Query rows through a row mapper
    pub async fn query<T, F>(&self, sql: String, params: Vec<SqlValue>, map: F) -> BoardResult<Vec<T>>
    where
        F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let params_refs: Vec<&dyn rusqlite::ToSql> = params
                    .iter()
                    .map(|p| p as &dyn rusqlite::ToSql)
                    .collect();

                let rows = stmt.query_map(params_refs.as_slice(), |row| map(row))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
            .map_err(|e| BoardError::Database(format!("Query failed: {}", e)))
    }

    /// Query at most one row through a row mapper
    pub async fn query_one<T, F>(
        &self,
        sql: String,
        params: Vec<SqlValue>,
        map: F,
    ) -> BoardResult<Option<T>>
    where
        F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let rows = self.query(sql, params, map).await?;
        Ok(rows.into_iter().next())
    }

    /// Run a COUNT(*)-style query returning a single integer
    pub async fn count(&self, sql: String, params: Vec<SqlValue>) -> BoardResult<u64> {
        let n = self
            .query_one(sql, params, |row| row.get::<_, i64>(0))
            .await?
            .unwrap_or(0);
        Ok(n as u64)
    }

    /// Get the database file path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if database is in-memory
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }

    /// Execute with transaction
    ///
    /// Runs the closure inside one immediate transaction; the read-check-write
    /// sequences of the mutating operations go through here so that each
    /// request commits atomically at the end.
    pub async fn with_transaction<F, T>(&self, f: F) -> BoardResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let result = f(&tx)?;
                tx.commit()?;
                Ok(result)
            })
            .await
            .map_err(|e| BoardError::Database(format!("Transaction failed: {}", e)))
    }
}

/// SQL Value wrapper for parameters
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        match self {
            SqlValue::Null => Ok(rusqlite::types::ToSqlOutput::Owned(
                rusqlite::types::Value::Null,
            )),
            SqlValue::Integer(i) => Ok(rusqlite::types::ToSqlOutput::Owned(
                rusqlite::types::Value::Integer(*i),
            )),
            SqlValue::Text(s) => Ok(rusqlite::types::ToSqlOutput::Owned(
                rusqlite::types::Value::Text(s.clone()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> BoardStore {
        let store = BoardStore::in_memory().await.unwrap();
        store.initialize_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_in_memory_db() {
        let store = test_store().await;
        assert!(store.is_in_memory());

        let tables = store
            .count(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'"
                    .to_string(),
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(tables, 7);
    }

    #[tokio::test]
    async fn test_on_disk_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.db");
        let store = BoardStore::new(&path).await.unwrap();
        store.initialize_schema().await.unwrap();

        assert!(!store.is_in_memory());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_insert_and_query() {
        let store = test_store().await;

        let id = store
            .insert(
                "INSERT INTO users (username, password_hash, email, created_at) \
                 VALUES (?1, ?2, ?3, ?4)"
                    .to_string(),
                vec![
                    SqlValue::Text("alice".to_string()),
                    SqlValue::Text("hash".to_string()),
                    SqlValue::Text("alice@example.com".to_string()),
                    SqlValue::Text("2026-01-01T00:00:00.000000Z".to_string()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(id, 1);

        let username = store
            .query_one(
                "SELECT username FROM users WHERE id = ?1".to_string(),
                vec![SqlValue::Integer(id)],
                |row| row.get::<_, String>(0),
            )
            .await
            .unwrap();
        assert_eq!(username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let store = test_store().await;

        // No user with id 99 exists, so the insert must be rejected.
        let result = store
            .insert(
                "INSERT INTO questions (subject, content, user_id, created_at) \
                 VALUES ('s', 'c', 99, '2026-01-01T00:00:00.000000Z')"
                    .to_string(),
                vec![],
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let store = test_store().await;

        let result = store
            .with_transaction(|conn| {
                conn.execute(
                    "INSERT INTO users (username, password_hash, email, created_at) \
                     VALUES ('bob', 'hash', 'bob@example.com', '2026-01-01T00:00:00.000000Z')",
                    [],
                )?;
                Err::<(), _>(rusqlite::Error::QueryReturnedNoRows)
            })
            .await;
        assert!(result.is_err());

        let users = store
            .count("SELECT COUNT(*) FROM users".to_string(), vec![])
            .await
            .unwrap();
        assert_eq!(users, 0);
    }
}
