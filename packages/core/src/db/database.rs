//! Database Connection Management
//!
//! Core database connection and schema initialization using libsql.
//!
//! # Architecture
//!
//! - **Two tables**: `nodes` (authoritative segment storage) and
//!   `node_paths` (the precomputed ancestor/descendant closure)
//! - **WAL mode**: readers see committed snapshots while writers run
//! - **Foreign keys**: enabled; subtree deletion cascades through both
//!   tables
//! - **Idempotent init**: `CREATE TABLE IF NOT EXISTS` throughout, safe to
//!   call on every startup
//!
//! # Connection Patterns
//!
//! Use `connect_with_timeout()` in async functions. The busy timeout makes
//! concurrent operations wait and retry instead of failing immediately with
//! `SQLITE_BUSY` when a writer holds the lock.

use crate::db::error::DatabaseError;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use typetree_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = DatabaseService::new(PathBuf::from("./data/typetree.db")).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// Ensures the parent directory exists, opens/creates the database file
    /// and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the directory cannot be created, the
    /// connection fails, or schema initialization fails.
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema().await?;

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so query() must be used instead of
    /// execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// # Schema
    ///
    /// - `nodes`: one row per segment; `code` XOR `group_length` is set for
    ///   non-root rows (enforced by a CHECK constraint)
    /// - `node_paths`: closure entries `(ancestor_id, descendant_id,
    ///   distance)` including the reflexive `(id, id, 0)` row per node
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER,
                code TEXT,
                group_length INTEGER,
                category TEXT,
                label TEXT,
                label_en TEXT,
                position INTEGER NOT NULL,
                level INTEGER,
                full_typecode TEXT,
                is_intermediate BOOLEAN NOT NULL DEFAULT FALSE,
                cross_group TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                modified_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (parent_id) REFERENCES nodes(id) ON DELETE CASCADE,
                -- Exactly one of code/group_length on non-root rows; roots carry a code
                CHECK ((code IS NULL) != (group_length IS NULL)),
                CHECK (parent_id IS NOT NULL OR code IS NOT NULL)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create nodes table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS node_paths (
                ancestor_id INTEGER NOT NULL,
                descendant_id INTEGER NOT NULL,
                distance INTEGER NOT NULL,
                PRIMARY KEY (ancestor_id, descendant_id),
                FOREIGN KEY (ancestor_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (descendant_id) REFERENCES nodes(id) ON DELETE CASCADE
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create node_paths table: {}", e))
        })?;

        self.create_core_indexes(&conn).await?;

        Ok(())
    }

    /// Create core indexes
    ///
    /// `node_paths(descendant_id)` backs the backward-reachability lookups;
    /// the primary key already covers forward lookups.
    async fn create_core_indexes(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_code ON nodes(code)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_level_code ON nodes(level, code)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_full_typecode ON nodes(full_typecode)",
            "CREATE INDEX IF NOT EXISTS idx_paths_descendant ON node_paths(descendant_id)",
        ];

        for sql in indexes {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to create index: {} ({})", e, sql))
            })?;
        }

        Ok(())
    }

    /// Get a synchronous connection to the database
    ///
    /// Only for single-threaded synchronous contexts; async code should use
    /// `connect_with_timeout()`.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get an async connection with busy timeout configured
    ///
    /// Sets a 5-second busy timeout so concurrent operations wait and retry
    /// instead of failing immediately when the database is locked.
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(conn)
    }
}
