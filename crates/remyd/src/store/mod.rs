//! SQLite persistence.
//!
//! Single connection behind an async mutex; every query runs on the
//! blocking pool. Submodules add domain methods onto [`Db`] and keep their
//! connection-level functions free so they compose inside transactions.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub mod diary;
pub mod goals;
pub mod pending;
pub mod recipes;
pub mod sessions;

pub use diary::FoodLogEntry;
pub use goals::GoalTarget;
pub use recipes::StoredRecipe;
pub use sessions::TurnRecord;

/// Handle to the daemon database.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Db {
    /// Open or create the database and bring the schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        info!("Opening database at: {}", db_path.display());

        let open_path = db_path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&open_path).context("Failed to open SQLite database")?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to enable WAL mode")?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .context("Failed to set synchronous mode")?;
            conn.pragma_update(None, "foreign_keys", "ON")
                .context("Failed to enable foreign keys")?;

            Ok(conn)
        })
        .await??;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path,
        };
        db.initialize_schema().await?;
        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();

            // One confirmable action per user; the PRIMARY KEY is the
            // single-slot guarantee.
            conn.execute(
                "CREATE TABLE IF NOT EXISTS pending_actions (
                    user_id TEXT PRIMARY KEY,
                    action_json TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS food_log (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    food_name TEXT NOT NULL,
                    portion TEXT NOT NULL,
                    calories REAL NOT NULL,
                    protein_g REAL NOT NULL,
                    carbs_g REAL NOT NULL,
                    fat_g REAL NOT NULL,
                    fiber_g REAL NOT NULL,
                    source TEXT NOT NULL,
                    logged_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_food_log_user_time
                 ON food_log(user_id, logged_at DESC)",
                [],
            )?;

            // Batch nutrition is stored; per-serving is derived on read.
            conn.execute(
                "CREATE TABLE IF NOT EXISTS user_recipes (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    servings REAL NOT NULL,
                    batch_calories REAL NOT NULL,
                    batch_protein_g REAL NOT NULL,
                    batch_carbs_g REAL NOT NULL,
                    batch_fat_g REAL NOT NULL,
                    batch_fiber_g REAL NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_recipes_user
                 ON user_recipes(user_id)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_recipes_fingerprint
                 ON user_recipes(user_id, fingerprint)",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL,
                    calories REAL,
                    protein_g REAL,
                    carbs_g REAL,
                    fat_g REAL,
                    fiber_g REAL,
                    FOREIGN KEY(recipe_id) REFERENCES user_recipes(id) ON DELETE CASCADE
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_ingredients_recipe
                 ON recipe_ingredients(recipe_id)",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS user_goals (
                    user_id TEXT NOT NULL,
                    field TEXT NOT NULL,
                    target REAL NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, field)
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS chat_sessions (
                    session_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    state_json TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_sessions_user
                 ON chat_sessions(user_id)",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS chat_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_messages_session
                 ON chat_messages(session_id, id DESC)",
                [],
            )?;

            // Per-turn audit trail, written fire-and-forget.
            conn.execute(
                "CREATE TABLE IF NOT EXISTS turn_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ts TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    intent TEXT,
                    response_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    latency_ms INTEGER NOT NULL,
                    detail TEXT
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_turn_log_ts
                 ON turn_log(ts DESC)",
                [],
            )?;

            debug!("Database schema initialized");
            Ok(())
        })
        .await??;

        Ok(())
    }

    /// Execute a query on the blocking pool.
    pub async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await?
    }

    /// Like [`execute`] but with a mutable connection for transactions.
    ///
    /// [`execute`]: Db::execute
    pub async fn execute_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }

    /// Cheap liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        self.execute(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
