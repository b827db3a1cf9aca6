pub mod models;
pub mod store;

use crate::config::ChecklistPaths;
use anyhow::{anyhow, Context, Result};
use models::ChecklistState;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use store::{Record, StoreError};

/// Bumped whenever the state table DDL changes.
pub const SCHEMA_VERSION: i64 = 2;

pub(crate) const MIGRATIONS: &str = r#"
    PRAGMA journal_mode = WAL;

    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

pub(crate) const CHECKLIST_STATE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS checklist_states (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        post_id INTEGER NOT NULL,
        blog_id INTEGER NOT NULL,
        field TEXT NOT NULL,
        checked TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_checklist_states_item
        ON checklist_states(post_id, blog_id, field);
    CREATE INDEX IF NOT EXISTS idx_checklist_states_field ON checklist_states(field);
    CREATE INDEX IF NOT EXISTS idx_checklist_states_user ON checklist_states(user_id);
    CREATE INDEX IF NOT EXISTS idx_checklist_states_checked ON checklist_states(checked);
    CREATE INDEX IF NOT EXISTS idx_checklist_states_post ON checklist_states(post_id);
"#;

fn schema_version_key() -> String {
    format!("{}_db_version", ChecklistState::TABLE)
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    newly_created: bool,
}

impl Database {
    pub fn connect(paths: &ChecklistPaths) -> Result<Self> {
        let newly_created = !paths.db_path.exists();
        let conn = Connection::open(&paths.db_path)
            .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
        Ok(Self::from_connection(conn, newly_created))
    }

    pub fn from_connection(conn: Connection, newly_created: bool) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            newly_created,
        }
    }

    pub fn newly_created(&self) -> bool {
        self.newly_created
    }

    /// Provisions the schema. Returns `true` when the state table did not
    /// exist before this call.
    pub fn ensure_migrations(&self) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute_batch(MIGRATIONS)?;

            let key = schema_version_key();
            let recorded: Option<i64> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .and_then(|raw| raw.parse().ok());

            let existed = table_exists_locked(conn, ChecklistState::TABLE)?;
            if existed && recorded.is_some_and(|version| version >= SCHEMA_VERSION) {
                return Ok(false);
            }

            conn.execute_batch(CHECKLIST_STATE_SCHEMA)
                .context("failed to provision checklist_states")?;
            conn.execute(
                r#"
                INSERT INTO settings (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
                params![key, SCHEMA_VERSION.to_string()],
            )?;
            tracing::info!(
                table = ChecklistState::TABLE,
                previous_version = ?recorded,
                version = SCHEMA_VERSION,
                "schema provisioned"
            );
            Ok(!existed)
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to load setting")
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO settings (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        f(&guard)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

pub(crate) fn table_exists_locked(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.as_deref() == Some(name))
}
