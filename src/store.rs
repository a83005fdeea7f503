//! SQLite-backed tenant binding store
//!
//! The control panel owns the tenant and website tables; the gateway only
//! reads them. `lookup_binding` is the single query issued on the request
//! path. Write helpers exist for control-plane seeding and for tests.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Current schema version for migrations
const SCHEMA_VERSION: i32 = 2;

/// The unique mapping from a domain to a tenant and its access path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantBinding {
    /// The bound domain, stored bare (no port, no scheme)
    pub domain: String,
    /// The owning tenant's account name
    pub tenant_name: String,
    /// Tenant-supplied path rooted under the tenant's home directory
    pub access_path: String,
}

/// Database connection wrapper with thread-safe access
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;
        Ok(db)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            info!(
                "Running migrations from v{} to v{}",
                current_version, SCHEMA_VERSION
            );

            if current_version < 1 {
                self.migrate_v1(&conn)?;
            }

            if current_version < 2 {
                self.migrate_v2(&conn)?;
            }
        }

        Ok(())
    }

    /// Migration v1: tenant and website tables
    fn migrate_v1(&self, conn: &Connection) -> Result<()> {
        debug!("Applying migration v1: initial schema");

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS website (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                access_path TEXT NOT NULL,
                user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            INSERT INTO schema_migrations (version) VALUES (1);
        "#,
        )?;

        Ok(())
    }

    /// Migration v2: one binding per domain
    fn migrate_v2(&self, conn: &Connection) -> Result<()> {
        debug!("Applying migration v2: unique domain index");

        conn.execute_batch(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_website_domain ON website(domain);

            INSERT INTO schema_migrations (version) VALUES (2);
        "#,
        )?;

        Ok(())
    }

    /// Look up the binding for a bare domain. Returns at most one row:
    /// domain uniqueness is enforced by the schema.
    pub fn lookup_binding(&self, domain: &str) -> Result<Option<TenantBinding>> {
        let conn = self.conn.lock().unwrap();

        let binding = conn
            .query_row(
                "SELECT website.domain, user.name, website.access_path
                 FROM website
                 JOIN user ON user.id = website.user_id
                 WHERE website.domain = ?1",
                params![domain],
                |row| {
                    Ok(TenantBinding {
                        domain: row.get(0)?,
                        tenant_name: row.get(1)?,
                        access_path: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query tenant binding")?;

        Ok(binding)
    }

    /// Create a tenant account row. Control-plane/seed path only.
    pub fn create_tenant(&self, name: &str, password_hash: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO user (name, password) VALUES (?1, ?2)",
            params![name, password_hash],
        )
        .context("Failed to insert tenant")?;

        Ok(conn.last_insert_rowid())
    }

    /// Bind a domain to a tenant. Fails if the domain is already bound.
    pub fn add_website(&self, domain: &str, access_path: &str, user_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO website (domain, access_path, user_id) VALUES (?1, ?2, ?3)",
            params![domain, access_path, user_id],
        )
        .context("Failed to insert website binding")?;

        Ok(conn.last_insert_rowid())
    }

    /// Remove a domain binding. Returns true if a row was deleted.
    pub fn remove_website(&self, domain: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let deleted = conn
            .execute("DELETE FROM website WHERE domain = ?1", params![domain])
            .context("Failed to delete website binding")?;

        Ok(deleted > 0)
    }
}
