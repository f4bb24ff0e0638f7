//! SQLite implementation of `UpdateRepository`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Layout
//!
//! Each update aggregate (builds, comments, policy fields) is stored as one
//! JSON document next to the columns we query on. The `builds` table indexes
//! the aggregate's builds so ownership and per-package lookups do not need
//! to decode every update.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. New fields on model types should carry
//! `#[serde(default)]` so rows written by older versions still decode.


use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use karmagate_core::{Alias, Bug, BuildrootOverride, Release, Update, UpdateStatus};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::{RepositoryError, UpdateRepository};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 2;

/// SQLite-backed update repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

fn lock<'a>(
    conn: &'a Mutex<Connection>,
    operation: &str,
) -> Result<MutexGuard<'a, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))
}

fn bug_id_to_i64(bug_id: u64, operation: &str) -> Result<i64, RepositoryError> {
    i64::try_from(bug_id)
        .map_err(|_| RepositoryError::storage(operation, format!("bug id {} out of range", bug_id)))
}

fn decode<T: DeserializeOwned>(json: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(json).map_err(|_| RepositoryError::corruption(what))
}

fn encode<T: serde::Serialize>(value: &T, operation: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::storage(operation, e.to_string()))
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(epoch_secs)
        .unwrap_or(0)
}

/// Whole seconds of `since_epoch`, saturating at `i64::MAX`.
fn epoch_secs(since_epoch: Duration) -> i64 {
    i64::try_from(since_epoch.as_secs()).unwrap_or(i64::MAX)
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist and runs any
    /// pending migrations.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability (survives OS/power failure)
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RepositoryError::storage(
                        "create database directory",
                        format!("{}: {}", parent.display(), e),
                    )
                })?;

                // The directory also holds the WAL and SHM files, which
                // SQLite creates with the default umask.
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let dir_permissions = std::fs::Permissions::from_mode(0o700);
                    if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                        warn!(
                            "Failed to set restrictive permissions on state directory: {}",
                            e
                        );
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite silently keeps DELETE mode on filesystems without shared
        // memory support, so check what we actually got.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        Self::init(conn)
    }

    /// Create an in-memory repository, used by tests.
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, RepositoryError> {
        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure database", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "check schema version",
                format!(
                    "database schema version {} is newer than supported version {}",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version < 1 {
            info!("Creating update schema (version 1)");
            conn.execute_batch(
                r#"
                CREATE TABLE updates (
                    alias TEXT PRIMARY KEY,
                    release TEXT NOT NULL,
                    status TEXT NOT NULL,
                    request TEXT,
                    locked INTEGER NOT NULL,
                    update_json TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX idx_updates_status ON updates(status);

                CREATE TABLE builds (
                    nvr TEXT PRIMARY KEY,
                    alias TEXT NOT NULL REFERENCES updates(alias),
                    package TEXT NOT NULL,
                    release TEXT NOT NULL
                );
                CREATE INDEX idx_builds_package ON builds(package, release);
                CREATE INDEX idx_builds_alias ON builds(alias);

                CREATE TABLE releases (
                    name TEXT PRIMARY KEY,
                    release_json TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| RepositoryError::storage("migrate to v1", e.to_string()))?;
        }

        if from_version < 2 {
            info!("Migrating schema to version 2 (bug cache and buildroot overrides)");
            conn.execute_batch(
                r#"
                CREATE TABLE bugs (
                    bug_id INTEGER PRIMARY KEY,
                    bug_json TEXT NOT NULL
                );

                CREATE TABLE overrides (
                    nvr TEXT PRIMARY KEY,
                    expired INTEGER NOT NULL,
                    override_json TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| RepositoryError::storage("migrate to v2", e.to_string()))?;
        }

        conn.execute(
            "INSERT INTO schema_version (id, version) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET version = excluded.version",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("record schema version", e.to_string()))?;

        Ok(())
    }

    async fn query_updates(
        &self,
        operation: &'static str,
        sql: &'static str,
        args: Vec<String>,
    ) -> Result<Vec<Update>, RepositoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, operation)?;
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

            // One corrupt row must not hide every other update from a sweep.
            let mut updates = Vec::new();
            for row in rows {
                let json = row.map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
                match decode::<Update>(&json, "update JSON") {
                    Ok(update) => updates.push(update),
                    Err(e) => warn!("Skipping corrupt row in {}: {}", operation, e),
                }
            }
            Ok(updates)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

#[async_trait]
impl UpdateRepository for SqliteRepository {
    async fn get_update(&self, alias: &Alias) -> Result<Option<Update>, RepositoryError> {
        let conn = self.conn.clone();
        let alias = alias.0.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "get_update")?;
            let json: Option<String> = conn
                .query_row(
                    "SELECT update_json FROM updates WHERE alias = ?1",
                    params![alias],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get_update", e.to_string()))?;

            json.map(|json| decode(&json, "update JSON")).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("get_update", e.to_string()))?
    }

    async fn commit(&self, updates: &[Update]) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let mut rows = Vec::with_capacity(updates.len());
        for update in updates {
            rows.push((update.clone(), encode(update, "serialize update")?));
        }

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn, "commit")?;
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("begin commit", e.to_string()))?;
            let now = now_secs();

            for (update, json) in &rows {
                tx.execute(
                    "INSERT INTO updates (alias, release, status, request, locked, update_json, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(alias) DO UPDATE SET
                        release = excluded.release,
                        status = excluded.status,
                        request = excluded.request,
                        locked = excluded.locked,
                        update_json = excluded.update_json,
                        updated_at = excluded.updated_at",
                    params![
                        update.alias.0,
                        update.release,
                        update.status.as_str(),
                        update.request.map(|r| r.as_str()),
                        update.locked,
                        json,
                        now
                    ],
                )
                .map_err(|e| RepositoryError::storage("commit update", e.to_string()))?;

                tx.execute(
                    "DELETE FROM builds WHERE alias = ?1",
                    params![update.alias.0],
                )
                .map_err(|e| RepositoryError::storage("commit builds", e.to_string()))?;

                for build in &update.builds {
                    tx.execute(
                        "INSERT INTO builds (nvr, alias, package, release) VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(nvr) DO UPDATE SET
                            alias = excluded.alias,
                            package = excluded.package,
                            release = excluded.release",
                        params![build.nvr, update.alias.0, build.package, build.release],
                    )
                    .map_err(|e| RepositoryError::storage("commit builds", e.to_string()))?;
                }
            }

            tx.commit()
                .map_err(|e| RepositoryError::storage("commit", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("commit", e.to_string()))?
    }

    async fn find_build_owner(&self, nvr: &str) -> Result<Option<Alias>, RepositoryError> {
        let conn = self.conn.clone();
        let nvr = nvr.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "find_build_owner")?;
            conn.query_row(
                "SELECT alias FROM builds WHERE nvr = ?1",
                params![nvr],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|alias| alias.map(Alias))
            .map_err(|e| RepositoryError::storage("find_build_owner", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("find_build_owner", e.to_string()))?
    }

    async fn updates_for_package(
        &self,
        package: &str,
        release: &str,
    ) -> Result<Vec<Update>, RepositoryError> {
        self.query_updates(
            "updates_for_package",
            "SELECT DISTINCT u.update_json FROM updates u
             JOIN builds b ON b.alias = u.alias
             WHERE b.package = ?1 AND u.release = ?2
             ORDER BY u.alias",
            vec![package.to_string(), release.to_string()],
        )
        .await
    }

    async fn updates_with_status(
        &self,
        status: UpdateStatus,
    ) -> Result<Vec<Update>, RepositoryError> {
        self.query_updates(
            "updates_with_status",
            "SELECT update_json FROM updates WHERE status = ?1 ORDER BY alias",
            vec![status.as_str().to_string()],
        )
        .await
    }

    async fn get_release(&self, name: &str) -> Result<Option<Release>, RepositoryError> {
        let conn = self.conn.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "get_release")?;
            let json: Option<String> = conn
                .query_row(
                    "SELECT release_json FROM releases WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get_release", e.to_string()))?;
            json.map(|json| decode(&json, "release JSON")).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("get_release", e.to_string()))?
    }

    async fn put_release(&self, release: &Release) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let name = release.name.clone();
        let json = encode(release, "serialize release")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "put_release")?;
            conn.execute(
                "INSERT INTO releases (name, release_json) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET release_json = excluded.release_json",
                params![name, json],
            )
            .map(|_| ())
            .map_err(|e| RepositoryError::storage("put_release", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("put_release", e.to_string()))?
    }

    async fn get_bugs(&self, ids: &[u64]) -> Result<Vec<Bug>, RepositoryError> {
        let conn = self.conn.clone();
        let ids = ids
            .iter()
            .map(|id| bug_id_to_i64(*id, "get_bugs"))
            .collect::<Result<Vec<_>, _>>()?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "get_bugs")?;
            let mut stmt = conn
                .prepare("SELECT bug_json FROM bugs WHERE bug_id = ?1")
                .map_err(|e| RepositoryError::storage("get_bugs", e.to_string()))?;

            let mut bugs = Vec::new();
            for id in ids {
                let json: Option<String> = stmt
                    .query_row(params![id], |row| row.get(0))
                    .optional()
                    .map_err(|e| RepositoryError::storage("get_bugs", e.to_string()))?;
                if let Some(json) = json {
                    bugs.push(decode(&json, "bug JSON")?);
                }
            }
            Ok(bugs)
        })
        .await
        .map_err(|e| RepositoryError::storage("get_bugs", e.to_string()))?
    }

    async fn put_bug(&self, bug: &Bug) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let id = bug_id_to_i64(bug.bug_id, "put_bug")?;
        let json = encode(bug, "serialize bug")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "put_bug")?;
            conn.execute(
                "INSERT INTO bugs (bug_id, bug_json) VALUES (?1, ?2)
                 ON CONFLICT(bug_id) DO UPDATE SET bug_json = excluded.bug_json",
                params![id, json],
            )
            .map(|_| ())
            .map_err(|e| RepositoryError::storage("put_bug", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("put_bug", e.to_string()))?
    }

    async fn get_override(&self, nvr: &str) -> Result<Option<BuildrootOverride>, RepositoryError> {
        let conn = self.conn.clone();
        let nvr = nvr.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "get_override")?;
            let json: Option<String> = conn
                .query_row(
                    "SELECT override_json FROM overrides WHERE nvr = ?1",
                    params![nvr],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get_override", e.to_string()))?;
            json.map(|json| decode(&json, "override JSON")).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("get_override", e.to_string()))?
    }

    async fn put_override(
        &self,
        buildroot_override: &BuildrootOverride,
    ) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let nvr = buildroot_override.nvr.clone();
        let expired = buildroot_override.is_expired();
        let json = encode(buildroot_override, "serialize override")?;
        if expired {
            warn!("Storing expired buildroot override for {}", nvr);
        }

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "put_override")?;
            conn.execute(
                "INSERT INTO overrides (nvr, expired, override_json) VALUES (?1, ?2, ?3)
                 ON CONFLICT(nvr) DO UPDATE SET
                    expired = excluded.expired,
                    override_json = excluded.override_json",
                params![nvr, expired, json],
            )
            .map(|_| ())
            .map_err(|e| RepositoryError::storage("put_override", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("put_override", e.to_string()))?
    }
}
