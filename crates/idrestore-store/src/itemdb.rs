// ABOUTME: SQLite adapter for the monitored application's key/value item table.
// ABOUTME: Writes identifier and credential keys in one all-or-nothing transaction and detects a held lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use idrestore_core::{ErrorKind, IdentifierSet};
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior, params};
use thiserror::Error;

/// Table holding the application's key/value state.
pub const ITEM_TABLE: &str = "ItemTable";

pub const AUTH_SIGN_UP_TYPE_KEY: &str = "cursorAuth/cachedSignUpType";
pub const AUTH_EMAIL_KEY: &str = "cursorAuth/cachedEmail";
pub const AUTH_ACCESS_TOKEN_KEY: &str = "cursorAuth/accessToken";
pub const AUTH_REFRESH_TOKEN_KEY: &str = "cursorAuth/refreshToken";

/// Sign-up type recorded when the caller does not name one.
pub const DEFAULT_AUTH_TYPE: &str = "Auth_0";

/// Errors that can occur during item table operations.
#[derive(Debug, Error)]
pub enum ItemDbError {
    #[error("database not found: {0}")]
    NotFound(PathBuf),

    #[error("database {0} is locked by another process; close the monitored application first")]
    Locked(PathBuf),

    #[error("writing {key} failed, transaction rolled back: {source}")]
    Query {
        key: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl ItemDbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ItemDbError::NotFound(_) => ErrorKind::NotFound,
            ItemDbError::Locked(_) => ErrorKind::Locked,
            ItemDbError::Query { .. } => ErrorKind::Query,
            ItemDbError::Sqlite(e) if is_lock_error(e) => ErrorKind::Locked,
            ItemDbError::Sqlite(_) => ErrorKind::Query,
        }
    }
}

/// A credential to persist alongside the identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub token: String,
    pub email: String,
    pub auth_type: String,
}

impl CredentialRecord {
    pub fn new(token: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            email: email.into(),
            auth_type: DEFAULT_AUTH_TYPE.to_string(),
        }
    }

    pub fn with_auth_type(mut self, auth_type: impl Into<String>) -> Self {
        self.auth_type = auth_type.into();
        self
    }

    fn pairs(&self) -> [(&str, &str); 4] {
        [
            (AUTH_SIGN_UP_TYPE_KEY, self.auth_type.as_str()),
            (AUTH_EMAIL_KEY, self.email.as_str()),
            (AUTH_ACCESS_TOKEN_KEY, self.token.as_str()),
            (AUTH_REFRESH_TOKEN_KEY, self.token.as_str()),
        ]
    }
}

/// The database file at a fixed path. Each operation opens its own
/// connection and closes it before returning.
#[derive(Debug, Clone)]
pub struct ItemDatabase {
    path: PathBuf,
}

impl ItemDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the existing database and confirm no other process holds its lock.
    pub fn open_connection(&self) -> Result<ItemDbHandle, ItemDbError> {
        if !self.path.is_file() {
            return Err(ItemDbError::NotFound(self.path.clone()));
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| self.classify(e))?;

        // Fail fast instead of waiting on the application's lock.
        conn.busy_timeout(Duration::ZERO)?;
        conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;")
            .map_err(|e| self.classify(e))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ItemTable (
                key TEXT PRIMARY KEY,
                value TEXT
            );",
        )
        .map_err(|e| self.classify(e))?;

        tracing::debug!("opened item database {}", self.path.display());
        Ok(ItemDbHandle {
            conn,
            path: self.path.clone(),
        })
    }

    /// Open, write every present identifier in one transaction, and close.
    pub fn update_identifiers(&self, ids: &IdentifierSet) -> Result<usize, ItemDbError> {
        let mut handle = self.open_connection()?;
        handle.update_identifiers(ids)
    }

    /// Open, write the credential keys in one transaction, and close.
    pub fn persist_credential(&self, record: &CredentialRecord) -> Result<usize, ItemDbError> {
        let mut handle = self.open_connection()?;
        handle.persist_credential(record)
    }

    fn classify(&self, err: rusqlite::Error) -> ItemDbError {
        if is_lock_error(&err) {
            ItemDbError::Locked(self.path.clone())
        } else {
            ItemDbError::Sqlite(err)
        }
    }
}

/// An open connection to the item table. Dropping it closes the connection.
pub struct ItemDbHandle {
    conn: Connection,
    path: PathBuf,
}

impl ItemDbHandle {
    /// Insert or update one row per present identifier. Absent identifiers are
    /// neither written nor deleted. Returns the number of rows affected.
    pub fn update_identifiers(&mut self, ids: &IdentifierSet) -> Result<usize, ItemDbError> {
        let pairs: Vec<(&str, &str)> = ids
            .present()
            .map(|(key, value)| (key.storage_key(), value))
            .collect();
        self.upsert_all(&pairs)
    }

    pub fn persist_credential(&mut self, record: &CredentialRecord) -> Result<usize, ItemDbError> {
        self.upsert_all(&record.pairs())
    }

    /// Current value stored under `key`, if any.
    pub fn read_value(&self, key: &str) -> Result<Option<String>, ItemDbError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM ItemTable WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn upsert_all(&mut self, pairs: &[(&str, &str)]) -> Result<usize, ItemDbError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| lock_or_sqlite(e, &self.path))?;

        let mut affected = 0;
        for (key, value) in pairs {
            match upsert(&tx, key, value) {
                Ok(rows) => {
                    tracing::debug!("updated {} in {}", key, ITEM_TABLE);
                    affected += rows;
                }
                Err(source) => {
                    tracing::warn!("writing {} failed, rolling back: {}", key, source);
                    if let Err(rollback) = tx.rollback() {
                        tracing::error!("rollback failed: {}", rollback);
                    }
                    if is_lock_error(&source) {
                        return Err(ItemDbError::Locked(self.path.clone()));
                    }
                    return Err(ItemDbError::Query {
                        key: key.to_string(),
                        source,
                    });
                }
            }
        }

        tx.commit().map_err(|e| lock_or_sqlite(e, &self.path))?;
        tracing::info!(
            "committed {} rows to {} in {}",
            affected,
            ITEM_TABLE,
            self.path.display()
        );
        Ok(affected)
    }
}

/// Update the row if it exists, insert it otherwise. Works whether or not the
/// table declares a unique constraint on `key`.
fn upsert(conn: &Connection, key: &str, value: &str) -> Result<usize, rusqlite::Error> {
    let updated = conn.execute(
        "UPDATE ItemTable SET value = ?1 WHERE key = ?2",
        params![value, key],
    )?;
    if updated > 0 {
        return Ok(updated);
    }
    conn.execute(
        "INSERT INTO ItemTable (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
}

fn is_lock_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn lock_or_sqlite(err: rusqlite::Error, path: &Path) -> ItemDbError {
    if is_lock_error(&err) {
        ItemDbError::Locked(path.to_path_buf())
    } else {
        ItemDbError::Sqlite(err)
    }
}
