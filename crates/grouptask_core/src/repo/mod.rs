//! Persistence contracts and SQLite implementations for tasks.
//!
//! # Responsibility
//! - Load and save events and to-dos keyed by uid.
//! - Enforce the optimistic `version` contract on every update.
//!
//! # Invariants
//! - An update whose stored version differs from the in-memory one fails with
//!   `DomainError::ConcurrentModification`; nothing is written.
//! - A row with no parent column set is surfaced as `DomainError::NoParent`.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::error::{DomainError, ErrorKind};
use crate::model::ids::TaskRef;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod event_repo;
pub mod todo_repo;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Domain rule violated on load or save (version conflict, missing parent).
    Domain(DomainError),
    /// Target row does not exist.
    NotFound(TaskRef),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid model.
    InvalidData(String),
}

impl RepoError {
    /// Domain classification, when this error carries one.
    pub fn domain_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Domain(err) => Some(err.kind()),
            _ => None,
        }
    }

    pub fn is_concurrent_modification(&self) -> bool {
        self.domain_kind() == Some(ErrorKind::ConcurrentModification)
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Domain(err) => write!(f, "{err}"),
            Self::NotFound(task) => write!(f, "{task} not found"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "task repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "task repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted task data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Domain(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<DomainError> for RepoError {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(format!("tag payload is not a JSON string array: {value}"))
    }
}

/// Fails unless `conn` is fully migrated and carries `tables`.
pub(crate) fn ensure_connection_ready(conn: &Connection, tables: &[&'static str]) -> RepoResult<()> {
    let actual_version = current_user_version(conn)?;
    let expected_version = latest_version();
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    for &table in tables {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

/// Classifies a zero-row versioned update on `table`.
pub(crate) fn version_conflict(
    conn: &Connection,
    table: &str,
    task: TaskRef,
    expected_version: u32,
) -> RepoError {
    let stored: rusqlite::Result<Option<i64>> = conn
        .query_row(
            &format!("SELECT version FROM {table} WHERE uid = ?1;"),
            [task.uid().to_string()],
            |row| row.get(0),
        )
        .optional();
    match stored {
        Ok(None) => RepoError::NotFound(task),
        Ok(Some(actual)) => match parse_version(actual) {
            Ok(actual_version) => DomainError::ConcurrentModification {
                task,
                expected_version,
                actual_version,
            }
            .into(),
            Err(err) => err,
        },
        Err(err) => err.into(),
    }
}

pub(crate) fn to_epoch_ms(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub(crate) fn from_epoch_ms(value: i64, column: &str) -> RepoResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(value)
        .ok_or_else(|| RepoError::InvalidData(format!("`{column}` out of range: {value}")))
}

pub(crate) fn from_optional_epoch_ms(
    value: Option<i64>,
    column: &str,
) -> RepoResult<Option<DateTime<Utc>>> {
    value.map(|ms| from_epoch_ms(ms, column)).transpose()
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn parse_optional_uuid(value: Option<String>, column: &str) -> RepoResult<Option<Uuid>> {
    value.map(|raw| parse_uuid(&raw, column)).transpose()
}

pub(crate) fn parse_version(value: i64) -> RepoResult<u32> {
    u32::try_from(value).map_err(|_| RepoError::InvalidData(format!("invalid version {value}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "`{column}` must be 0 or 1, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{ensure_connection_ready, from_epoch_ms, int_to_bool, to_epoch_ms, RepoError};
    use chrono::{TimeZone, Utc};
    use rusqlite::{Connection, OptionalExtension};

    #[test]
    fn epoch_ms_keeps_millisecond_precision() {
        let time = Utc.timestamp_millis_opt(1_767_225_600_123).unwrap();
        assert_eq!(from_epoch_ms(to_epoch_ms(time), "t").unwrap(), time);
    }

    #[test]
    fn non_boolean_flag_is_invalid_data() {
        assert!(matches!(int_to_bool(2, "canceled"), Err(RepoError::InvalidData(_))));
    }

    #[test]
    fn unmigrated_connection_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = ensure_connection_ready(&conn, &["events"]).unwrap_err();
        assert!(matches!(
            err,
            RepoError::UninitializedConnection {
                actual_version: 0,
                ..
            }
        ));
    }
}
