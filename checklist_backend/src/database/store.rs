//! Generic single-table record store.
//!
//! A [`Record`] describes one flat table: its name, primary key, natural key,
//! column whitelist (the [`Record::Column`] enum) and column defaults. A
//! [`RecordStore`] maps typed records onto single-row operations against that
//! table. Values always travel through parameter binding; column names are
//! only ever taken from the whitelist and quoted as identifiers.

mod memory;
mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use regex::Regex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row id must be a positive integer, got {0}")]
    InvalidId(i64),
    #[error("filter conditions may not be empty")]
    EmptyConditions,
    #[error("no writable fields given")]
    EmptyFields,
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    #[error("`{0}` is not a safe SQL identifier")]
    UnsafeIdentifier(String),
    #[error("value {value} does not fit column `{column}`")]
    TypeMismatch { column: &'static str, value: Scalar },
    #[error("a row with the same natural key already exists")]
    DuplicateKey,
    #[error("storage lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                StoreError::DuplicateKey
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

/// Scalar type tag of a whitelisted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
}

impl ColumnType {
    /// Converts `value` into this column's representation. Numeric text is
    /// accepted for integer columns; integers are rendered for text columns.
    pub fn coerce(self, column: &'static str, value: Scalar) -> Result<Scalar, StoreError> {
        match (self, value) {
            (ColumnType::Integer, Scalar::Integer(v)) => Ok(Scalar::Integer(v)),
            (ColumnType::Integer, Scalar::Text(raw)) => match raw.trim().parse::<i64>() {
                Ok(v) => Ok(Scalar::Integer(v)),
                Err(_) => Err(StoreError::TypeMismatch {
                    column,
                    value: Scalar::Text(raw),
                }),
            },
            (ColumnType::Text, Scalar::Text(v)) => Ok(Scalar::Text(v)),
            (ColumnType::Text, Scalar::Integer(v)) => Ok(Scalar::Text(v.to_string())),
        }
    }
}

/// A single integer or string value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Text(String),
}

impl Scalar {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Scalar::Integer(v) => Some(*v),
            Scalar::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Integer(v) => write!(f, "{v}"),
            Scalar::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Scalar::Integer(v) => v.to_sql(),
            Scalar::Text(v) => v.to_sql(),
        }
    }
}

impl FromSql for Scalar {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(v) => Ok(Scalar::Integer(v)),
            ValueRef::Text(_) => value.as_str().map(|s| Scalar::Text(s.to_string())),
            ValueRef::Real(v) => Ok(Scalar::Text(v.to_string())),
            ValueRef::Null | ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

pub trait Column: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn name(self) -> &'static str;
    fn kind(self) -> ColumnType;
}

/// Table configuration plus typed access to a row's columns.
pub trait Record: Clone + Send + Sync + 'static {
    type Column: Column;

    const TABLE: &'static str;
    const PRIMARY_KEY: Self::Column;
    /// Columns that identify one logical row; backed by a unique index.
    const NATURAL_KEY: &'static [Self::Column];
    /// Column whitelist in declaration order.
    const COLUMNS: &'static [Self::Column];

    /// A record holding the default value of every column.
    fn column_defaults() -> Self;
    fn get(&self, column: Self::Column) -> Scalar;
    fn set(&mut self, column: Self::Column, value: Scalar) -> Result<(), StoreError>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// At least one row matched and was written.
    Applied,
    /// The statement ran but no row matched.
    NoMatch,
}

impl WriteOutcome {
    pub fn applied(self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
    /// A row with the same natural key exists but belongs to someone else.
    OwnerMismatch,
}

/// Notified around every insert with the final, defaulted field set. Only
/// writes that create a row are reported; in-place updates and rejected
/// upserts are not. During `upsert_owned` the store's lock is held while
/// `before_insert` runs, so observers must not call back into the store.
pub trait InsertObserver<R: Record>: Send + Sync {
    fn before_insert(&self, _record: &R) {}
    fn after_insert(&self, _id: i64, _record: &R) {}
}

pub struct Observers<R: Record> {
    list: Vec<Arc<dyn InsertObserver<R>>>,
}

impl<R: Record> Observers<R> {
    pub fn new(list: Vec<Arc<dyn InsertObserver<R>>>) -> Self {
        Self { list }
    }

    pub(crate) fn before_insert(&self, record: &R) {
        for observer in &self.list {
            observer.before_insert(record);
        }
    }

    pub(crate) fn after_insert(&self, id: i64, record: &R) {
        for observer in &self.list {
            observer.after_insert(id, record);
        }
    }
}

impl<R: Record> Default for Observers<R> {
    fn default() -> Self {
        Self { list: Vec::new() }
    }
}

impl<R: Record> Clone for Observers<R> {
    fn clone(&self) -> Self {
        Self {
            list: self.list.clone(),
        }
    }
}

/// Single-table CRUD over records of type `R`.
///
/// Single-value lookups (`get_one*`, `get_scalar*`) treat a value that cannot
/// be represented in the key column as not found.
pub trait RecordStore<R: Record> {
    fn get_one(&self, id: Scalar) -> Result<Option<R>, StoreError>;
    fn get_one_by(&self, column: R::Column, value: Scalar) -> Result<Option<R>, StoreError>;
    fn get_scalar(&self, column: R::Column, id: Scalar) -> Result<Option<Scalar>, StoreError>;
    fn get_scalar_by(
        &self,
        column: R::Column,
        where_column: R::Column,
        where_value: Scalar,
    ) -> Result<Option<Scalar>, StoreError>;
    /// First record equal on every `(column, value)` pair. Empty conditions
    /// are rejected.
    fn find_matching(&self, conditions: &[(R::Column, Scalar)]) -> Result<Option<R>, StoreError>;
    fn count_matching(&self, conditions: &[(R::Column, Scalar)]) -> Result<usize, StoreError>;
    /// Writes `fields` from `record` over the column defaults and returns the
    /// new primary key. The primary key itself is always store-generated.
    fn insert(&self, record: &R, fields: &[R::Column]) -> Result<i64, StoreError>;
    fn update(
        &self,
        id: i64,
        record: &R,
        fields: &[R::Column],
        where_column: Option<R::Column>,
    ) -> Result<WriteOutcome, StoreError>;
    fn delete(&self, id: i64) -> Result<WriteOutcome, StoreError>;
    /// Inserts `record` or, when its natural key already exists and the
    /// stored `owner` column equals the record's, writes `fields` onto the
    /// existing row. Runs as one atomic step.
    fn upsert_owned(
        &self,
        record: &R,
        fields: &[R::Column],
        owner: R::Column,
    ) -> Result<UpsertOutcome, StoreError>;
    fn table_exists(&self, name: &str) -> Result<bool, StoreError>;
}

pub(crate) fn check_row_id(id: i64) -> Result<i64, StoreError> {
    if id <= 0 {
        return Err(StoreError::InvalidId(id));
    }
    Ok(id)
}

/// Whitelisted columns to write, without the primary key or repeats.
pub(crate) fn writable_columns<R: Record>(fields: &[R::Column]) -> Vec<R::Column> {
    let mut columns: Vec<R::Column> = Vec::with_capacity(fields.len());
    for column in fields {
        if *column != R::PRIMARY_KEY && !columns.contains(column) {
            columns.push(*column);
        }
    }
    columns
}

/// Record as it will be inserted: defaults overlaid with the given fields.
pub(crate) fn normalize_insert<R: Record>(record: &R, fields: &[R::Column]) -> Result<R, StoreError> {
    let mut normalized = R::column_defaults();
    for column in writable_columns::<R>(fields) {
        normalized.set(column, record.get(column))?;
    }
    normalized.set(R::PRIMARY_KEY, Scalar::Integer(0))?;
    Ok(normalized)
}

/// `value` in `column`'s representation, or `None` when no stored row could
/// hold it.
pub(crate) fn coerce_lookup<C: Column>(column: C, value: Scalar) -> Option<Scalar> {
    column.kind().coerce(column.name(), value).ok()
}

pub(crate) fn coerce_conditions<R: Record>(
    conditions: &[(R::Column, Scalar)],
) -> Result<Vec<(R::Column, Scalar)>, StoreError> {
    if conditions.is_empty() {
        return Err(StoreError::EmptyConditions);
    }
    conditions
        .iter()
        .map(|(column, value)| Ok((*column, column.kind().coerce(column.name(), value.clone())?)))
        .collect()
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Quotes `name` for use as an SQL identifier, rejecting anything that is not
/// a plain identifier token.
pub fn quote_identifier(name: &str) -> Result<String, StoreError> {
    if !identifier_pattern().is_match(name) {
        return Err(StoreError::UnsafeIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ChecklistColumn, ChecklistState};

    #[test]
    fn quote_identifier_rejects_injection() {
        assert_eq!(quote_identifier("post_id").unwrap(), "\"post_id\"");
        for bad in ["", "1abc", "id; DROP TABLE x", "a\"b", "field--", "a b"] {
            assert!(
                matches!(quote_identifier(bad), Err(StoreError::UnsafeIdentifier(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn row_ids_must_be_positive() {
        assert!(matches!(check_row_id(0), Err(StoreError::InvalidId(0))));
        assert!(matches!(check_row_id(-1), Err(StoreError::InvalidId(-1))));
        assert_eq!(check_row_id(3).unwrap(), 3);
    }

    #[test]
    fn normalize_insert_fills_defaults_and_drops_primary_key() {
        let record = ChecklistState {
            id: 99,
            user_id: 5,
            post_id: 7,
            blog_id: 3,
            field: "abc".into(),
            checked: "false".into(),
            created_at: "ignored".into(),
        };
        let normalized = normalize_insert::<ChecklistState>(
            &record,
            &[ChecklistColumn::Id, ChecklistColumn::UserId, ChecklistColumn::Field],
        )
        .unwrap();
        assert_eq!(normalized.id, 0);
        assert_eq!(normalized.user_id, 5);
        assert_eq!(normalized.field, "abc");
        assert_eq!(normalized.post_id, 0);
        assert_eq!(normalized.blog_id, 0);
        assert_eq!(normalized.checked, "true");
        assert_ne!(normalized.created_at, "ignored");
    }

    #[test]
    fn coerce_conditions_rejects_empty_sets() {
        assert!(matches!(
            coerce_conditions::<ChecklistState>(&[]),
            Err(StoreError::EmptyConditions)
        ));
        let coerced = coerce_conditions::<ChecklistState>(&[(
            ChecklistColumn::PostId,
            Scalar::from("7"),
        )])
        .unwrap();
        assert_eq!(coerced[0].1, Scalar::Integer(7));
    }

    #[test]
    fn only_uniqueness_violations_map_to_duplicate_key() {
        let conn = rusqlite::Connection::open_in_memory().expect("in-memory db");
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, k TEXT NOT NULL UNIQUE, n INTEGER CHECK (n > 0));
             INSERT INTO t (id, k, n) VALUES (1, 'a', 1);",
        )
        .unwrap();

        let duplicate = conn
            .execute("INSERT INTO t (k, n) VALUES ('a', 1)", [])
            .unwrap_err();
        assert!(matches!(StoreError::from(duplicate), StoreError::DuplicateKey));

        let primary_key = conn
            .execute("INSERT INTO t (id, k, n) VALUES (1, 'b', 1)", [])
            .unwrap_err();
        assert!(matches!(StoreError::from(primary_key), StoreError::DuplicateKey));

        let not_null = conn
            .execute("INSERT INTO t (k, n) VALUES (NULL, 1)", [])
            .unwrap_err();
        assert!(matches!(StoreError::from(not_null), StoreError::Sqlite(_)));

        let check = conn
            .execute("INSERT INTO t (k, n) VALUES ('c', 0)", [])
            .unwrap_err();
        assert!(matches!(StoreError::from(check), StoreError::Sqlite(_)));
    }

    #[test]
    fn lookups_treat_unrepresentable_keys_as_absent() {
        assert_eq!(coerce_lookup(ChecklistColumn::Id, "abc".into()), None);
        assert_eq!(
            coerce_lookup(ChecklistColumn::Id, "12".into()),
            Some(Scalar::Integer(12))
        );
        assert_eq!(
            coerce_lookup(ChecklistColumn::Field, Scalar::Integer(3)),
            Some(Scalar::from("3"))
        );
    }
}
