use super::store::{Column, ColumnType, Record, Scalar, StoreError};
use crate::utils::now_utc_sql;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const CHECKED_TRUE: &str = "true";
pub const CHECKED_FALSE: &str = "false";

/// Columns of the `checklist_states` table, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecklistColumn {
    Id,
    UserId,
    PostId,
    BlogId,
    Field,
    Checked,
    CreatedAt,
}

impl Column for ChecklistColumn {
    fn name(self) -> &'static str {
        match self {
            ChecklistColumn::Id => "id",
            ChecklistColumn::UserId => "user_id",
            ChecklistColumn::PostId => "post_id",
            ChecklistColumn::BlogId => "blog_id",
            ChecklistColumn::Field => "field",
            ChecklistColumn::Checked => "checked",
            ChecklistColumn::CreatedAt => "created_at",
        }
    }

    fn kind(self) -> ColumnType {
        match self {
            ChecklistColumn::Id
            | ChecklistColumn::UserId
            | ChecklistColumn::PostId
            | ChecklistColumn::BlogId => ColumnType::Integer,
            ChecklistColumn::Field | ChecklistColumn::Checked | ChecklistColumn::CreatedAt => {
                ColumnType::Text
            }
        }
    }
}

impl fmt::Display for ChecklistColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecklistColumn {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        ChecklistState::COLUMNS
            .iter()
            .copied()
            .find(|column| column.name() == lowered)
            .ok_or_else(|| StoreError::UnknownColumn(raw.to_string()))
    }
}

/// Persisted checked/unchecked state of one checklist item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistState {
    pub id: i64,
    pub user_id: i64,
    pub post_id: i64,
    pub blog_id: i64,
    pub field: String,
    pub checked: String,
    pub created_at: String,
}

impl ChecklistState {
    pub fn is_checked(&self) -> bool {
        self.checked == CHECKED_TRUE
    }
}

impl Record for ChecklistState {
    type Column = ChecklistColumn;

    const TABLE: &'static str = "checklist_states";
    const PRIMARY_KEY: ChecklistColumn = ChecklistColumn::Id;
    const NATURAL_KEY: &'static [ChecklistColumn] = &[
        ChecklistColumn::PostId,
        ChecklistColumn::BlogId,
        ChecklistColumn::Field,
    ];
    const COLUMNS: &'static [ChecklistColumn] = &[
        ChecklistColumn::Id,
        ChecklistColumn::UserId,
        ChecklistColumn::PostId,
        ChecklistColumn::BlogId,
        ChecklistColumn::Field,
        ChecklistColumn::Checked,
        ChecklistColumn::CreatedAt,
    ];

    fn column_defaults() -> Self {
        Self {
            id: 0,
            user_id: 0,
            post_id: 0,
            blog_id: 0,
            field: String::new(),
            checked: CHECKED_TRUE.to_string(),
            created_at: now_utc_sql(),
        }
    }

    fn get(&self, column: ChecklistColumn) -> Scalar {
        match column {
            ChecklistColumn::Id => Scalar::Integer(self.id),
            ChecklistColumn::UserId => Scalar::Integer(self.user_id),
            ChecklistColumn::PostId => Scalar::Integer(self.post_id),
            ChecklistColumn::BlogId => Scalar::Integer(self.blog_id),
            ChecklistColumn::Field => Scalar::Text(self.field.clone()),
            ChecklistColumn::Checked => Scalar::Text(self.checked.clone()),
            ChecklistColumn::CreatedAt => Scalar::Text(self.created_at.clone()),
        }
    }

    fn set(&mut self, column: ChecklistColumn, value: Scalar) -> Result<(), StoreError> {
        let value = column.kind().coerce(column.name(), value)?;
        match (column, value) {
            (ChecklistColumn::Id, Scalar::Integer(v)) => self.id = v,
            (ChecklistColumn::UserId, Scalar::Integer(v)) => self.user_id = v,
            (ChecklistColumn::PostId, Scalar::Integer(v)) => self.post_id = v,
            (ChecklistColumn::BlogId, Scalar::Integer(v)) => self.blog_id = v,
            (ChecklistColumn::Field, Scalar::Text(v)) => self.field = v,
            (ChecklistColumn::Checked, Scalar::Text(v)) => self.checked = v,
            (ChecklistColumn::CreatedAt, Scalar::Text(v)) => self.created_at = v,
            (column, value) => {
                return Err(StoreError::TypeMismatch {
                    column: column.name(),
                    value,
                })
            }
        }
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            post_id: row.get("post_id")?,
            blog_id: row.get("blog_id")?,
            field: row.get("field")?,
            checked: row.get("checked")?,
            created_at: row.get("created_at")?,
        })
    }
}
