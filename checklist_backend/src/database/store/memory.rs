use super::{
    check_row_id, coerce_conditions, coerce_lookup, normalize_insert, writable_columns, Column,
    Observers, Record, RecordStore, Scalar, StoreError, UpsertOutcome, WriteOutcome,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

struct MemoryTable<R> {
    rows: BTreeMap<i64, R>,
    next_id: i64,
}

/// In-process [`RecordStore`] with the same semantics as the SQLite one,
/// including the unique natural key. Used where no database is wanted.
pub struct MemoryRecordStore<R: Record> {
    table: Arc<Mutex<MemoryTable<R>>>,
    observers: Observers<R>,
}

impl<R: Record> Clone for MemoryRecordStore<R> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            observers: self.observers.clone(),
        }
    }
}

impl<R: Record> Default for MemoryRecordStore<R> {
    fn default() -> Self {
        Self::with_observers(Observers::default())
    }
}

impl<R: Record> MemoryRecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observers(observers: Observers<R>) -> Self {
        Self {
            table: Arc::new(Mutex::new(MemoryTable {
                rows: BTreeMap::new(),
                next_id: 1,
            })),
            observers,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryTable<R>>, StoreError> {
        self.table.lock().map_err(|_| StoreError::Poisoned)
    }

    fn first_where(&self, column: R::Column, value: Scalar) -> Result<Option<R>, StoreError> {
        let Some(value) = coerce_lookup(column, value) else {
            return Ok(None);
        };
        let table = self.lock()?;
        Ok(table
            .rows
            .values()
            .find(|row| row.get(column) == value)
            .cloned())
    }
}

fn matches_all<R: Record>(row: &R, conditions: &[(R::Column, Scalar)]) -> bool {
    conditions
        .iter()
        .all(|(column, value)| row.get(*column) == *value)
}

fn same_natural_key<R: Record>(a: &R, b: &R) -> bool {
    R::NATURAL_KEY
        .iter()
        .all(|column| a.get(*column) == b.get(*column))
}

impl<R: Record> RecordStore<R> for MemoryRecordStore<R> {
    fn get_one(&self, id: Scalar) -> Result<Option<R>, StoreError> {
        self.first_where(R::PRIMARY_KEY, id)
    }

    fn get_one_by(&self, column: R::Column, value: Scalar) -> Result<Option<R>, StoreError> {
        self.first_where(column, value)
    }

    fn get_scalar(&self, column: R::Column, id: Scalar) -> Result<Option<Scalar>, StoreError> {
        Ok(self
            .first_where(R::PRIMARY_KEY, id)?
            .map(|row| row.get(column)))
    }

    fn get_scalar_by(
        &self,
        column: R::Column,
        where_column: R::Column,
        where_value: Scalar,
    ) -> Result<Option<Scalar>, StoreError> {
        Ok(self
            .first_where(where_column, where_value)?
            .map(|row| row.get(column)))
    }

    fn find_matching(&self, conditions: &[(R::Column, Scalar)]) -> Result<Option<R>, StoreError> {
        let conditions = coerce_conditions::<R>(conditions)?;
        let table = self.lock()?;
        Ok(table
            .rows
            .values()
            .find(|row| matches_all(*row, &conditions))
            .cloned())
    }

    fn count_matching(&self, conditions: &[(R::Column, Scalar)]) -> Result<usize, StoreError> {
        let conditions = coerce_conditions::<R>(conditions)?;
        let table = self.lock()?;
        Ok(table
            .rows
            .values()
            .filter(|row| matches_all(*row, &conditions))
            .count())
    }

    fn insert(&self, record: &R, fields: &[R::Column]) -> Result<i64, StoreError> {
        let mut normalized = normalize_insert(record, fields)?;
        self.observers.before_insert(&normalized);

        let id = {
            let mut table = self.lock()?;
            if table
                .rows
                .values()
                .any(|row| same_natural_key(row, &normalized))
            {
                return Err(StoreError::DuplicateKey);
            }
            let id = table.next_id;
            table.next_id += 1;
            normalized.set(R::PRIMARY_KEY, Scalar::Integer(id))?;
            table.rows.insert(id, normalized.clone());
            id
        };

        self.observers.after_insert(id, &normalized);
        Ok(id)
    }

    fn update(
        &self,
        id: i64,
        record: &R,
        fields: &[R::Column],
        where_column: Option<R::Column>,
    ) -> Result<WriteOutcome, StoreError> {
        let id = check_row_id(id)?;
        let columns = writable_columns::<R>(fields);
        if columns.is_empty() {
            return Err(StoreError::EmptyFields);
        }
        let where_column = where_column.unwrap_or(R::PRIMARY_KEY);
        let where_value = where_column
            .kind()
            .coerce(where_column.name(), Scalar::Integer(id))?;

        let mut table = self.lock()?;
        let mut changed = 0usize;
        for row in table.rows.values_mut() {
            if row.get(where_column) != where_value {
                continue;
            }
            for column in &columns {
                row.set(*column, record.get(*column))?;
            }
            changed += 1;
        }
        Ok(if changed > 0 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::NoMatch
        })
    }

    fn delete(&self, id: i64) -> Result<WriteOutcome, StoreError> {
        let id = check_row_id(id)?;
        let mut table = self.lock()?;
        Ok(match table.rows.remove(&id) {
            Some(_) => WriteOutcome::Applied,
            None => WriteOutcome::NoMatch,
        })
    }

    fn upsert_owned(
        &self,
        record: &R,
        fields: &[R::Column],
        owner: R::Column,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut normalized = normalize_insert(record, fields)?;

        let update_columns: Vec<R::Column> = writable_columns::<R>(fields)
            .into_iter()
            .filter(|column| *column != owner && !R::NATURAL_KEY.contains(column))
            .collect();

        let outcome = {
            let mut table = self.lock()?;
            let existing = table
                .rows
                .iter()
                .find(|(_, row)| same_natural_key(*row, &normalized))
                .map(|(id, _)| *id);
            match existing.and_then(|id| table.rows.get_mut(&id).map(|row| (id, row))) {
                Some((_, row)) if row.get(owner) != normalized.get(owner) => {
                    UpsertOutcome::OwnerMismatch
                }
                Some((id, row)) => {
                    for column in &update_columns {
                        row.set(*column, normalized.get(*column))?;
                    }
                    UpsertOutcome::Updated(id)
                }
                None => {
                    self.observers.before_insert(&normalized);
                    let id = table.next_id;
                    table.next_id += 1;
                    normalized.set(R::PRIMARY_KEY, Scalar::Integer(id))?;
                    table.rows.insert(id, normalized.clone());
                    UpsertOutcome::Inserted(id)
                }
            }
        };

        if let UpsertOutcome::Inserted(id) = outcome {
            self.observers.after_insert(id, &normalized);
        }
        Ok(outcome)
    }

    fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(name.trim() == R::TABLE)
    }
}
