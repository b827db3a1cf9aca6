use super::{
    check_row_id, coerce_conditions, coerce_lookup, normalize_insert, quote_identifier,
    writable_columns, Column, Observers, Record, RecordStore, Scalar, StoreError, UpsertOutcome,
    WriteOutcome,
};
use crate::database::{table_exists_locked, Database};
use rusqlite::{params, params_from_iter, OptionalExtension, TransactionBehavior};
use std::marker::PhantomData;

/// [`RecordStore`] backed by the shared SQLite connection.
pub struct SqliteRecordStore<R: Record> {
    database: Database,
    observers: Observers<R>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Clone for SqliteRecordStore<R> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            observers: self.observers.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> SqliteRecordStore<R> {
    pub fn new(database: Database) -> Self {
        Self::with_observers(database, Observers::default())
    }

    pub fn with_observers(database: Database, observers: Observers<R>) -> Self {
        Self {
            database,
            observers,
            _record: PhantomData,
        }
    }

    fn table() -> Result<String, StoreError> {
        quote_identifier(R::TABLE)
    }

    fn column(column: R::Column) -> Result<String, StoreError> {
        quote_identifier(column.name())
    }

    /// `"a" = ?{start} AND "b" = ?{start+1} ...`
    fn where_clause(columns: &[R::Column], start: usize) -> Result<String, StoreError> {
        let parts = columns
            .iter()
            .enumerate()
            .map(|(offset, column)| Ok(format!("{} = ?{}", Self::column(*column)?, start + offset)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(parts.join(" AND "))
    }

    fn select_one(&self, column: R::Column, value: Scalar) -> Result<Option<R>, StoreError> {
        let Some(value) = coerce_lookup(column, value) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1 LIMIT 1",
            Self::table()?,
            Self::column(column)?
        );
        let conn = self.database.lock()?;
        let record = conn.query_row(&sql, params![value], R::from_row).optional()?;
        Ok(record)
    }

    fn select_scalar(
        &self,
        column: R::Column,
        where_column: R::Column,
        where_value: Scalar,
    ) -> Result<Option<Scalar>, StoreError> {
        let Some(where_value) = coerce_lookup(where_column, where_value) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
            Self::column(column)?,
            Self::table()?,
            Self::column(where_column)?
        );
        let conn = self.database.lock()?;
        let value = conn
            .query_row(&sql, params![where_value], |row| row.get::<_, Scalar>(0))
            .optional()?;
        Ok(value)
    }
}

impl<R: Record> RecordStore<R> for SqliteRecordStore<R> {
    fn get_one(&self, id: Scalar) -> Result<Option<R>, StoreError> {
        self.select_one(R::PRIMARY_KEY, id)
    }

    fn get_one_by(&self, column: R::Column, value: Scalar) -> Result<Option<R>, StoreError> {
        self.select_one(column, value)
    }

    fn get_scalar(&self, column: R::Column, id: Scalar) -> Result<Option<Scalar>, StoreError> {
        self.select_scalar(column, R::PRIMARY_KEY, id)
    }

    fn get_scalar_by(
        &self,
        column: R::Column,
        where_column: R::Column,
        where_value: Scalar,
    ) -> Result<Option<Scalar>, StoreError> {
        self.select_scalar(column, where_column, where_value)
    }

    fn find_matching(&self, conditions: &[(R::Column, Scalar)]) -> Result<Option<R>, StoreError> {
        let conditions = coerce_conditions::<R>(conditions)?;
        let columns: Vec<R::Column> = conditions.iter().map(|(column, _)| *column).collect();
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY {} ASC LIMIT 1",
            Self::table()?,
            Self::where_clause(&columns, 1)?,
            Self::column(R::PRIMARY_KEY)?
        );
        let conn = self.database.lock()?;
        let record = conn
            .query_row(
                &sql,
                params_from_iter(conditions.iter().map(|(_, value)| value)),
                R::from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn count_matching(&self, conditions: &[(R::Column, Scalar)]) -> Result<usize, StoreError> {
        let conditions = coerce_conditions::<R>(conditions)?;
        let columns: Vec<R::Column> = conditions.iter().map(|(column, _)| *column).collect();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            Self::table()?,
            Self::where_clause(&columns, 1)?
        );
        let conn = self.database.lock()?;
        let count: i64 = conn.query_row(
            &sql,
            params_from_iter(conditions.iter().map(|(_, value)| value)),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn insert(&self, record: &R, fields: &[R::Column]) -> Result<i64, StoreError> {
        let mut normalized = normalize_insert(record, fields)?;
        self.observers.before_insert(&normalized);

        let columns: Vec<R::Column> = writable_columns::<R>(R::COLUMNS);
        let names = columns
            .iter()
            .map(|column| Self::column(*column))
            .collect::<Result<Vec<_>, _>>()?;
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::table()?,
            names.join(", "),
            placeholders.join(", ")
        );
        let values: Vec<Scalar> = columns.iter().map(|column| normalized.get(*column)).collect();

        let id = {
            let conn = self.database.lock()?;
            conn.execute(&sql, params_from_iter(values.iter()))?;
            conn.last_insert_rowid()
        };

        normalized.set(R::PRIMARY_KEY, Scalar::Integer(id))?;
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

        let assignments = columns
            .iter()
            .enumerate()
            .map(|(offset, column)| Ok(format!("{} = ?{}", Self::column(*column)?, offset + 1)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            Self::table()?,
            assignments.join(", "),
            Self::column(where_column)?,
            columns.len() + 1
        );
        let mut values: Vec<Scalar> = columns.iter().map(|column| record.get(*column)).collect();
        values.push(where_value);

        let conn = self.database.lock()?;
        let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(if changed > 0 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::NoMatch
        })
    }

    fn delete(&self, id: i64) -> Result<WriteOutcome, StoreError> {
        let id = check_row_id(id)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            Self::table()?,
            Self::column(R::PRIMARY_KEY)?
        );
        let conn = self.database.lock()?;
        let changed = conn.execute(&sql, params![id])?;
        Ok(if changed > 0 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::NoMatch
        })
    }

    fn upsert_owned(
        &self,
        record: &R,
        fields: &[R::Column],
        owner: R::Column,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut normalized = normalize_insert(record, fields)?;

        let table = Self::table()?;
        let primary_key = Self::column(R::PRIMARY_KEY)?;
        let owner_name = Self::column(owner)?;
        let key_clause = Self::where_clause(R::NATURAL_KEY, 1)?;
        let lookup_sql =
            format!("SELECT {primary_key}, {owner_name} FROM {table} WHERE {key_clause}");
        let key_values: Vec<Scalar> = R::NATURAL_KEY
            .iter()
            .map(|column| normalized.get(*column))
            .collect();

        let insert_columns = writable_columns::<R>(R::COLUMNS);
        let names = insert_columns
            .iter()
            .map(|column| Self::column(*column))
            .collect::<Result<Vec<_>, _>>()?;
        let placeholders: Vec<String> =
            (1..=insert_columns.len()).map(|i| format!("?{i}")).collect();
        let insert_sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING {primary_key}",
            names.join(", "),
            placeholders.join(", ")
        );

        let update_columns: Vec<R::Column> = writable_columns::<R>(fields)
            .into_iter()
            .filter(|column| *column != owner && !R::NATURAL_KEY.contains(column))
            .collect();
        let assignments = update_columns
            .iter()
            .enumerate()
            .map(|(offset, column)| Ok(format!("{} = ?{}", Self::column(*column)?, offset + 1)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let update_sql = format!(
            "UPDATE {table} SET {} WHERE {primary_key} = ?{}",
            assignments.join(", "),
            update_columns.len() + 1
        );

        let outcome = {
            let mut conn = self.database.lock()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing: Option<(i64, Scalar)> = tx
                .query_row(&lookup_sql, params_from_iter(key_values.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()?;
            let outcome = match existing {
                None => {
                    self.observers.before_insert(&normalized);
                    let values: Vec<Scalar> = insert_columns
                        .iter()
                        .map(|column| normalized.get(*column))
                        .collect();
                    let id: i64 =
                        tx.query_row(&insert_sql, params_from_iter(values.iter()), |row| {
                            row.get(0)
                        })?;
                    UpsertOutcome::Inserted(id)
                }
                Some((id, stored_owner)) => {
                    let stored_owner = coerce_lookup(owner, stored_owner);
                    if stored_owner.as_ref() != Some(&normalized.get(owner)) {
                        UpsertOutcome::OwnerMismatch
                    } else {
                        if !update_columns.is_empty() {
                            let mut values: Vec<Scalar> = update_columns
                                .iter()
                                .map(|column| normalized.get(*column))
                                .collect();
                            values.push(Scalar::Integer(id));
                            tx.execute(&update_sql, params_from_iter(values.iter()))?;
                        }
                        UpsertOutcome::Updated(id)
                    }
                }
            };
            tx.commit()?;
            outcome
        };

        if let UpsertOutcome::Inserted(id) = outcome {
            normalized.set(R::PRIMARY_KEY, Scalar::Integer(id))?;
            self.observers.after_insert(id, &normalized);
        }
        Ok(outcome)
    }

    fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.database.lock()?;
        table_exists_locked(&conn, name.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ChecklistColumn, ChecklistState};
    use crate::database::store::InsertObserver;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn setup_store() -> SqliteRecordStore<ChecklistState> {
        let conn = Connection::open_in_memory().expect("in-memory db");
        let db = Database::from_connection(conn, true);
        db.ensure_migrations().expect("migrations");
        SqliteRecordStore::new(db)
    }

    fn state(user_id: i64, post_id: i64, field: &str, checked: &str) -> ChecklistState {
        ChecklistState {
            id: 0,
            user_id,
            post_id,
            blog_id: 1,
            field: field.into(),
            checked: checked.into(),
            created_at: String::new(),
        }
    }

    const ALL_BUT_CREATED: &[ChecklistColumn] = &[
        ChecklistColumn::UserId,
        ChecklistColumn::PostId,
        ChecklistColumn::BlogId,
        ChecklistColumn::Field,
        ChecklistColumn::Checked,
    ];

    #[test]
    fn insert_and_lookup_by_key_and_column() {
        let store = setup_store();
        let id = store
            .insert(&state(5, 7, "abc", "true"), ALL_BUT_CREATED)
            .unwrap();
        assert!(id > 0);

        let fetched = store.get_one(Scalar::Integer(id)).unwrap().expect("row");
        assert_eq!(fetched.user_id, 5);
        assert!(!fetched.created_at.is_empty());

        let by_field = store
            .get_one_by(ChecklistColumn::Field, "abc".into())
            .unwrap()
            .expect("row by field");
        assert_eq!(by_field.id, id);

        assert_eq!(
            store.get_scalar(ChecklistColumn::Checked, id.into()).unwrap(),
            Some(Scalar::Text("true".into()))
        );
        assert_eq!(
            store
                .get_scalar_by(ChecklistColumn::UserId, ChecklistColumn::Field, "abc".into())
                .unwrap(),
            Some(Scalar::Integer(5))
        );
        assert!(store.get_one(Scalar::Integer(id + 1)).unwrap().is_none());
    }

    #[test]
    fn ids_are_monotonic() {
        let store = setup_store();
        let first = store.insert(&state(1, 1, "a", "true"), ALL_BUT_CREATED).unwrap();
        store.delete(first).unwrap();
        let second = store.insert(&state(1, 1, "b", "true"), ALL_BUT_CREATED).unwrap();
        assert!(second > first);
    }

    #[test]
    fn injected_values_are_bound_not_interpolated() {
        let store = setup_store();
        let hostile = "x' OR '1'='1";
        store.insert(&state(1, 1, "safe", "true"), ALL_BUT_CREATED).unwrap();
        assert!(store
            .get_one_by(ChecklistColumn::Field, hostile.into())
            .unwrap()
            .is_none());
        let id = store.insert(&state(1, 1, hostile, "true"), ALL_BUT_CREATED).unwrap();
        let fetched = store.get_one(id.into()).unwrap().unwrap();
        assert_eq!(fetched.field, hostile);
        assert!(store.table_exists("checklist_states").unwrap());
        assert!(!store.table_exists("checklist_states' OR '1'='1").unwrap());
    }

    #[test]
    fn insert_applies_defaults_for_omitted_columns() {
        let store = setup_store();
        let id = store
            .insert(
                &state(5, 7, "abc", "false"),
                &[ChecklistColumn::UserId, ChecklistColumn::PostId, ChecklistColumn::Field],
            )
            .unwrap();
        let fetched = store.get_one(id.into()).unwrap().unwrap();
        assert_eq!(fetched.checked, "true");
        assert_eq!(fetched.blog_id, 0);

        let id = store
            .insert(&state(5, 8, "abc", "false"), ALL_BUT_CREATED)
            .unwrap();
        assert_eq!(store.get_one(id.into()).unwrap().unwrap().checked, "false");
    }

    #[test]
    fn update_writes_only_listed_fields() {
        let store = setup_store();
        let id = store.insert(&state(5, 7, "abc", "true"), ALL_BUT_CREATED).unwrap();

        let outcome = store
            .update(id, &state(99, 42, "zzz", "false"), &[ChecklistColumn::Checked], None)
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);

        let fetched = store.get_one(id.into()).unwrap().unwrap();
        assert_eq!(fetched.checked, "false");
        assert_eq!(fetched.user_id, 5);
        assert_eq!(fetched.post_id, 7);
        assert_eq!(fetched.field, "abc");
    }

    #[test]
    fn update_distinguishes_no_match_from_failure() {
        let store = setup_store();
        let outcome = store
            .update(404, &state(1, 1, "a", "true"), &[ChecklistColumn::Checked], None)
            .unwrap();
        assert_eq!(outcome, WriteOutcome::NoMatch);

        assert!(matches!(
            store.update(0, &state(1, 1, "a", "true"), &[ChecklistColumn::Checked], None),
            Err(StoreError::InvalidId(0))
        ));
        assert!(matches!(
            store.update(-1, &state(1, 1, "a", "true"), &[ChecklistColumn::Checked], None),
            Err(StoreError::InvalidId(-1))
        ));
        assert!(matches!(store.delete(0), Err(StoreError::InvalidId(0))));
        assert!(matches!(
            store.update(1, &state(1, 1, "a", "true"), &[ChecklistColumn::Id], None),
            Err(StoreError::EmptyFields)
        ));
    }

    #[test]
    fn update_can_match_on_another_column() {
        let store = setup_store();
        store.insert(&state(5, 7, "a", "true"), ALL_BUT_CREATED).unwrap();
        store.insert(&state(5, 7, "b", "true"), ALL_BUT_CREATED).unwrap();
        store.insert(&state(6, 8, "c", "true"), ALL_BUT_CREATED).unwrap();

        let outcome = store
            .update(
                7,
                &state(0, 0, "", "false"),
                &[ChecklistColumn::Checked],
                Some(ChecklistColumn::PostId),
            )
            .unwrap();
        assert!(outcome.applied());
        assert_eq!(
            store
                .count_matching(&[(ChecklistColumn::Checked, "false".into())])
                .unwrap(),
            2
        );
    }

    #[test]
    fn find_matching_ands_conditions_and_rejects_empty_sets() {
        let store = setup_store();
        store.insert(&state(5, 7, "abc", "true"), ALL_BUT_CREATED).unwrap();
        store.insert(&state(5, 8, "abc", "false"), ALL_BUT_CREATED).unwrap();

        let found = store
            .find_matching(&[
                (ChecklistColumn::PostId, Scalar::from("8")),
                (ChecklistColumn::Field, "abc".into()),
            ])
            .unwrap()
            .expect("match");
        assert_eq!(found.checked, "false");

        assert!(store
            .find_matching(&[
                (ChecklistColumn::PostId, Scalar::Integer(8)),
                (ChecklistColumn::Checked, "true".into()),
            ])
            .unwrap()
            .is_none());

        assert!(matches!(store.find_matching(&[]), Err(StoreError::EmptyConditions)));
        assert!(matches!(store.count_matching(&[]), Err(StoreError::EmptyConditions)));
    }

    #[test]
    fn duplicate_natural_key_is_reported() {
        let store = setup_store();
        store.insert(&state(5, 7, "abc", "true"), ALL_BUT_CREATED).unwrap();
        assert!(matches!(
            store.insert(&state(6, 7, "abc", "true"), ALL_BUT_CREATED),
            Err(StoreError::DuplicateKey)
        ));
    }

    #[test]
    fn upsert_owned_inserts_updates_and_rejects_foreign_owner() {
        let store = setup_store();
        let first = store
            .upsert_owned(&state(5, 7, "abc", "true"), ALL_BUT_CREATED, ChecklistColumn::UserId)
            .unwrap();
        let UpsertOutcome::Inserted(id) = first else {
            panic!("expected insert, got {first:?}");
        };

        let second = store
            .upsert_owned(&state(5, 7, "abc", "false"), ALL_BUT_CREATED, ChecklistColumn::UserId)
            .unwrap();
        assert_eq!(second, UpsertOutcome::Updated(id));

        let foreign = store
            .upsert_owned(&state(6, 7, "abc", "true"), ALL_BUT_CREATED, ChecklistColumn::UserId)
            .unwrap();
        assert_eq!(foreign, UpsertOutcome::OwnerMismatch);

        let stored = store.get_one(id.into()).unwrap().unwrap();
        assert_eq!(stored.user_id, 5);
        assert_eq!(stored.checked, "false");
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl InsertObserver<ChecklistState> for Recorder {
        fn before_insert(&self, record: &ChecklistState) {
            self.events
                .lock()
                .unwrap()
                .push(format!("before:{}:{}", record.id, record.checked));
        }

        fn after_insert(&self, id: i64, record: &ChecklistState) {
            assert_eq!(id, record.id);
            self.events
                .lock()
                .unwrap()
                .push(format!("after:{}:{}", id, record.checked));
        }
    }

    #[test]
    fn observers_see_normalized_fields() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        let db = Database::from_connection(conn, true);
        db.ensure_migrations().unwrap();
        let recorder = Arc::new(Recorder::default());
        let store = SqliteRecordStore::with_observers(
            db,
            Observers::new(vec![recorder.clone() as Arc<dyn InsertObserver<ChecklistState>>]),
        );

        let id = store
            .insert(&state(5, 7, "abc", "false"), &[ChecklistColumn::Field])
            .unwrap();
        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["before:0:true".to_string(), format!("after:{id}:true")]);
    }

    #[test]
    fn upsert_notifies_observers_only_when_a_row_is_created() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        let db = Database::from_connection(conn, true);
        db.ensure_migrations().unwrap();
        let recorder = Arc::new(Recorder::default());
        let store = SqliteRecordStore::with_observers(
            db,
            Observers::new(vec![recorder.clone() as Arc<dyn InsertObserver<ChecklistState>>]),
        );

        let created = store
            .upsert_owned(&state(5, 7, "abc", "true"), ALL_BUT_CREATED, ChecklistColumn::UserId)
            .unwrap();
        let UpsertOutcome::Inserted(id) = created else {
            panic!("expected insert, got {created:?}");
        };
        store
            .upsert_owned(&state(5, 7, "abc", "false"), ALL_BUT_CREATED, ChecklistColumn::UserId)
            .unwrap();
        store
            .upsert_owned(&state(6, 7, "abc", "true"), ALL_BUT_CREATED, ChecklistColumn::UserId)
            .unwrap();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["before:0:true".to_string(), format!("after:{id}:true")]);
    }

    #[test]
    fn lookups_with_non_numeric_ids_find_nothing() {
        let store = setup_store();
        let id = store.insert(&state(5, 7, "abc", "true"), ALL_BUT_CREATED).unwrap();
        assert!(store.get_one("abc".into()).unwrap().is_none());
        assert!(store
            .get_scalar(ChecklistColumn::Field, "abc".into())
            .unwrap()
            .is_none());
        assert!(store
            .get_one_by(ChecklistColumn::PostId, "seven".into())
            .unwrap()
            .is_none());
        assert_eq!(store.get_one(id.to_string().into()).unwrap().unwrap().id, id);
    }
}
