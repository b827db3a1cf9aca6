use crate::database::models::{ChecklistColumn, ChecklistState, CHECKED_FALSE, CHECKED_TRUE};
use crate::database::store::{InsertObserver, RecordStore, Scalar, StoreError, UpsertOutcome};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Columns written when a state record is first created.
const TOGGLE_FIELDS: &[ChecklistColumn] = &[
    ChecklistColumn::UserId,
    ChecklistColumn::PostId,
    ChecklistColumn::BlogId,
    ChecklistColumn::Field,
    ChecklistColumn::Checked,
];

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("toggle request is missing a user, post or field")]
    Invalid,
    #[error("checklist item is owned by another user")]
    NotOwner,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Created(i64),
    Updated(i64),
}

impl ToggleOutcome {
    pub fn id(self) -> i64 {
        match self {
            ToggleOutcome::Created(id) | ToggleOutcome::Updated(id) => id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToggleRequest {
    pub user_id: i64,
    pub post_id: i64,
    pub blog_id: i64,
    pub field: String,
    pub checked: String,
}

/// Owns the lifecycle of per-item checked state: the first user to toggle an
/// item on a post becomes its owner and is the only one allowed to change it.
#[derive(Clone)]
pub struct ChecklistService<S> {
    store: S,
}

impl<S: RecordStore<ChecklistState>> ChecklistService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn toggle(&self, request: &ToggleRequest) -> Result<ToggleOutcome, ToggleError> {
        let field = sanitize_key(&request.field);
        if request.user_id <= 0 || request.post_id <= 0 || field.is_empty() {
            return Err(ToggleError::Invalid);
        }

        let record = ChecklistState {
            id: 0,
            user_id: request.user_id,
            post_id: request.post_id,
            blog_id: request.blog_id,
            field,
            checked: normalize_checked(&request.checked).to_string(),
            created_at: String::new(),
        };

        let outcome = match self
            .store
            .upsert_owned(&record, TOGGLE_FIELDS, ChecklistColumn::UserId)?
        {
            UpsertOutcome::Inserted(id) => ToggleOutcome::Created(id),
            UpsertOutcome::Updated(id) => ToggleOutcome::Updated(id),
            UpsertOutcome::OwnerMismatch => {
                tracing::debug!(
                    post_id = record.post_id,
                    blog_id = record.blog_id,
                    field = %record.field,
                    "toggle rejected: item owned by another user"
                );
                return Err(ToggleError::NotOwner);
            }
        };
        tracing::debug!(
            post_id = record.post_id,
            blog_id = record.blog_id,
            field = %record.field,
            checked = %record.checked,
            outcome = ?outcome,
            "checklist item toggled"
        );
        Ok(outcome)
    }

    /// Whether `field` on `post_id` is stored as checked. Used when rendering.
    /// `field` is keyed the same way `toggle` stores it.
    pub fn is_checked(&self, post_id: i64, field: &str) -> Result<bool, StoreError> {
        let found = self.store.find_matching(&[
            (ChecklistColumn::PostId, Scalar::Integer(post_id)),
            (ChecklistColumn::Field, Scalar::from(sanitize_key(field))),
            (ChecklistColumn::Checked, Scalar::from(CHECKED_TRUE)),
        ])?;
        Ok(found.is_some())
    }

    pub fn state(
        &self,
        post_id: i64,
        blog_id: i64,
        field: &str,
    ) -> Result<Option<ChecklistState>, StoreError> {
        self.store.find_matching(&[
            (ChecklistColumn::PostId, Scalar::Integer(post_id)),
            (ChecklistColumn::BlogId, Scalar::Integer(blog_id)),
            (ChecklistColumn::Field, Scalar::from(sanitize_key(field))),
        ])
    }
}

/// Maps loosely typed checkbox values onto `"true"` / `"false"`.
pub fn normalize_checked(raw: &str) -> &'static str {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => CHECKED_TRUE,
        _ => CHECKED_FALSE,
    }
}

/// Lower-cases `raw` and strips everything outside `[a-z0-9_-]`.
pub fn sanitize_key(raw: &str) -> String {
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();
    let pattern = DISALLOWED.get_or_init(|| Regex::new(r"[^a-z0-9_\-]").expect("valid key regex"));
    pattern
        .replace_all(&raw.to_ascii_lowercase(), "")
        .into_owned()
}

/// Logs every newly created state record.
pub struct AuditObserver;

impl InsertObserver<ChecklistState> for AuditObserver {
    fn after_insert(&self, id: i64, record: &ChecklistState) {
        tracing::info!(
            id,
            post_id = record.post_id,
            blog_id = record.blog_id,
            field = %record.field,
            checked = %record.checked,
            "checklist state created"
        );
    }
}
