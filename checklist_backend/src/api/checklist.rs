use super::{current_user, Ack, ApiError, AppState};
use crate::checklist::{normalize_checked, sanitize_key, ToggleError, ToggleRequest};
use crate::nonce::TOGGLE_ACTION;
use crate::render::{render_checklist, ChecklistBlock};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Html;
use axum::{Form, Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    blog_id: i64,
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        blog_id: state.config.blog_id,
    })
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ToggleForm {
    #[serde(default)]
    post_id: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    checked: Option<String>,
    #[serde(default)]
    nonce: String,
}

/// Absolute integer value of `raw`, or 0 when it does not parse.
fn parse_post_id(raw: &str) -> i64 {
    raw.trim()
        .parse::<i64>()
        .map(|id| id.saturating_abs())
        .unwrap_or(0)
}

pub(crate) async fn toggle_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ToggleForm>,
) -> Result<Json<Ack>, ApiError> {
    let Some(user_id) = current_user(&headers) else {
        return Err(ApiError::Forbidden("anonymous toggle"));
    };
    if !state.nonces.verify(&form.nonce, TOGGLE_ACTION, user_id) {
        return Err(ApiError::Forbidden("invalid nonce"));
    }

    let request = ToggleRequest {
        user_id,
        post_id: parse_post_id(&form.post_id),
        blog_id: state.config.blog_id,
        field: sanitize_key(&form.value),
        checked: normalize_checked(form.checked.as_deref().unwrap_or("false")).to_string(),
    };

    let service = state.checklist.clone();
    let result = tokio::task::spawn_blocking(move || service.toggle(&request))
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    // Validation and ownership failures share one response.
    match result {
        Ok(_) => Ok(Json(Ack { success: true })),
        Err(ToggleError::Invalid) => Err(ApiError::BadRequest("incomplete toggle request")),
        Err(ToggleError::NotOwner) => Err(ApiError::BadRequest("not the item owner")),
        Err(ToggleError::Storage(err)) => Err(ApiError::Internal(err.into())),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FieldsRequest {
    #[serde(default)]
    fields: Vec<String>,
}

pub(crate) async fn fields_handler(
    headers: HeaderMap,
    Json(payload): Json<FieldsRequest>,
) -> Result<Json<&'static str>, ApiError> {
    if current_user(&headers).is_none() {
        return Err(ApiError::Forbidden("anonymous field submission"));
    }
    tracing::debug!(count = payload.fields.len(), "received checklist fields");
    Ok(Json("UUIDs received successfully"))
}

pub(crate) async fn render_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(block): Json<ChecklistBlock>,
) -> Result<Html<String>, ApiError> {
    let nonce = current_user(&headers)
        .map(|user_id| state.nonces.create(TOGGLE_ACTION, user_id))
        .unwrap_or_default();
    let service = state.checklist.clone();
    let markup = tokio::task::spawn_blocking(move || render_checklist(&service, &block, &nonce))
        .await
        .map_err(|err| ApiError::Internal(err.into()))?
        .map_err(|err| ApiError::Internal(err.into()))?;
    Ok(Html(markup))
}
