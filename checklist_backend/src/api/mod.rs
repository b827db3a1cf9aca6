mod checklist;

use crate::checklist::{AuditObserver, ChecklistService};
use crate::config::ChecklistConfig;
use crate::database::models::ChecklistState;
use crate::database::store::{InsertObserver, Observers, SqliteRecordStore};
use crate::database::Database;
use crate::nonce::NonceIssuer;
use anyhow::Result;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Header through which the host hands over the authenticated user id.
pub const USER_HEADER: &str = "x-checklist-user";

pub type ChecklistStore = SqliteRecordStore<ChecklistState>;

#[derive(Clone)]
pub struct AppState {
    pub config: ChecklistConfig,
    pub database: Database,
    pub checklist: ChecklistService<ChecklistStore>,
    pub nonces: NonceIssuer,
}

impl AppState {
    pub fn new(config: ChecklistConfig, database: Database) -> Self {
        let observers = Observers::new(vec![
            Arc::new(AuditObserver) as Arc<dyn InsertObserver<ChecklistState>>
        ]);
        let store = SqliteRecordStore::with_observers(database.clone(), observers);
        let nonces = NonceIssuer::new(&config.nonce);
        Self {
            config,
            database,
            checklist: ChecklistService::new(store),
            nonces,
        }
    }
}

/// Every failure reaches the client as the same bare acknowledgement; the
/// variant only picks the status code.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    Forbidden(&'static str),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(reason) => {
                tracing::debug!(reason, "rejected request");
                StatusCode::BAD_REQUEST
            }
            ApiError::Forbidden(reason) => {
                tracing::warn!(reason, "forbidden request");
                StatusCode::FORBIDDEN
            }
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "internal server error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(Ack { success: false })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Ack {
    success: bool,
}

pub(crate) fn current_user(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(checklist::health_handler))
        .route("/checklist/toggle", post(checklist::toggle_handler))
        .route("/checklist/fields", post(checklist::fields_handler))
        .route("/checklist/render", post(checklist::render_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Tries to bind to the given port, or finds the next available port
async fn find_available_port(start_port: u16) -> Result<(TcpListener, u16)> {
    const MAX_PORT_ATTEMPTS: u16 = 100;

    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port.saturating_add(offset);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) => {
                if offset == 0 {
                    tracing::debug!(port, error = %e, "Port in use, trying next port");
                }
                continue;
            }
        }
    }

    anyhow::bail!(
        "Could not find available port in range {}-{}",
        start_port,
        start_port.saturating_add(MAX_PORT_ATTEMPTS - 1)
    )
}

pub async fn serve_http(config: ChecklistConfig, database: Database) -> Result<()> {
    let requested_port = config.api_port;
    let router = router(AppState::new(config, database));

    let (listener, actual_port) = find_available_port(requested_port).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], actual_port));

    if actual_port != requested_port {
        tracing::warn!(
            requested_port,
            actual_port,
            "Configured port was in use, bound to next available port"
        );
    }

    tracing::info!(?addr, "HTTP server listening");
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}
