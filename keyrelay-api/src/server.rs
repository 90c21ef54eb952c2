//! # Control server
//!
//! HTTP surface for admin UIs, built with axum.
//!
//! | route | |
//! |---|---|
//! | `POST /api/restore` | start a restore; body `{"licenses": [...], "wipe": bool}` |
//! | `POST /api/restore/parse` | parse raw backup text into records |
//! | `GET /api/restore/status` | current [`RestoreSnapshot`] |
//! | `POST /api/restore/stop` | request a stop |
//! | `GET /api/licenses` | list licenses |
//! | `GET /api/users` | list users |
//! | `GET /api/backup` | export a [`BackupDocument`] |
//!
//! Errors are returned as `{"error": "..."}` with a status derived from the
//! [`KeyRelayError`] variant.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{client::KeyRelayClient, prelude::*};

/// Shared state of the control server
#[derive(Debug, Clone)]
pub struct AppState {
    pub client: KeyRelayClient,
    pub engine: RestoreEngine<KeyRelayClient>,
    pub parser: BackupParser,
}

impl AppState {
    pub fn new(client: KeyRelayClient, restore_config: RestoreConfig) -> Self {
        let parser = client.backup_parser();
        let engine = RestoreEngine::new(client.clone(), restore_config);
        Self {
            client,
            engine,
            parser,
        }
    }
}

/// Error response wrapper
#[derive(Debug)]
pub struct ApiError(pub KeyRelayError);

impl From<KeyRelayError> for ApiError {
    fn from(err: KeyRelayError) -> Self {
        Self(err)
    }
}

/// HTTP status for an error
pub fn error_status(err: &KeyRelayError) -> StatusCode {
    match err {
        KeyRelayError::InvalidInput { .. } | KeyRelayError::Validation { .. } => {
            StatusCode::BAD_REQUEST
        }
        KeyRelayError::AlreadyInProgress => StatusCode::CONFLICT,
        KeyRelayError::Transport { .. }
        | KeyRelayError::Decode { .. }
        | KeyRelayError::UpstreamRejection { .. } => StatusCode::BAD_GATEWAY,
        KeyRelayError::Serialization { .. } | KeyRelayError::Other { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_status(&self.0);
        warn!(%status, error = %self.0, "request failed");
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct ParseResponse {
    format: BackupFormat,
    count: usize,
    licenses: Vec<LicenseRecord>,
}

async fn start_restore(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<RestoreAck>)> {
    let request = RestoreRequest::from_json(&body)?;
    let ack = state.engine.start(request)?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn parse_backup(State(state): State<AppState>, body: String) -> Json<ParseResponse> {
    let (licenses, format) = state.parser.parse(&body);
    debug!(%format, count = licenses.len(), "parsed backup upload");
    Json(ParseResponse {
        format,
        count: licenses.len(),
        licenses,
    })
}

async fn restore_status(State(state): State<AppState>) -> Json<RestoreSnapshot> {
    Json(state.engine.reporter().snapshot())
}

async fn stop_restore(State(state): State<AppState>) -> Json<StopAck> {
    Json(state.engine.reporter().request_stop())
}

async fn list_licenses(State(state): State<AppState>) -> ApiResult<Json<Vec<License>>> {
    Ok(Json(state.client.licenses().list().await?))
}

async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.client.users().list().await?))
}

async fn export_backup(State(state): State<AppState>) -> ApiResult<Json<BackupDocument>> {
    Ok(Json(state.client.export_backup().await?))
}

/// Build the control router with the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/restore", post(start_restore))
        .route("/api/restore/parse", post(parse_backup))
        .route("/api/restore/status", get(restore_status))
        .route("/api/restore/stop", post(stop_restore))
        .route("/api/licenses", get(list_licenses))
        .route("/api/users", get(list_users))
        .route("/api/backup", get(export_backup))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            error_status(&KeyRelayError::AlreadyInProgress),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&KeyRelayError::InvalidInput {
                message: "empty".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&KeyRelayError::UpstreamRejection {
                operation: "fetchallkeys".into(),
                message: "Invalid seller key".into()
            }),
            StatusCode::BAD_GATEWAY
        );
    }
}
