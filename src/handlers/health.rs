use crate::{errors::ServiceError, AppState};
use axum::{extract::State, Json};
use serde_json::{json, Value};

/// Liveness plus a database round-trip.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, ServiceError> {
    state.db.ping().await.map_err(ServiceError::db_error)?;
    Ok(Json(json!({ "status": "ok" })))
}
