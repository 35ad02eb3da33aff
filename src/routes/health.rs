use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{connection::SimpleConnection, result::Error as DieselError};
use serde_json::{json, Value};
use tracing::warn;

use crate::state::AppState;

/// Liveness plus a database round trip; a broken pool reports 503.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = state
        .pool
        .get()
        .map_err(|err| err.to_string())
        .and_then(|mut conn| {
            conn.batch_execute("SELECT 1")
                .map_err(|err: DieselError| err.to_string())
        });

    match database {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "ok" })),
        ),
        Err(err) => {
            warn!(error = %err, "health check could not reach the database");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unavailable" })),
            )
        }
    }
}
