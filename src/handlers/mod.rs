pub mod payments;
pub mod webhook;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_pool: Option<DbPoolStats>,
}

#[derive(Debug, Serialize)]
pub struct DbPoolStats {
    pub active_connections: u32,
    pub idle_connections: usize,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (database, db_pool) = match &state.db {
        Some(pool) => {
            let reachable = sqlx::query("SELECT 1").execute(pool).await.is_ok();
            let stats = DbPoolStats {
                active_connections: pool.size(),
                idle_connections: pool.num_idle(),
            };
            (
                if reachable { "healthy" } else { "unhealthy" },
                Some(stats),
            )
        }
        None => ("not_configured", None),
    };

    let status = if database == "unhealthy" {
        "unhealthy"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        db_pool,
    })
}
