use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use teamdesk_chat::{CommandRegistry, InteractionKind};
use teamdesk_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    registry: Arc<CommandRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub commands: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, registry: Arc<CommandRegistry>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, registry })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let commands = commands_check(&state.registry);
    let ready = database.status == "ready" && commands.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        commands,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn commands_check(registry: &CommandRegistry) -> HealthCheck {
    match registry.len(InteractionKind::Command) {
        0 => HealthCheck { status: "degraded", detail: "no commands registered".to_string() },
        count => HealthCheck { status: "ready", detail: format!("{count} commands registered") },
    }
}
