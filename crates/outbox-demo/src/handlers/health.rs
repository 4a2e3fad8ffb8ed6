//! Health check and readiness endpoints.

use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state: the database pool used by the health checks,
/// independent of the processor's own adapter pool.
pub struct AppState {
    pub db_pool: PgPool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub version: String,
}

/// Liveness: is the process up at all. Does not touch the database.
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        database: "not_checked".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness: is the database reachable, i.e. should this instance receive
/// traffic / keep polling.
pub async fn readiness_check(state: web::Data<Arc<AppState>>) -> impl Responder {
    let db_status = match outbox_postgres::check_health(&state.db_pool).await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };

    let response = HealthResponse {
        status: if db_status == "connected" { "ready" } else { "not_ready" }.to_string(),
        database: db_status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    if db_status == "connected" {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
