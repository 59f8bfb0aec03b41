use crate::routing::table::TableHolder;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use std::sync::Arc;

/// General health endpoint: service status, version, and the routing table
/// generation currently serving traffic.
pub async fn health_check(holder: web::Data<Arc<TableHolder>>) -> Result<HttpResponse> {
    let table = holder.load();
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "table_version": table.version,
        "routes": table.matcher.len(),
    })))
}

/// Readiness probe: ready once a routing table has been installed. Until
/// the first ingest completes the gateway would answer every request with
/// 404, so it reports not-ready instead.
pub async fn readiness_check(holder: web::Data<Arc<TableHolder>>) -> Result<HttpResponse> {
    let table = holder.load();
    if table.version == 0 {
        return Ok(HttpResponse::ServiceUnavailable().json(json!({
            "status": "waiting_for_routes",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })));
    }
    Ok(HttpResponse::Ok().json(json!({
        "status": "ready",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Liveness probe: the process is up and serving.
pub async fn liveness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Registers `/health`, `/health/ready`, and `/health/live`.
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/health/ready", web::get().to(readiness_check))
        .route("/health/live", web::get().to(liveness_check));
}
