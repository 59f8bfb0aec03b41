use crate::filters::FilterMetrics;
use crate::proxy::ProxyMetrics;
use crate::routing::manager::RoutingTableManager;
use crate::routing::table::TableHolder;
use actix_web::{web, HttpResponse, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Metrics snapshot as a flat JSON object.
///
/// Per-endpoint keys follow the `endpoint.<host:port>.<counter>` scheme:
/// `requests` and `failed` count the current health window, `inflight` and
/// `drop_probability` are gauges. Invalid-route counters appear as
/// `routes.invalid.<reason>`.
pub async fn metrics_snapshot(
    holder: web::Data<Arc<TableHolder>>,
    manager: web::Data<Arc<RoutingTableManager>>,
    proxy_metrics: web::Data<Arc<ProxyMetrics>>,
    filter_metrics: web::Data<Arc<FilterMetrics>>,
) -> Result<HttpResponse> {
    let table = holder.load();
    let mut out = Map::new();

    out.insert("table.version".to_string(), json!(table.version));
    out.insert("table.routes".to_string(), json!(table.matcher.len()));

    for (key, value) in proxy_metrics.snapshot() {
        out.insert(key.to_string(), json!(value));
    }
    for (key, value) in filter_metrics.snapshot() {
        out.insert(key, json!(value));
    }
    for (reason, count) in manager.invalid_counts() {
        out.insert(format!("routes.invalid.{}", reason), json!(count));
    }
    for (endpoint, metrics) in table.registry.snapshot() {
        out.insert(
            format!("endpoint.{}.requests", endpoint),
            json!(metrics.requests),
        );
        out.insert(
            format!("endpoint.{}.failed", endpoint),
            json!(metrics.failed),
        );
        out.insert(
            format!("endpoint.{}.inflight", endpoint),
            json!(metrics.inflight),
        );
        out.insert(
            format!("endpoint.{}.drop_probability", endpoint),
            json!(metrics.drop_probability),
        );
    }

    Ok(HttpResponse::Ok().json(Value::Object(out)))
}

/// Registers `/metrics`.
pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_snapshot));
}
