//! Admission-style validation webhook.
//!
//! `/routegroups` and `/ingresses` accept a JSON admission review whose
//! object carries route definitions under `spec.routes` (the definition
//! grammar as one string). Validation runs the definitions through the
//! same spec registries a table build uses, without touching the live
//! table, and answers `{allowed, status{message}}`.

use crate::eskip;
use crate::routing::builder::{build_route, Registries};
use actix_web::{web, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct AdmissionReview {
    #[serde(default)]
    pub request: Option<AdmissionRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AdmissionRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub object: serde_json::Value,
}

fn validate_routes(text: &str, registries: &Registries) -> Vec<String> {
    let defs = match eskip::parse(text) {
        Ok(defs) => defs,
        Err(e) => return vec![e.to_string()],
    };
    let mut errors = Vec::new();
    for def in &defs {
        if let Err(e) = build_route(def, registries) {
            errors.push(format!("route {}: {}", def.id, e));
        }
    }
    errors
}

async fn review(
    registries: web::Data<Arc<Registries>>,
    body: web::Json<AdmissionReview>,
) -> Result<HttpResponse> {
    let Some(request) = &body.request else {
        return Ok(HttpResponse::Ok().json(json!({
            "response": {
                "uid": "",
                "allowed": false,
                "status": {"message": "missing admission request"},
            }
        })));
    };

    let routes_text = request
        .object
        .pointer("/spec/routes")
        .and_then(|v| v.as_str());
    let errors = match routes_text {
        Some(text) => validate_routes(text, &registries),
        None => vec!["object has no spec.routes".to_string()],
    };

    let allowed = errors.is_empty();
    Ok(HttpResponse::Ok().json(json!({
        "response": {
            "uid": request.uid,
            "allowed": allowed,
            "status": {"message": if allowed { "ok".to_string() } else { errors.join("; ") }},
        }
    })))
}

/// Registers `/routegroups` and `/ingresses`.
pub fn configure_admission(cfg: &mut web::ServiceConfig) {
    cfg.route("/routegroups", web::post().to(review))
        .route("/ingresses", web::post().to(review));
}
