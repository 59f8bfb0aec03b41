use crate::proxy::ProxyEngine;
use actix_web::{web, HttpRequest};
use std::sync::Arc;

/// Binds the proxy engine to a catch-all resource.
///
/// The `/{tail:.*}` pattern forwards every path to the engine, which does
/// its own matching against the routing table. Payloads are buffered with a
/// 1MB cap before entering the filter chain.
pub fn configure_proxy(cfg: &mut web::ServiceConfig, engine: Arc<ProxyEngine>) {
    cfg.app_data(web::PayloadConfig::new(1024 * 1024))
        .service(
            web::resource("/{tail:.*}").to(move |req: HttpRequest, body: web::Bytes| {
                let engine = engine.clone();
                async move { engine.handle_request(req, body).await }
            }),
        );
}
