//! Trellis gateway server.
//!
//! Binary entry point wiring the trellis-rs routing engine into an
//! actix-web server: logger, settings, route data clients, the routing
//! table manager, endpoint maintenance, and the HTTP surface (health,
//! metrics, admission webhook, and the catch-all proxy resource).

use trellis_rs::config::settings::load_settings;
use trellis_rs::config::validation::ConfigValidator;
use trellis_rs::logs::logger::configure_logger;
use trellis_rs::models::settings::Settings;
use trellis_rs::proxy::{ProxyEngine, ProxySettings};
use trellis_rs::routes::{admission, health, metrics, proxy};
use trellis_rs::routing::builder::Registries;
use trellis_rs::routing::data_client::{DataClient, FileDataClient, StaticDataClient};
use trellis_rs::routing::manager::{DefaultFiltersProcessor, RoutingSettings, RoutingTableManager};
use trellis_rs::routing::table::{RoutingTable, TableHolder};
use trellis_rs::services::circuit_breaker::BreakerSettings;
use trellis_rs::services::endpoint_registry::EndpointRegistry;
use trellis_rs::services::load_balancer::LbOptions;
use trellis_rs::services::ratelimit::RatelimitRegistry;

use actix_web::{middleware::Logger, App, HttpServer};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let config: Settings = load_settings().expect("Failed to load settings");

    info!("Starting trellis-gateway v{}", env!("CARGO_PKG_VERSION"));

    let validation_result = ConfigValidator::validate_comprehensive(&config);
    for warning in &validation_result.warnings {
        log::warn!("config: {}", warning);
    }
    if !validation_result.is_valid {
        error!("Configuration validation failed:");
        for error in &validation_result.errors {
            error!("  - {}", error);
        }
        std::process::exit(1);
    }
    info!(
        "Configuration validated with {} warnings",
        validation_result.warnings.len()
    );

    // Spec registries, shared by the table manager and the admission
    // webhook. Rate limiting filters share one limiter registry.
    let ratelimits = Arc::new(RatelimitRegistry::new());
    let registries = Arc::new(Registries::new(
        trellis_rs::predicates::PredicateRegistry::with_builtins(),
        trellis_rs::filters::FilterRegistry::with_builtins_using(ratelimits),
    ));

    let endpoint_registry = Arc::new(EndpointRegistry::new(
        config.passive_health.to_runtime(),
        Duration::from_secs(config.last_seen_timeout_secs),
    ));
    let _maintenance = endpoint_registry.spawn_maintenance();

    let holder = Arc::new(TableHolder::new(RoutingTable::empty(
        endpoint_registry.clone(),
    )));

    // Route sources: the definitions file, plus inline routes if present.
    let mut clients: Vec<Arc<dyn DataClient>> = Vec::new();
    if let Some(path) = &config.routes_file {
        clients.push(Arc::new(FileDataClient::new(path)));
    }
    if let Some(routes) = &config.routes {
        let inline = Arc::new(StaticDataClient::new(Vec::new()));
        inline
            .set_eskip(routes)
            .expect("inline routes validated above");
        clients.push(inline);
    }

    let mut manager = RoutingTableManager::new(
        clients,
        registries.clone(),
        holder.clone(),
        endpoint_registry.clone(),
        RoutingSettings {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            drain_grace: Duration::from_secs(config.drain_grace_secs),
            default_route_id: config.default_route_id.clone(),
        },
        LbOptions {
            consistent_hash_balance_factor: config.consistent_hash_balance_factor,
        },
    );
    if !config.default_filters.is_empty() {
        let processor = DefaultFiltersProcessor::from_settings(&config.default_filters)
            .expect("default filters validated above");
        manager.add_pre_processor(Arc::new(processor));
    }
    let manager = Arc::new(manager);

    // Install the first table before accepting traffic, then keep polling.
    let installed = manager.rebuild_now();
    info!("initial routing table holds {} routes", installed);
    let _refresh = manager.clone().run();

    let engine = Arc::new(ProxyEngine::new(
        holder.clone(),
        ProxySettings {
            timeout: Duration::from_secs(config.timeout_secs),
            flow_id: config.flow_id,
            fail_open: config.fail_open,
            fade_in: config.fade_in.to_runtime(),
            breaker: config.breaker.as_ref().map(|b| BreakerSettings {
                failure_threshold: b.failure_threshold,
                success_threshold: b.success_threshold,
                reset_timeout: Duration::from_secs(b.reset_timeout_secs),
                window: b.window,
            }),
        },
    ));
    let proxy_metrics = engine.metrics();
    let filter_metrics = engine.filter_metrics();

    let host = std::env::var("TRELLIS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("TRELLIS_PORT")
        .unwrap_or_else(|_| "9090".to_string())
        .parse::<u16>()
        .unwrap_or(9090);

    info!("Starting server on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(actix_web::web::Data::new(holder.clone()))
            .app_data(actix_web::web::Data::new(manager.clone()))
            .app_data(actix_web::web::Data::new(registries.clone()))
            .app_data(actix_web::web::Data::new(proxy_metrics.clone()))
            .app_data(actix_web::web::Data::new(filter_metrics.clone()))
            .wrap(Logger::new(
                r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#,
            ))
            .configure(health::configure_health)
            .configure(metrics::configure_metrics)
            .configure(admission::configure_admission)
            .configure(|cfg| proxy::configure_proxy(cfg, engine.clone()))
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
