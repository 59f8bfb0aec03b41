//! Filter pipeline execution order: request side forward, response side in
//! reverse over exactly the filters that ran, serve short-circuits, and
//! loopback chaining.

use actix_web::http::StatusCode;
use actix_web::test::TestRequest;
use actix_web::web::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trellis_rs::eskip::args::expect_string;
use trellis_rs::eskip::ArgValue;
use trellis_rs::filters::{Filter, FilterContext, FilterRegistry, FilterSpec};
use trellis_rs::models::error::ConfigError;
use trellis_rs::models::exchange::GatewayResponse;
use trellis_rs::predicates::PredicateRegistry;
use trellis_rs::proxy::{ProxyEngine, ProxySettings};
use trellis_rs::routing::builder::Registries;
use trellis_rs::routing::data_client::StaticDataClient;
use trellis_rs::routing::manager::{RoutingSettings, RoutingTableManager};
use trellis_rs::routing::table::{RoutingTable, TableHolder};
use trellis_rs::services::endpoint_registry::{EndpointRegistry, PassiveHealthSettings};
use trellis_rs::services::load_balancer::LbOptions;

/// Test filter appending its label to a shared log on both sides.
struct RecordFilter {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl Filter for RecordFilter {
    fn on_request(&self, _ctx: &mut FilterContext) {
        self.log
            .lock()
            .unwrap()
            .push(format!("req:{}", self.label));
    }

    fn on_response(&self, _ctx: &mut FilterContext) {
        self.log
            .lock()
            .unwrap()
            .push(format!("resp:{}", self.label));
    }
}

struct RecordSpec {
    log: Arc<Mutex<Vec<String>>>,
}

impl FilterSpec for RecordSpec {
    fn name(&self) -> &'static str {
        "record"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        Ok(Arc::new(RecordFilter {
            label: expect_string(self.name(), args, 0)?.to_string(),
            log: self.log.clone(),
        }))
    }
}

/// Test filter serving a 204 immediately.
struct ServeNowFilter;

impl Filter for ServeNowFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        ctx.serve(GatewayResponse::new(StatusCode::NO_CONTENT));
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct ServeNowSpec;

impl FilterSpec for ServeNowSpec {
    fn name(&self) -> &'static str {
        "serveNow"
    }

    fn create(&self, _args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        Ok(Arc::new(ServeNowFilter))
    }
}

struct Harness {
    engine: Arc<ProxyEngine>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new(routes: &str) -> Self {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut filters = FilterRegistry::with_builtins();
        filters.register(Arc::new(RecordSpec { log: log.clone() }));
        filters.register(Arc::new(ServeNowSpec));
        let registries = Arc::new(Registries::new(
            PredicateRegistry::with_builtins(),
            filters,
        ));

        let client = Arc::new(StaticDataClient::new(Vec::new()));
        client.set_eskip(routes).unwrap();
        let registry = Arc::new(EndpointRegistry::new(
            PassiveHealthSettings::default(),
            Duration::from_secs(60),
        ));
        let holder = Arc::new(TableHolder::new(RoutingTable::empty(registry.clone())));
        let manager = RoutingTableManager::new(
            vec![client],
            registries,
            holder.clone(),
            registry,
            RoutingSettings {
                drain_grace: Duration::ZERO,
                ..RoutingSettings::default()
            },
            LbOptions::default(),
        );
        assert!(manager.rebuild_now() > 0, "no routes installed");

        Self {
            engine: Arc::new(ProxyEngine::new(holder, ProxySettings::default())),
            log,
        }
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[actix_web::test]
async fn request_side_forward_response_side_reverse() {
    let harness = Harness::new(
        r#"r: * -> record("a") -> record("b") -> record("c") -> status(200) -> <shunt>;"#,
    );
    let req = TestRequest::with_uri("/x").to_http_request();
    let resp = harness.engine.handle_request(req, Bytes::new()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        harness.entries(),
        vec!["req:a", "req:b", "req:c", "resp:c", "resp:b", "resp:a"]
    );
}

#[actix_web::test]
async fn serve_runs_only_entered_filters_in_reverse() {
    let harness = Harness::new(
        r#"r: * -> record("a") -> serveNow() -> record("never") -> "http://127.0.0.1:9";"#,
    );
    let req = TestRequest::with_uri("/x").to_http_request();
    let resp = harness.engine.handle_request(req, Bytes::new()).await;
    // Served by the filter: no backend call, 204 passes through.
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(harness.entries(), vec!["req:a", "resp:a"]);
}

#[actix_web::test]
async fn loopback_runs_both_chains_and_unwinds_through_all_entered() {
    let harness = Harness::new(
        r#"
        start: Path("/start") -> record("first") -> setPath("/second") -> <loopback>;
        second: Path("/second") -> record("second") -> status(201) -> <shunt>;
        "#,
    );
    let req = TestRequest::with_uri("/start").to_http_request();
    let resp = harness.engine.handle_request(req, Bytes::new()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(
        harness.entries(),
        vec!["req:first", "req:second", "resp:second", "resp:first"]
    );
}

#[actix_web::test]
async fn response_filters_cover_error_responses() {
    let harness = Harness::new(
        r#"miss: Path("/somewhere-else") -> record("never") -> <shunt>;
           hit: Path("/x") -> record("ran") -> setPath("/nowhere") -> <loopback>;"#,
    );
    let req = TestRequest::with_uri("/x").to_http_request();
    let resp = harness.engine.handle_request(req, Bytes::new()).await;
    // The rewritten request matches nothing: a 404 is built and the entered
    // filter still unwinds over it.
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(harness.entries(), vec!["req:ran", "resp:ran"]);
}
