//! Live table replacement: a request in flight keeps the table it started
//! with, later requests see the new one, and the swap is driven by the
//! manager pipeline.

use actix_web::http::StatusCode;
use actix_web::test::TestRequest;
use actix_web::web::Bytes;
use std::sync::Arc;
use std::time::Duration;
use trellis_rs::proxy::{ProxyEngine, ProxySettings};
use trellis_rs::routing::builder::Registries;
use trellis_rs::routing::data_client::StaticDataClient;
use trellis_rs::routing::manager::{RoutingSettings, RoutingTableManager};
use trellis_rs::routing::table::{RoutingTable, TableHolder};
use trellis_rs::services::endpoint_registry::{EndpointRegistry, PassiveHealthSettings};
use trellis_rs::services::load_balancer::LbOptions;

struct Harness {
    engine: Arc<ProxyEngine>,
    manager: Arc<RoutingTableManager>,
    client: Arc<StaticDataClient>,
    holder: Arc<TableHolder>,
}

fn harness(routes: &str) -> Harness {
    let client = Arc::new(StaticDataClient::new(Vec::new()));
    client.set_eskip(routes).unwrap();
    let registry = Arc::new(EndpointRegistry::new(
        PassiveHealthSettings::default(),
        Duration::from_secs(60),
    ));
    let holder = Arc::new(TableHolder::new(RoutingTable::empty(registry.clone())));
    let manager = Arc::new(RoutingTableManager::new(
        vec![client.clone()],
        Arc::new(Registries::with_builtins()),
        holder.clone(),
        registry,
        RoutingSettings {
            drain_grace: Duration::ZERO,
            ..RoutingSettings::default()
        },
        LbOptions::default(),
    ));
    manager.rebuild_now();
    Harness {
        engine: Arc::new(ProxyEngine::new(holder.clone(), ProxySettings::default())),
        manager,
        client,
        holder,
    }
}

fn request_status(engine: Arc<ProxyEngine>, path: String) -> StatusCode {
    // Own thread, own runtime: HttpRequest is not Send, so the whole
    // exchange stays on this thread.
    std::thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async move {
                let req = TestRequest::with_uri(&path).to_http_request();
                engine.handle_request(req, Bytes::new()).await.status()
            })
    })
    .join()
    .unwrap()
}

#[test]
fn s6_in_flight_requests_complete_on_the_old_table() {
    let harness = harness(r#"slow: Path("/slow") -> latency(200) -> status(200) -> <shunt>;"#);
    assert_eq!(harness.holder.load().version, 1);

    // Start the slow request, then replace the table while its filter
    // chain is sleeping.
    let engine = harness.engine.clone();
    let in_flight = std::thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async move {
                let req = TestRequest::with_uri("/slow").to_http_request();
                engine.handle_request(req, Bytes::new()).await.status()
            })
    });
    std::thread::sleep(Duration::from_millis(60));
    harness
        .client
        .set_eskip(r#"other: Path("/other") -> status(200) -> <shunt>;"#)
        .unwrap();
    harness.manager.rebuild_now();
    assert_eq!(harness.holder.load().version, 2);

    // The in-flight request still completes against the old table.
    assert_eq!(in_flight.join().unwrap(), StatusCode::OK);

    // New requests see the new table: the slow route is gone.
    assert_eq!(
        request_status(harness.engine.clone(), "/slow".to_string()),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        request_status(harness.engine.clone(), "/other".to_string()),
        StatusCode::OK
    );
}

#[test]
fn repeated_swaps_advance_the_version_monotonically() {
    let harness = harness("a: * -> <shunt>;");
    for expected in 2..6 {
        harness.client.set_eskip("a: * -> <shunt>;").unwrap();
        harness.manager.rebuild_now();
        assert_eq!(harness.holder.load().version, expected);
    }
}
