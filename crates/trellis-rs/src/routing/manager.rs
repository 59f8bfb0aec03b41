//! The routing table manager: ingest, validate, build, swap.
//!
//! One coordinator task owns the whole pipeline, so at most one build is
//! ever in flight and pushed notifications coalesce naturally. Per refresh
//! cycle:
//!
//! 1. collect the current definition set from every data client (full
//!    snapshot on first contact, deltas after that; a failing client keeps
//!    its previous snapshot serving),
//! 2. run the pre-processors over the definitions,
//! 3. validate each definition into a route, dropping and counting the
//!    invalid ones,
//! 4. run the post-processors over the built routes (endpoint registration,
//!    load-balancer binding),
//! 5. compile the matcher and swap the table pointer,
//! 6. close the replaced table's filters after the drain grace period.
//!
//! A build error never affects in-flight traffic; the old table keeps
//! serving until the swap, and the swap is a single pointer store.

use crate::eskip::{parse_filters, NamedArgsDef, ParseError, RouteDef};
use crate::models::route::{Backend, Endpoint, Route};
use crate::routing::builder::{build_route, Registries};
use crate::routing::data_client::DataClient;
use crate::routing::matcher::Matcher;
use crate::routing::table::{RoutingTable, TableHolder};
use crate::services::endpoint_registry::EndpointRegistry;
use crate::services::load_balancer::{LbBinding, LbOptions, LoadBalancerFactory};
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use chrono::Utc;
use log::{info, warn};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

/// Edits the definition set before validation; may add, remove, or rewrite
/// definitions.
pub trait PreProcessor: Send + Sync {
    fn process(&self, defs: Vec<RouteDef>) -> Vec<RouteDef>;
}

/// Annotates the built route list before the matcher is compiled.
pub trait PostProcessor: Send + Sync {
    fn process(&self, routes: &mut Vec<Route>);
}

/// Prepends configured filter chains to every route whose backend resolves
/// to a keyed `host:port` authority.
pub struct DefaultFiltersProcessor {
    chains: AHashMap<String, Vec<NamedArgsDef>>,
}

impl DefaultFiltersProcessor {
    pub fn from_settings(map: &HashMap<String, String>) -> Result<Self, ParseError> {
        let mut chains = AHashMap::new();
        for (authority, chain) in map {
            chains.insert(authority.clone(), parse_filters(chain)?);
        }
        Ok(Self { chains })
    }

    fn authorities(def: &RouteDef) -> Vec<String> {
        match &def.backend {
            crate::eskip::BackendDef::Network(url) => Endpoint::parse(url)
                .map(|e| vec![e.key()])
                .unwrap_or_default(),
            crate::eskip::BackendDef::LoadBalanced { endpoints, .. } => endpoints
                .iter()
                .filter_map(|url| Endpoint::parse(url).ok())
                .map(|e| e.key())
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl PreProcessor for DefaultFiltersProcessor {
    fn process(&self, defs: Vec<RouteDef>) -> Vec<RouteDef> {
        if self.chains.is_empty() {
            return defs;
        }
        defs.into_iter()
            .map(|mut def| {
                let mut prefix: Vec<NamedArgsDef> = Vec::new();
                for authority in Self::authorities(&def) {
                    if let Some(chain) = self.chains.get(&authority) {
                        prefix.extend(chain.iter().cloned());
                    }
                }
                if !prefix.is_empty() {
                    prefix.append(&mut def.filters);
                    def.filters = prefix;
                }
                def
            })
            .collect()
    }
}

/// Registers every referenced endpoint with the stats registry and binds
/// load-balancer state to load-balanced routes.
pub struct EndpointRegistrar {
    registry: Arc<EndpointRegistry>,
    options: LbOptions,
}

impl EndpointRegistrar {
    pub fn new(registry: Arc<EndpointRegistry>, options: LbOptions) -> Self {
        Self { registry, options }
    }
}

impl PostProcessor for EndpointRegistrar {
    fn process(&self, routes: &mut Vec<Route>) {
        for route in routes.iter_mut() {
            match &route.backend {
                Backend::LoadBalanced {
                    algorithm,
                    endpoints,
                } => {
                    let stats = endpoints
                        .iter()
                        .map(|e| self.registry.touch(&e.key()))
                        .collect();
                    route.lb = Some(Arc::new(LbBinding {
                        algorithm: *algorithm,
                        balancer: LoadBalancerFactory::create(*algorithm, &self.options),
                        stats,
                    }));
                }
                Backend::Network(url) => {
                    if let Ok(endpoint) = Endpoint::parse(url) {
                        self.registry.touch(&endpoint.key());
                    }
                }
                _ => {}
            }
        }
    }
}

/// Manager knobs, derived from [`Settings`](crate::models::settings::Settings).
#[derive(Debug, Clone)]
pub struct RoutingSettings {
    pub poll_interval: Duration,
    pub drain_grace: Duration,
    pub default_route_id: Option<String>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            drain_grace: Duration::from_secs(5),
            default_route_id: None,
        }
    }
}

/// Coordinates data clients, processors, validation, and the table swap.
pub struct RoutingTableManager {
    clients: Vec<Arc<dyn DataClient>>,
    pre_processors: Vec<Arc<dyn PreProcessor>>,
    post_processors: Vec<Arc<dyn PostProcessor>>,
    registries: Arc<Registries>,
    holder: Arc<TableHolder>,
    registry: Arc<EndpointRegistry>,
    settings: RoutingSettings,
    version: AtomicU64,
    invalid: RwLock<AHashMap<String, u64>>,
    snapshots: Mutex<AHashMap<String, BTreeMap<String, RouteDef>>>,
    notify: Arc<Notify>,
}

impl RoutingTableManager {
    pub fn new(
        clients: Vec<Arc<dyn DataClient>>,
        registries: Arc<Registries>,
        holder: Arc<TableHolder>,
        registry: Arc<EndpointRegistry>,
        settings: RoutingSettings,
        lb_options: LbOptions,
    ) -> Self {
        Self {
            clients,
            pre_processors: Vec::new(),
            post_processors: vec![Arc::new(EndpointRegistrar::new(
                registry.clone(),
                lb_options,
            ))],
            registries,
            holder,
            registry,
            settings,
            version: AtomicU64::new(0),
            invalid: RwLock::new(AHashMap::new()),
            snapshots: Mutex::new(AHashMap::new()),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn add_pre_processor(&mut self, processor: Arc<dyn PreProcessor>) {
        self.pre_processors.push(processor);
    }

    pub fn add_post_processor(&mut self, processor: Arc<dyn PostProcessor>) {
        self.post_processors.push(processor);
    }

    /// Handle data clients use to push "update available".
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn table_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Invalid-route counters keyed by drop reason.
    pub fn invalid_counts(&self) -> Vec<(String, u64)> {
        let invalid = self.invalid.read().expect("manager lock poisoned");
        let mut counts: Vec<(String, u64)> = invalid.iter().map(|(k, v)| (k.clone(), *v)).collect();
        counts.sort();
        counts
    }

    /// Runs one full refresh cycle synchronously and returns the number of
    /// installed routes.
    pub fn rebuild_now(&self) -> usize {
        let mut defs = self.collect();
        for processor in &self.pre_processors {
            defs = processor.process(defs);
        }
        let mut routes = self.build_routes(defs);
        for processor in &self.post_processors {
            processor.process(&mut routes);
        }

        let routes: Vec<Arc<Route>> = routes.into_iter().map(Arc::new).collect();
        let default_route = self
            .settings
            .default_route_id
            .as_ref()
            .and_then(|id| routes.iter().find(|r| &r.id == id).cloned());
        let matcher = Matcher::new(routes, default_route);
        let count = matcher.len();

        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let table = RoutingTable {
            matcher,
            registry: self.registry.clone(),
            version,
            created_at: Utc::now(),
        };
        let old = self.holder.swap(Arc::new(table));
        info!("installed routing table v{} ({} routes)", version, count);
        self.retire(old);
        count
    }

    /// Spawns the coordinator loop: poll on the configured interval, plus
    /// immediate rebuilds on pushed notifications.
    pub fn run(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.settings.poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = manager.notify.notified() => {}
                }
                manager.rebuild_now();
            }
        })
    }

    fn collect(&self) -> Vec<RouteDef> {
        let mut snapshots = self.snapshots.lock().expect("manager lock poisoned");
        for client in &self.clients {
            let name = client.name().to_string();
            if !snapshots.contains_key(&name) {
                match client.load_all() {
                    Ok(defs) => {
                        let mut snapshot = BTreeMap::new();
                        for def in defs {
                            if snapshot.insert(def.id.clone(), def).is_some() {
                                warn!("data client {} delivered a duplicate route id", name);
                            }
                        }
                        snapshots.insert(name, snapshot);
                    }
                    Err(e) => {
                        warn!("data client {} failed on initial load: {}", name, e);
                    }
                }
                continue;
            }
            let snapshot = snapshots.get_mut(&name).expect("presence checked above");
            match client.load_update() {
                Ok(Some(update)) => {
                    for id in &update.deletions {
                        snapshot.remove(id);
                    }
                    for def in update.upserts {
                        snapshot.insert(def.id.clone(), def);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "data client {} failed: {}; keeping its previous routes",
                        name, e
                    );
                }
            }
        }

        let mut merged: BTreeMap<String, RouteDef> = BTreeMap::new();
        for client in &self.clients {
            let Some(snapshot) = snapshots.get(client.name()) else {
                continue;
            };
            for (id, def) in snapshot {
                if merged.insert(id.clone(), def.clone()).is_some() {
                    warn!(
                        "route id {} defined by multiple data clients; later client wins",
                        id
                    );
                }
            }
        }
        merged.into_values().collect()
    }

    fn build_routes(&self, defs: Vec<RouteDef>) -> Vec<Route> {
        let mut routes = Vec::with_capacity(defs.len());
        for def in defs {
            match build_route(&def, &self.registries) {
                Ok(route) => routes.push(route),
                Err(e) => {
                    warn!("dropping invalid route {}: {}", def.id, e);
                    let mut invalid = self.invalid.write().expect("manager lock poisoned");
                    *invalid.entry(e.reason().to_string()).or_insert(0) += 1;
                }
            }
        }
        routes
    }

    /// Closes the retired table's filter instances after the drain grace.
    /// Filter instances are rebuilt per table, so closing the old set never
    /// touches filters of the live one.
    fn retire(&self, old: Arc<RoutingTable>) {
        if old.matcher.is_empty() {
            return;
        }
        let grace = self.settings.drain_grace;
        let close_all = move |table: &RoutingTable| {
            for route in table.matcher.routes() {
                for filter in &route.filters {
                    filter.close();
                }
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    close_all(&old);
                });
            }
            Err(_) => close_all(&old),
        }
    }
}
