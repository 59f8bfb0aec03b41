//! The live routing table and its atomic holder.

use crate::routing::matcher::Matcher;
use crate::services::endpoint_registry::EndpointRegistry;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One generation of the routing configuration: the compiled matcher plus
/// the ancillary handles requests need. Immutable; replaced wholesale.
pub struct RoutingTable {
    pub matcher: Matcher,
    pub registry: Arc<EndpointRegistry>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl RoutingTable {
    /// The empty version-0 table installed before the first ingest.
    pub fn empty(registry: Arc<EndpointRegistry>) -> Self {
        Self {
            matcher: Matcher::empty(),
            registry,
            version: 0,
            created_at: Utc::now(),
        }
    }
}

/// Atomic holder of the current table.
///
/// Readers load the pointer once per request and keep that `Arc` for the
/// whole exchange, so a concurrent store never changes the table a request
/// sees mid-flight. The previous table is released when its last in-flight
/// request completes.
pub struct TableHolder {
    current: ArcSwap<RoutingTable>,
}

impl TableHolder {
    pub fn new(initial: RoutingTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Pins the current table.
    pub fn load(&self) -> Arc<RoutingTable> {
        self.current.load_full()
    }

    /// Installs a new table and returns the replaced one.
    pub fn swap(&self, table: Arc<RoutingTable>) -> Arc<RoutingTable> {
        self.current.swap(table)
    }
}
