//! Route definition sources.
//!
//! A data client hands the manager full snapshots (`load_all`) and, on
//! later polls, deltas (`load_update`). Clients track their own previous
//! state so a delta carries both upserts and the ids that disappeared.
//! Concrete clients beyond the two here (a definition file and an
//! in-memory set) are external collaborators feeding the same interface.

use crate::eskip::{self, ParseError, RouteDef};
use log::debug;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

#[derive(Debug, thiserror::Error)]
pub enum DataClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A delta against the client's previous snapshot.
#[derive(Debug, Default, Clone)]
pub struct RouteUpdate {
    pub upserts: Vec<RouteDef>,
    pub deletions: Vec<String>,
}

/// Source of route definitions, polled by the table manager.
pub trait DataClient: Send + Sync {
    fn name(&self) -> &str;

    /// Full snapshot; called on the first poll and whenever the manager has
    /// no previous state for this client.
    fn load_all(&self) -> Result<Vec<RouteDef>, DataClientError>;

    /// Changes since the previous `load_all`/`load_update`. `None` means no
    /// change.
    fn load_update(&self) -> Result<Option<RouteUpdate>, DataClientError>;
}

fn diff_against(previous: &[String], current: &[RouteDef]) -> RouteUpdate {
    let deletions = previous
        .iter()
        .filter(|id| !current.iter().any(|def| def.id == **id))
        .cloned()
        .collect();
    RouteUpdate {
        upserts: current.to_vec(),
        deletions,
    }
}

/// Reads route definitions from a file, re-read when its mtime changes.
pub struct FileDataClient {
    path: PathBuf,
    state: Mutex<FileClientState>,
}

#[derive(Default)]
struct FileClientState {
    last_modified: Option<SystemTime>,
    last_ids: Vec<String>,
}

impl FileDataClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(FileClientState::default()),
        }
    }

    fn read(&self) -> Result<Vec<RouteDef>, DataClientError> {
        let text = std::fs::read_to_string(&self.path)?;
        Ok(eskip::parse(&text)?)
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).ok()?.modified().ok()
    }
}

impl DataClient for FileDataClient {
    fn name(&self) -> &str {
        "file"
    }

    fn load_all(&self) -> Result<Vec<RouteDef>, DataClientError> {
        let defs = self.read()?;
        let mut state = self.state.lock().expect("file client lock poisoned");
        state.last_modified = self.modified();
        state.last_ids = defs.iter().map(|d| d.id.clone()).collect();
        Ok(defs)
    }

    fn load_update(&self) -> Result<Option<RouteUpdate>, DataClientError> {
        let modified = self.modified();
        {
            let state = self.state.lock().expect("file client lock poisoned");
            if modified == state.last_modified {
                return Ok(None);
            }
        }
        debug!("route definition file changed: {}", self.path.display());
        let defs = self.read()?;
        let mut state = self.state.lock().expect("file client lock poisoned");
        let update = diff_against(&state.last_ids, &defs);
        state.last_modified = modified;
        state.last_ids = defs.iter().map(|d| d.id.clone()).collect();
        Ok(Some(update))
    }
}

/// In-memory route definitions, settable at runtime. Used by embedded
/// setups and tests; pair `set_routes` with a manager notification (or
/// `rebuild_now`) to apply immediately.
pub struct StaticDataClient {
    routes: Mutex<Vec<RouteDef>>,
    last_ids: Mutex<Vec<String>>,
    dirty: AtomicBool,
}

impl StaticDataClient {
    pub fn new(routes: Vec<RouteDef>) -> Self {
        Self {
            routes: Mutex::new(routes),
            last_ids: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Parses and installs a new definition set.
    pub fn set_eskip(&self, text: &str) -> Result<(), ParseError> {
        let defs = eskip::parse(text)?;
        self.set_routes(defs);
        Ok(())
    }

    pub fn set_routes(&self, routes: Vec<RouteDef>) {
        *self.routes.lock().expect("static client lock poisoned") = routes;
        self.dirty.store(true, Ordering::Release);
    }
}

impl DataClient for StaticDataClient {
    fn name(&self) -> &str {
        "static"
    }

    fn load_all(&self) -> Result<Vec<RouteDef>, DataClientError> {
        self.dirty.store(false, Ordering::Release);
        let defs = self.routes.lock().expect("static client lock poisoned").clone();
        *self.last_ids.lock().expect("static client lock poisoned") =
            defs.iter().map(|d| d.id.clone()).collect();
        Ok(defs)
    }

    fn load_update(&self) -> Result<Option<RouteUpdate>, DataClientError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(None);
        }
        let defs = self.routes.lock().expect("static client lock poisoned").clone();
        let mut last_ids = self.last_ids.lock().expect("static client lock poisoned");
        let update = diff_against(&last_ids, &defs);
        *last_ids = defs.iter().map(|d| d.id.clone()).collect();
        Ok(Some(update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_client_reports_deltas_with_deletions() {
        let client = StaticDataClient::new(Vec::new());
        client.set_eskip("a: * -> <shunt>; b: * -> <shunt>;").unwrap();

        let all = client.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(client.load_update().unwrap().is_none());

        client.set_eskip("b: * -> <shunt>; c: * -> <shunt>;").unwrap();
        let update = client.load_update().unwrap().unwrap();
        assert_eq!(update.upserts.len(), 2);
        assert_eq!(update.deletions, vec!["a".to_string()]);
    }

    #[test]
    fn file_client_tracks_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.eskip");
        std::fs::write(&path, "a: * -> <shunt>;").unwrap();

        let client = FileDataClient::new(&path);
        assert_eq!(client.load_all().unwrap().len(), 1);
        assert!(client.load_update().unwrap().is_none());

        // Force a different mtime; some filesystems are coarse.
        let later = SystemTime::now() + std::time::Duration::from_secs(2);
        std::fs::write(&path, "z: * -> <shunt>;").unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(later).unwrap();

        let update = client.load_update().unwrap().unwrap();
        assert_eq!(update.upserts.len(), 1);
        assert_eq!(update.upserts[0].id, "z");
        assert_eq!(update.deletions, vec!["a".to_string()]);
    }

    #[test]
    fn file_client_surfaces_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.eskip");
        std::fs::write(&path, "not a route").unwrap();
        let client = FileDataClient::new(&path);
        assert!(matches!(
            client.load_all().unwrap_err(),
            DataClientError::Parse(_)
        ));
    }
}
