//! In-memory catalog transport
//!
//! [`MemoryTransport`] holds a small catalog in process and serves it through
//! the [`Transport`]/[`Endpoint`] contract. It is what the test suite runs
//! against, and it is handy for exercising code that consumes a [`Session`]
//! without a live grid.
//!
//! # Example
//!
//! ```rust
//! use rods_grid::gateway::memory::MemoryTransport;
//! use rods_grid::gateway::EntryInfo;
//!
//! let transport = MemoryTransport::new("tempZone");
//! transport.add_collection("/tempZone/home/alice").unwrap();
//! transport
//!     .add_data_object("/tempZone/home/alice/notes.txt", EntryInfo::default())
//!     .unwrap();
//! assert_eq!(transport.fetch_count(), 0);
//! ```
//!
//! [`Session`]: crate::Session

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{codes, CatalogEntry, Endpoint, EntryInfo, GatewayError, GatewayResult, Transport};
use crate::config::AmbientEnv;
use crate::error::{GridError, GridResult};
use crate::object::{read_lock, write_lock, Kind, Metadatum};
use crate::path::{self, CatalogPath};

#[derive(Debug, Clone)]
struct StoredEntry {
    kind: Kind,
    path: CatalogPath,
    info: EntryInfo,
}

#[derive(Debug, Clone)]
struct Descriptor {
    endpoint: u64,
    kind: Kind,
}

#[derive(Debug, Default)]
struct MemoryCatalog {
    zone: String,
    /// Keyed by path string so a subtree is one contiguous range
    namespace: BTreeMap<String, StoredEntry>,
    entities: BTreeMap<(String, Kind), EntryInfo>,
    /// Keyed by (display code, target)
    metadata: HashMap<(String, String), Vec<Metadatum>>,
    credentials: Option<(String, SecretString)>,
    ambient: Option<AmbientEnv>,
    descriptors: HashMap<i32, Descriptor>,
    next_descriptor: i32,
    next_endpoint: u64,
    fetches: usize,
    injected: Option<GatewayError>,
}

impl MemoryCatalog {
    fn insert_collection(&mut self, path: CatalogPath) -> GridResult<()> {
        match self.namespace.get(path.as_str()) {
            Some(existing) if existing.kind != Kind::Collection => Err(GridError::InvalidPath {
                path: path.to_string(),
                reason: format!("already holds a {}", existing.kind),
            }),
            Some(_) => Ok(()),
            None => {
                self.namespace.insert(
                    path.to_string(),
                    StoredEntry {
                        kind: Kind::Collection,
                        path,
                        info: EntryInfo::default(),
                    },
                );
                Ok(())
            }
        }
    }

    fn insert_ancestors(&mut self, path: &CatalogPath) -> GridResult<()> {
        let mut current = path.clone();
        while !current.is_root() {
            current = current.parent();
            self.insert_collection(current.clone())?;
        }
        Ok(())
    }

    fn namespaced(&self, path: &CatalogPath, expected: Kind) -> GatewayResult<&StoredEntry> {
        let entry = self.namespace.get(path.as_str()).ok_or(GatewayError::NotFound)?;
        if entry.kind != expected {
            return Err(GatewayError::KindMismatch {
                expected,
                found: entry.kind,
            });
        }
        Ok(entry)
    }

    /// `dir` itself (unless it is the root) is not included
    fn descendants<'a>(&'a self, dir: &CatalogPath) -> impl Iterator<Item = &'a StoredEntry> + 'a {
        let prefix = if dir.is_root() {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.namespace
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix.as_str()))
            .map(|(_, entry)| entry)
    }

    fn listing(&self, dir: &StoredEntry, recursive: bool) -> CatalogEntry {
        let children = self
            .descendants(&dir.path)
            .filter(|e| dir.path.is_parent_of(&e.path))
            .map(|child| match child.kind {
                Kind::Collection if recursive => self.listing(child, true),
                Kind::Collection => {
                    CatalogEntry::new(Kind::Collection, child.path.as_str())
                        .with_info(child.info.clone())
                }
                kind => CatalogEntry::new(kind, child.path.as_str()).with_info(child.info.clone()),
            })
            .collect();
        CatalogEntry::new(Kind::Collection, dir.path.as_str())
            .with_info(dir.info.clone())
            .with_children(children)
    }

    /// Does the metadata target named by (`code`, `target`) exist?
    fn target_exists(&self, code: &str, target: &str) -> GatewayResult<()> {
        let kind = Kind::from_meta_code(code)
            .map_err(|e| GatewayError::status(codes::CAT_SQL_ERR, e.to_string()))?;
        let found = if kind.is_namespaced() {
            let path = path::normalize(target).map_err(|_| GatewayError::NotFound)?;
            self.namespaced(&path, kind).is_ok()
        } else {
            self.entities.contains_key(&(target.to_string(), kind))
        };
        if found {
            Ok(())
        } else {
            Err(GatewayError::NotFound)
        }
    }

    fn data_object_entry(entry: &StoredEntry) -> CatalogEntry {
        CatalogEntry::new(Kind::DataObject, entry.path.as_str()).with_info(entry.info.clone())
    }
}

/// In-process gateway holding a mutable catalog.
///
/// Clones share the same catalog, so a test can keep one clone to seed and
/// inspect while a session talks to another.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<RwLock<MemoryCatalog>>,
}

impl MemoryTransport {
    /// Empty catalog holding only `/` and `/<zone>`
    pub fn new(zone: impl Into<String>) -> Self {
        let zone = zone.into();
        let mut catalog = MemoryCatalog {
            zone: zone.clone(),
            next_descriptor: 3,
            ..Default::default()
        };
        let root = CatalogPath::root();
        // a zone name with '/' in it is left without its home collection
        let _ = catalog.insert_collection(root.clone());
        if let Ok(zone_path) = root.join(&zone) {
            let _ = catalog.insert_collection(zone_path);
        }
        Self {
            state: Arc::new(RwLock::new(catalog)),
        }
    }

    /// Require this user/password pair at connect time
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        write_lock(&self.state).credentials = Some((
            username.into(),
            SecretString::new(password.into().into_boxed_str()),
        ));
        self
    }

    /// Identity served to environment-defined sessions
    pub fn with_ambient(self, env: AmbientEnv) -> Self {
        write_lock(&self.state).ambient = Some(env);
        self
    }

    /// Add a collection, creating missing ancestors
    pub fn add_collection(&self, path: &str) -> GridResult<()> {
        let path = path::normalize(path)?;
        let mut state = write_lock(&self.state);
        state.insert_ancestors(&path)?;
        state.insert_collection(path)
    }

    /// Add a data object, creating missing ancestor collections
    pub fn add_data_object(&self, path: &str, info: EntryInfo) -> GridResult<()> {
        let path = path::normalize(path)?;
        if path.is_root() {
            return Err(GridError::InvalidPath {
                path: path.to_string(),
                reason: "the root is a collection".to_string(),
            });
        }
        let mut state = write_lock(&self.state);
        state.insert_ancestors(&path)?;
        if let Some(existing) = state.namespace.get(path.as_str()) {
            if existing.kind == Kind::Collection {
                return Err(GridError::InvalidPath {
                    path: path.to_string(),
                    reason: "already holds a collection".to_string(),
                });
            }
        }
        state.namespace.insert(
            path.to_string(),
            StoredEntry {
                kind: Kind::DataObject,
                path,
                info,
            },
        );
        Ok(())
    }

    pub fn add_resource(&self, name: &str, info: EntryInfo) {
        self.add_entity(Kind::Resource, name, info);
    }

    pub fn add_resource_group(&self, name: &str) {
        self.add_entity(Kind::ResourceGroup, name, EntryInfo::default());
    }

    pub fn add_user(&self, name: &str) {
        self.add_entity(Kind::User, name, EntryInfo::default());
    }

    fn add_entity(&self, kind: Kind, name: &str, info: EntryInfo) {
        write_lock(&self.state)
            .entities
            .insert((name.to_string(), kind), info);
    }

    /// Attach a metadatum directly, bypassing any session
    pub fn add_metadata(&self, kind: Kind, target: &str, meta: Metadatum) -> GridResult<()> {
        let code = kind.meta_code()?;
        let mut state = write_lock(&self.state);
        let entries = state
            .metadata
            .entry((code.to_string(), target.to_string()))
            .or_default();
        if !entries.contains(&meta) {
            entries.push(meta);
        }
        Ok(())
    }

    /// Drop one metadatum from a target behind any session's back. Returns
    /// whether it was present.
    pub fn remove_metadata(&self, kind: Kind, target: &str, meta: &Metadatum) -> GridResult<bool> {
        let code = kind.meta_code()?;
        let mut state = write_lock(&self.state);
        let Some(entries) = state.metadata.get_mut(&(code.to_string(), target.to_string())) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|m| m != meta);
        Ok(entries.len() != before)
    }

    /// Metadata currently stored for a target
    pub fn metadata_of(&self, kind: Kind, target: &str) -> Vec<Metadatum> {
        let Ok(code) = kind.meta_code() else {
            return Vec::new();
        };
        read_lock(&self.state)
            .metadata
            .get(&(code.to_string(), target.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Delete an entry and everything below it. Returns the number of
    /// entries removed.
    pub fn remove(&self, path: &str) -> GridResult<usize> {
        let path = path::normalize(path)?;
        let mut state = write_lock(&self.state);
        let mut doomed: Vec<String> = state
            .descendants(&path)
            .map(|e| e.path.to_string())
            .collect();
        if !path.is_root() && state.namespace.contains_key(path.as_str()) {
            doomed.push(path.to_string());
        }
        for p in &doomed {
            state.namespace.remove(p.as_str());
            for code in ["d", "C"] {
                state.metadata.remove(&(code.to_string(), p.clone()));
            }
        }
        Ok(doomed.len())
    }

    /// Number of catalog fetches (collections, data objects and entities)
    /// served so far
    pub fn fetch_count(&self) -> usize {
        read_lock(&self.state).fetches
    }

    /// Descriptors currently held open by any endpoint
    pub fn open_descriptors(&self) -> usize {
        read_lock(&self.state).descriptors.len()
    }

    /// Make the next gateway call fail with `err`
    pub fn fail_next(&self, err: GatewayError) {
        write_lock(&self.state).injected = Some(err);
    }

    fn authenticate(
        &self,
        username: &str,
        zone: &str,
        password: Option<&SecretString>,
    ) -> GatewayResult<Box<dyn Endpoint>> {
        let mut state = write_lock(&self.state);
        if let Some(err) = state.injected.take() {
            return Err(err);
        }
        if zone != state.zone {
            return Err(GatewayError::status(
                codes::CAT_INVALID_USER,
                format!("unknown zone {}", zone),
            ));
        }
        if let Some((user, secret)) = &state.credentials {
            if username != user {
                return Err(GatewayError::status(
                    codes::CAT_INVALID_USER,
                    format!("unknown user {}#{}", username, zone),
                ));
            }
            match password {
                Some(given) if given.expose_secret() == secret.expose_secret() => {}
                _ => {
                    return Err(GatewayError::status(
                        codes::CAT_INVALID_AUTHENTICATION,
                        "CAT_INVALID_AUTHENTICATION",
                    ))
                }
            }
        }

        state.next_endpoint += 1;
        let id = state.next_endpoint;
        debug!(endpoint = id, user = username, zone, "memory endpoint opened");
        Ok(Box::new(MemoryEndpoint {
            id,
            state: Arc::clone(&self.state),
            connected: AtomicBool::new(true),
        }))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect_env(
        &self,
        _host: &str,
        _port: u16,
        username: &str,
        zone: &str,
        password: Option<&SecretString>,
    ) -> GatewayResult<Box<dyn Endpoint>> {
        self.authenticate(username, zone, password)
    }

    async fn connect(&self, password: Option<&SecretString>) -> GatewayResult<Box<dyn Endpoint>> {
        let env = self.read_ambient_env()?;
        self.authenticate(&env.username, &env.zone, password)
    }

    fn read_ambient_env(&self) -> GatewayResult<AmbientEnv> {
        read_lock(&self.state).ambient.clone().ok_or_else(|| {
            GatewayError::status(
                codes::AMBIENT_ENV_UNAVAILABLE,
                "no ambient environment configured",
            )
        })
    }
}

/// One authenticated attachment to a [`MemoryTransport`]
pub struct MemoryEndpoint {
    id: u64,
    state: Arc<RwLock<MemoryCatalog>>,
    connected: AtomicBool,
}

impl MemoryEndpoint {
    /// Lock the catalog for one call, honouring disconnects and injected
    /// failures
    fn begin(&self) -> GatewayResult<RwLockWriteGuard<'_, MemoryCatalog>> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(GatewayError::Cancelled);
        }
        let mut state = write_lock(&self.state);
        match state.injected.take() {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    async fn get_collection(
        &self,
        path: &CatalogPath,
        recursive: bool,
    ) -> GatewayResult<CatalogEntry> {
        let mut state = self.begin()?;
        state.fetches += 1;
        let dir = state.namespaced(path, Kind::Collection)?;
        Ok(state.listing(dir, recursive))
    }

    async fn get_data_object(&self, path: &CatalogPath) -> GatewayResult<CatalogEntry> {
        let mut state = self.begin()?;
        state.fetches += 1;
        let entry = state.namespaced(path, Kind::DataObject)?;
        Ok(MemoryCatalog::data_object_entry(entry))
    }

    async fn get_entity(&self, kind: Kind, name: &str) -> GatewayResult<CatalogEntry> {
        let mut state = self.begin()?;
        state.fetches += 1;
        let path = format!("/{}", name);
        if let Some(info) = state.entities.get(&(name.to_string(), kind)) {
            return Ok(CatalogEntry::new(kind, path).with_info(info.clone()));
        }
        let other = state
            .entities
            .keys()
            .find(|(n, k)| n == name && !k.is_namespaced())
            .map(|(_, k)| *k);
        match other {
            Some(found) => Err(GatewayError::KindMismatch {
                expected: kind,
                found,
            }),
            None => Err(GatewayError::NotFound),
        }
    }

    async fn list_meta(&self, kind_code: &str, target: &str) -> GatewayResult<Vec<Metadatum>> {
        let state = self.begin()?;
        state.target_exists(kind_code, target)?;
        Ok(state
            .metadata
            .get(&(kind_code.to_string(), target.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn add_meta(
        &self,
        kind_code: &str,
        target: &str,
        meta: &Metadatum,
    ) -> GatewayResult<()> {
        let mut state = self.begin()?;
        state.target_exists(kind_code, target)?;
        let entries = state
            .metadata
            .entry((kind_code.to_string(), target.to_string()))
            .or_default();
        if entries.contains(meta) {
            return Err(GatewayError::status(
                codes::CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME,
                format!("{} already carries {}={}", target, meta.attribute, meta.value),
            ));
        }
        entries.push(meta.clone());
        Ok(())
    }

    async fn rm_meta(&self, kind_code: &str, target: &str, meta: &Metadatum) -> GatewayResult<()> {
        let mut state = self.begin()?;
        state.target_exists(kind_code, target)?;
        let entries = state
            .metadata
            .entry((kind_code.to_string(), target.to_string()))
            .or_default();
        let before = entries.len();
        entries.retain(|m| m != meta);
        if entries.len() == before {
            return Err(GatewayError::status(
                codes::CAT_SQL_ERR,
                format!("{} carries no {}={}", target, meta.attribute, meta.value),
            ));
        }
        Ok(())
    }

    async fn open_object(&self, kind: Kind, path: &CatalogPath) -> GatewayResult<i32> {
        let mut state = self.begin()?;
        state.namespaced(path, kind)?;
        let descriptor = state.next_descriptor;
        state.next_descriptor += 1;
        state.descriptors.insert(
            descriptor,
            Descriptor {
                endpoint: self.id,
                kind,
            },
        );
        Ok(descriptor)
    }

    async fn close_object(&self, kind: Kind, descriptor: i32) -> GatewayResult<()> {
        let mut state = self.begin()?;
        match state.descriptors.get(&descriptor) {
            Some(d) if d.endpoint == self.id && d.kind == kind => {
                state.descriptors.remove(&descriptor);
                Ok(())
            }
            _ => Err(GatewayError::status(
                codes::BAD_DESCRIPTOR,
                format!("descriptor {} is not open", descriptor),
            )),
        }
    }

    async fn search_data_objects(&self, pattern: &str) -> GatewayResult<Vec<CatalogEntry>> {
        let state = self.begin()?;
        let matcher = like_pattern(pattern)?;
        Ok(state
            .namespace
            .values()
            .filter(|e| e.kind == Kind::DataObject && matcher.is_match(e.path.as_str()))
            .map(MemoryCatalog::data_object_entry)
            .collect())
    }

    async fn query_meta(&self, query: &str) -> GatewayResult<Vec<CatalogEntry>> {
        let state = self.begin()?;
        let conditions = parse_query(query)?;
        Ok(state
            .namespace
            .values()
            .filter(|e| e.kind == Kind::DataObject)
            .filter(|e| {
                let meta = state
                    .metadata
                    .get(&("d".to_string(), e.path.as_str().to_string()));
                conditions.iter().all(|c| {
                    meta.map(|entries| entries.iter().any(|m| c.matches(m)))
                        .unwrap_or(false)
                })
            })
            .map(MemoryCatalog::data_object_entry)
            .collect())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        let mut state = self.begin()?;
        self.connected.store(false, Ordering::Release);
        let id = self.id;
        state.descriptors.retain(|_, d| d.endpoint != id);
        debug!(endpoint = id, "memory endpoint closed");
        Ok(())
    }
}

/// Translate a `%`/`_` wildcard pattern into an anchored regex
fn like_pattern(pattern: &str) -> GatewayResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 2);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| GatewayError::status(codes::CAT_SQL_ERR, e.to_string()))
}

#[derive(Debug)]
enum Operator {
    Equal,
    NotEqual,
    Like(Regex),
}

#[derive(Debug)]
struct Condition {
    attribute: String,
    operator: Operator,
    value: String,
}

impl Condition {
    fn matches(&self, meta: &Metadatum) -> bool {
        if meta.attribute != self.attribute {
            return false;
        }
        match &self.operator {
            Operator::Equal => meta.value == self.value,
            Operator::NotEqual => meta.value != self.value,
            Operator::Like(re) => re.is_match(&meta.value),
        }
    }
}

/// Parse `attr OP value [and attr OP value ...]` with OP one of `=`, `!=`
/// or `like`
fn parse_query(query: &str) -> GatewayResult<Vec<Condition>> {
    let invalid = |why: &str| {
        GatewayError::status(
            codes::CAT_SQL_ERR,
            format!("invalid query '{}': {}", query, why),
        )
    };
    let splitter = Regex::new(r"(?i)\s+and\s+").map_err(|e| invalid(&e.to_string()))?;
    let clause =
        Regex::new(r"(?i)^\s*(\S+)\s+(=|!=|like)\s+(.+?)\s*$").map_err(|e| invalid(&e.to_string()))?;

    if query.trim().is_empty() {
        return Err(invalid("empty query"));
    }

    splitter
        .split(query)
        .map(|part| {
            let caps = clause
                .captures(part)
                .ok_or_else(|| invalid(&format!("cannot parse condition '{}'", part.trim())))?;
            let value = caps[3].trim_matches('\'').to_string();
            let operator = match caps[2].to_ascii_lowercase().as_str() {
                "=" => Operator::Equal,
                "!=" => Operator::NotEqual,
                _ => Operator::Like(like_pattern(&value)?),
            };
            Ok(Condition {
                attribute: caps[1].to_string(),
                operator,
                value,
            })
        })
        .collect()
}
