//! Session lifecycle and the in-session handle cache
//!
//! A [`Session`] is a live, authenticated attachment to the gateway. It owns
//! its [`Endpoint`] exclusively and keeps the root set of handles it has
//! fetched (`opened`). Lookups by path consult that set first and only ask
//! the gateway on a miss.
//!
//! # Example
//!
//! ```no_run
//! use rods_grid::gateway::memory::MemoryTransport;
//! use rods_grid::{Session, SessionOptions};
//!
//! # async fn example() -> rods_grid::GridResult<()> {
//! let transport = MemoryTransport::new("tempZone");
//! let options = SessionOptions::user_defined("localhost", 1247, "rods", "tempZone")
//!     .with_password("rods");
//! let session = Session::open(&transport, options).await?;
//!
//! let home = session.collection("/tempZone/home", true).await?;
//! for child in home.children() {
//!     println!("{}", child.path());
//! }
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::config::{ConnectionSource, SessionOptions};
use crate::error::{GridError, GridResult};
use crate::gateway::{CatalogEntry, Endpoint, GatewayError, Transport};
use crate::object::{self, read_lock, write_lock, CatalogObject, Collection, DataObject, Kind};
use crate::path::{self, CatalogPath};
use crate::resolver;

/// The resolved gateway identity a session is attached as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub host: String,
    pub port: u16,
    pub zone: String,
}

pub(crate) struct SessionShared {
    options: SessionOptions,
    identity: Identity,
    transport: String,
    endpoint: RwLock<Option<Arc<dyn Endpoint>>>,
    connected: AtomicBool,
    opened: RwLock<Vec<CatalogObject>>,
}

impl SessionShared {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The live endpoint, or `SessionClosed` once disconnected
    pub(crate) fn endpoint(
        &self,
        operation: &str,
        path: Option<&str>,
    ) -> GridResult<Arc<dyn Endpoint>> {
        if !self.is_connected() {
            return Err(GridError::session_closed(operation, path));
        }
        read_lock(&self.endpoint)
            .clone()
            .ok_or_else(|| GridError::session_closed(operation, path))
    }

    /// Forget every cached handle at or below `path`
    pub(crate) fn evict(&self, path: &CatalogPath) -> usize {
        let removed = resolver::evict(&mut write_lock(&self.opened), path);
        if removed > 0 {
            debug!(path = %path, removed, "evicted stale handles");
        }
        removed
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!(
                user = %self.identity.username,
                host = %self.identity.host,
                "session dropped without disconnect"
            );
        }
    }
}

/// A live attachment to the gateway.
///
/// Clones share the same underlying session; handles refer back to it
/// without keeping it alive.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Authenticate and open a session.
    ///
    /// `UserDefined` options must name host, port, user and zone;
    /// `EnvironmentDefined` options read them from the ambient environment.
    /// A rejected handshake yields [`GridError::AuthFailed`] and no session.
    pub async fn open(transport: &dyn Transport, options: SessionOptions) -> GridResult<Session> {
        options.validate()?;

        let identity = match options.source {
            ConnectionSource::UserDefined => Identity {
                username: options.username.clone(),
                host: options.host.clone(),
                port: options.port.unwrap_or_default(),
                zone: options.zone.clone(),
            },
            ConnectionSource::EnvironmentDefined => {
                let env = transport
                    .read_ambient_env()
                    .map_err(|e| GridError::InvalidConfig {
                        message: format!("ambient environment unavailable: {}", e.message()),
                    })?;
                Identity {
                    username: env.username,
                    host: env.host,
                    port: env.port,
                    zone: env.zone,
                }
            }
        };

        let password = options.password.as_ref();
        let connected = match options.source {
            ConnectionSource::UserDefined => {
                transport
                    .connect_env(
                        &identity.host,
                        identity.port,
                        &identity.username,
                        &identity.zone,
                        password,
                    )
                    .await
            }
            ConnectionSource::EnvironmentDefined => transport.connect(password).await,
        };
        let endpoint = connected.map_err(|e| {
            warn!(
                user = %identity.username,
                host = %identity.host,
                error = %e,
                "gateway rejected connection"
            );
            GridError::AuthFailed {
                message: e.message(),
            }
        })?;

        info!(
            transport = transport.name(),
            user = %identity.username,
            host = %identity.host,
            port = identity.port,
            zone = %identity.zone,
            "session connected"
        );

        Ok(Session {
            shared: Arc::new(SessionShared {
                options,
                identity,
                transport: transport.name().to_string(),
                endpoint: RwLock::new(Some(Arc::from(endpoint))),
                connected: AtomicBool::new(true),
                opened: RwLock::new(Vec::new()),
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<SessionShared>) -> Self {
        Session { shared }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    /// Snapshot of the cache's root set, in insertion order
    pub fn opened(&self) -> Vec<CatalogObject> {
        read_lock(&self.shared.opened).clone()
    }

    /// Resolve a collection, from the cache when possible.
    ///
    /// On a miss the collection is fetched (with every descendant when
    /// `recursive` is set, otherwise with its immediate children only) and
    /// appended to the cache. A cached placeholder whose children were never
    /// fetched is loaded in place before it is returned.
    #[tracing::instrument(skip(self), fields(transport = %self.shared.transport))]
    pub async fn collection(&self, path: &str, recursive: bool) -> GridResult<Collection> {
        let path = path::normalize(path)?;
        let endpoint = self.shared.endpoint("open collection", Some(path.as_str()))?;

        let cached = resolver::find_recursive(&read_lock(&self.shared.opened), path.as_str())?;
        if let Some(collection) = cached.and_then(|hit| hit.as_collection()) {
            debug!(path = %path, loaded = collection.is_loaded(), "collection cache hit");
            collection.load().await?;
            return Ok(collection);
        }

        debug!(path = %path, recursive, "collection cache miss, fetching");
        let entry = endpoint
            .get_collection(&path, recursive)
            .await
            .map_err(|e| self.gateway_failure(e, "get_collection", path.as_str()))?;
        let collection = self
            .materialize(entry, &path, recursive, "get_collection")?
            .into_collection()?;

        let mut opened = write_lock(&self.shared.opened);
        opened.retain(|obj| obj.path() != &path);
        opened.push(collection.as_object().clone());
        Ok(collection)
    }

    /// Fetch a data object directly, bypassing the collection cache.
    ///
    /// The result is not added to the cache.
    #[tracing::instrument(skip(self), fields(transport = %self.shared.transport))]
    pub async fn data_object(&self, path: &str) -> GridResult<DataObject> {
        let path = path::normalize(path)?;
        let endpoint = self.shared.endpoint("open data object", Some(path.as_str()))?;
        let entry = endpoint
            .get_data_object(&path)
            .await
            .map_err(|e| self.gateway_failure(e, "get_data_object", path.as_str()))?;
        self.materialize(entry, &path, false, "get_data_object")?
            .into_data_object()
    }

    /// Look up a storage resource by name.
    ///
    /// Entities live outside the path namespace; the handle's path is
    /// `/<name>` and it is not added to the cache.
    pub async fn resource(&self, name: &str) -> GridResult<CatalogObject> {
        self.entity(Kind::Resource, name).await
    }

    /// Look up a resource group by name. Resource groups carry no metadata
    /// display code, so `display()` and the metadata calls on the returned
    /// handle fail with [`GridError::Fatal`].
    pub async fn resource_group(&self, name: &str) -> GridResult<CatalogObject> {
        self.entity(Kind::ResourceGroup, name).await
    }

    /// Look up a user by name. Not cached.
    pub async fn user(&self, name: &str) -> GridResult<CatalogObject> {
        self.entity(Kind::User, name).await
    }

    async fn entity(&self, kind: Kind, name: &str) -> GridResult<CatalogObject> {
        let path = CatalogPath::root().join(name)?;
        let endpoint = self.shared.endpoint("look up entity", Some(name))?;
        let entry = endpoint
            .get_entity(kind, name)
            .await
            .map_err(|e| GridError::from_gateway(e, "get_entity", name))?;
        if entry.kind != kind {
            return Err(GridError::KindMismatch {
                path: path.to_string(),
                expected: kind,
                found: entry.kind,
            });
        }
        self.materialize(entry, &path, false, "get_entity")
    }

    /// Data objects whose path matches a wildcard pattern (`%` any run,
    /// `_` any single character). Results are not cached.
    pub async fn search_data_objects(&self, pattern: &str) -> GridResult<Vec<DataObject>> {
        let endpoint = self.shared.endpoint("search data objects", None)?;
        let entries = endpoint
            .search_data_objects(pattern)
            .await
            .map_err(|e| GridError::from_gateway(e, "search_data_objects", pattern))?;
        self.data_objects_from(entries, "search_data_objects")
    }

    /// Data objects matching a metadata query such as
    /// `project = apollo and stage like final%`. Results are not cached.
    pub async fn query_meta(&self, query: &str) -> GridResult<Vec<DataObject>> {
        let endpoint = self.shared.endpoint("query metadata", None)?;
        let entries = endpoint
            .query_meta(query)
            .await
            .map_err(|e| GridError::from_gateway(e, "query_meta", query))?;
        self.data_objects_from(entries, "query_meta")
    }

    /// Cache-only lookup among the root set
    pub fn find(&self, path: &str) -> GridResult<Option<CatalogObject>> {
        resolver::find(&read_lock(&self.shared.opened), path)
    }

    /// Cache-only lookup through the root set and cached descendants
    pub fn find_recursive(&self, path: &str) -> GridResult<Option<CatalogObject>> {
        resolver::find_recursive(&read_lock(&self.shared.opened), path)
    }

    pub fn exists(&self, path: &str) -> GridResult<bool> {
        resolver::exists(&read_lock(&self.shared.opened), path)
    }

    /// Drop every cached handle at or below `path`; the next resolution
    /// re-queries the gateway
    pub fn evict(&self, path: &str) -> GridResult<usize> {
        let path = path::normalize(path)?;
        Ok(self.shared.evict(&path))
    }

    /// Release the endpoint. The session and every handle it produced are
    /// dead afterwards, even if the gateway reports a failure.
    pub async fn disconnect(&self) -> GridResult<()> {
        let endpoint = write_lock(&self.shared.endpoint).take();
        let Some(endpoint) = endpoint else {
            return Err(GridError::session_closed("disconnect", None));
        };

        self.shared.connected.store(false, Ordering::Release);
        write_lock(&self.shared.opened).clear();

        let result = endpoint.disconnect().await;
        info!(
            user = %self.shared.identity.username,
            host = %self.shared.identity.host,
            "session disconnected"
        );
        result.map_err(|e| {
            GridError::from_gateway(e, "disconnect", &self.shared.identity.zone)
        })
    }

    fn materialize(
        &self,
        entry: CatalogEntry,
        requested: &CatalogPath,
        recursive: bool,
        operation: &str,
    ) -> GridResult<CatalogObject> {
        let obj = object::materialize(entry, &Arc::downgrade(&self.shared), recursive)
            .map_err(|e| GridError::from_gateway(e, operation, requested.as_str()))?;
        if obj.path() != requested {
            return Err(GridError::from_gateway(
                GatewayError::Malformed(format!("asked for {}, got {}", requested, obj.path())),
                operation,
                requested.as_str(),
            ));
        }
        Ok(obj)
    }

    fn data_objects_from(
        &self,
        entries: Vec<CatalogEntry>,
        operation: &str,
    ) -> GridResult<Vec<DataObject>> {
        let session = Arc::downgrade(&self.shared);
        entries
            .into_iter()
            .map(|entry| {
                let path = entry.path.clone();
                if entry.kind != Kind::DataObject {
                    return Err(GridError::from_gateway(
                        GatewayError::Malformed(format!("{} returned a {}", operation, entry.kind)),
                        operation,
                        &path,
                    ));
                }
                object::materialize(entry, &session, false)
                    .map_err(|e| GridError::from_gateway(e, operation, &path))?
                    .into_data_object()
            })
            .collect()
    }

    fn gateway_failure(&self, err: GatewayError, operation: &str, path: &str) -> GridError {
        if err == GatewayError::NotFound {
            if let Ok(path) = path::normalize(path) {
                self.shared.evict(&path);
            }
        }
        GridError::from_gateway(err, operation, path)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.shared.identity;
        writeln!(
            f,
            "Host: {}@{}:{}/{}, Connected: {}",
            id.username,
            id.host,
            id.port,
            id.zone,
            self.is_connected()
        )
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.shared.identity)
            .field("transport", &self.shared.transport)
            .field("connected", &self.is_connected())
            .finish()
    }
}
