//! Catalog-object handles
//!
//! A [`CatalogObject`] is a cheap, clonable handle onto one catalog entry
//! produced by a [`Session`]. Every kind shares one struct; collections
//! additionally carry their cached children. Handles keep only a weak link
//! to their session, so dropping or disconnecting the session turns every
//! outstanding handle into a dead one that fails with
//! [`GridError::SessionClosed`].

mod kind;
mod meta;

pub use kind::Kind;
pub use meta::{MetadataCollection, Metadatum};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{GridError, GridResult};
use crate::gateway::{CatalogEntry, Endpoint, EntryInfo, GatewayError};
use crate::path::{self, CatalogPath};
use crate::resolver;
use crate::session::{Session, SessionShared};

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle onto one catalog entry
#[derive(Clone)]
pub struct CatalogObject {
    inner: Arc<ObjectInner>,
}

pub(crate) struct ObjectInner {
    kind: Kind,
    path: CatalogPath,
    info: EntryInfo,
    parent: Option<Weak<ObjectInner>>,
    session: Weak<SessionShared>,
    metadata: RwLock<Option<MetadataCollection>>,
    descriptor: Mutex<Option<i32>>,
    /// Present iff `kind == Collection`
    contents: Option<Contents>,
}

struct Contents {
    /// All transitive descendants were loaded together with this collection
    recursive: AtomicBool,
    /// Immediate children are present (false for placeholders)
    loaded: AtomicBool,
    children: RwLock<Vec<CatalogObject>>,
}

impl CatalogObject {
    pub fn kind(&self) -> Kind {
        self.inner.kind
    }

    /// Final path segment
    pub fn name(&self) -> &str {
        self.inner.path.name()
    }

    pub fn path(&self) -> &CatalogPath {
        &self.inner.path
    }

    /// Descriptive fields reported by the gateway
    pub fn info(&self) -> &EntryInfo {
        &self.inner.info
    }

    /// Path of the owning collection; `None` only for the root
    pub fn parent_path(&self) -> Option<CatalogPath> {
        (!self.inner.path.is_root()).then(|| self.inner.path.parent())
    }

    /// Owning collection; `None` only for the root.
    ///
    /// A handle materialized inside a cached listing returns that listing's
    /// collection. Otherwise the parent is resolved through the session,
    /// from its cache when possible.
    pub async fn parent(&self) -> GridResult<Option<Collection>> {
        let shared = self.live("resolve parent")?;
        let Some(parent_path) = self.parent_path() else {
            return Ok(None);
        };
        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            return Ok(Some(Collection(CatalogObject { inner: parent })));
        }
        Session::from_shared(shared)
            .collection(parent_path.as_str(), false)
            .await
            .map(Some)
    }

    /// The session that produced this handle
    pub fn session(&self) -> GridResult<Session> {
        self.live("resolve session").map(Session::from_shared)
    }

    pub fn is_collection(&self) -> bool {
        self.inner.kind == Kind::Collection
    }

    pub fn as_collection(&self) -> Option<Collection> {
        self.is_collection().then(|| Collection(self.clone()))
    }

    pub fn into_collection(self) -> GridResult<Collection> {
        match self.inner.kind {
            Kind::Collection => Ok(Collection(self)),
            found => Err(GridError::KindMismatch {
                path: self.inner.path.to_string(),
                expected: Kind::Collection,
                found,
            }),
        }
    }

    pub fn into_data_object(self) -> GridResult<DataObject> {
        match self.inner.kind {
            Kind::DataObject => Ok(DataObject(self)),
            found => Err(GridError::KindMismatch {
                path: self.inner.path.to_string(),
                expected: Kind::DataObject,
                found,
            }),
        }
    }

    /// True iff both values refer to the same materialized handle
    pub fn same_handle(&self, other: &CatalogObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Human form: `kind-code:path`
    pub fn display(&self) -> GridResult<String> {
        Ok(format!("{}:{}", self.inner.kind.meta_code()?, self.inner.path))
    }

    /// Metadata attached to this entry, loaded on first call and cached
    pub async fn metadata(&self) -> GridResult<MetadataCollection> {
        let shared = self.live("read metadata")?;
        let cached = read_lock(&self.inner.metadata).clone();
        if let Some(meta) = cached {
            return Ok(meta);
        }

        let code = self.inner.kind.meta_code()?;
        let endpoint = self.endpoint(&shared, "read metadata")?;
        let entries = endpoint
            .list_meta(code, self.meta_target())
            .await
            .map_err(|e| self.gateway_failure(&shared, e, "list_meta"))?;

        debug!(path = %self.inner.path, count = entries.len(), "loaded metadata");
        let meta = MetadataCollection::new(entries);
        *write_lock(&self.inner.metadata) = Some(meta.clone());
        Ok(meta)
    }

    /// First metadatum with the given attribute name
    pub async fn attribute(&self, name: &str) -> GridResult<Metadatum> {
        self.metadata()
            .await?
            .get(name)
            .cloned()
            .ok_or_else(|| GridError::NotFound {
                path: self.inner.path.to_string(),
                attribute: Some(name.to_string()),
            })
    }

    /// Attach a metadatum on the gateway and record it in the cached set
    pub async fn add_meta(&self, meta: Metadatum) -> GridResult<Metadatum> {
        let shared = self.live("add metadata")?;
        let code = self.inner.kind.meta_code()?;
        let endpoint = self.endpoint(&shared, "add metadata")?;
        endpoint
            .add_meta(code, self.meta_target(), &meta)
            .await
            .map_err(|e| self.gateway_failure(&shared, e, "add_meta"))?;

        if let Some(cached) = write_lock(&self.inner.metadata).as_mut() {
            cached.push(meta.clone());
        }
        debug!(path = %self.inner.path, attribute = %meta.attribute, "added metadata");
        Ok(meta)
    }

    /// Remove every metadatum named `name`; returns the remaining set
    pub async fn delete_meta(&self, name: &str) -> GridResult<MetadataCollection> {
        let current = self.metadata().await?;
        let doomed: Vec<Metadatum> = current.get_all(name).into_iter().cloned().collect();
        if doomed.is_empty() {
            return Err(GridError::NotFound {
                path: self.inner.path.to_string(),
                attribute: Some(name.to_string()),
            });
        }

        let shared = self.live("delete metadata")?;
        let code = self.inner.kind.meta_code()?;
        let endpoint = self.endpoint(&shared, "delete metadata")?;
        for meta in &doomed {
            if let Err(e) = endpoint.rm_meta(code, self.meta_target(), meta).await {
                // earlier removals may already have landed; reload on next read
                *write_lock(&self.inner.metadata) = None;
                return Err(self.gateway_failure(&shared, e, "rm_meta"));
            }
        }

        let mut cache = write_lock(&self.inner.metadata);
        let remaining = cache.get_or_insert_with(|| current.clone());
        remaining.remove_attribute(name);
        debug!(path = %self.inner.path, attribute = name, "deleted metadata");
        Ok(remaining.clone())
    }

    /// Acquire the server-side descriptor for this entry.
    ///
    /// A no-op for kinds without server-side cursors and for handles that
    /// are already open.
    pub async fn open(&self) -> GridResult<()> {
        let shared = self.live("open")?;
        if !self.inner.kind.is_namespaced() || self.is_open() {
            return Ok(());
        }

        let endpoint = self.endpoint(&shared, "open")?;
        let descriptor = endpoint
            .open_object(self.inner.kind, &self.inner.path)
            .await
            .map_err(|e| self.gateway_failure(&shared, e, "open_object"))?;
        *lock(&self.inner.descriptor) = Some(descriptor);
        debug!(path = %self.inner.path, descriptor, "opened");
        Ok(())
    }

    /// Release the descriptor acquired by [`CatalogObject::open`]
    pub async fn close(&self) -> GridResult<()> {
        let shared = self.live("close")?;
        let Some(descriptor) = lock(&self.inner.descriptor).take() else {
            return Ok(());
        };

        let endpoint = self.endpoint(&shared, "close")?;
        if let Err(e) = endpoint.close_object(self.inner.kind, descriptor).await {
            *lock(&self.inner.descriptor) = Some(descriptor);
            return Err(self.gateway_failure(&shared, e, "close_object"));
        }
        debug!(path = %self.inner.path, descriptor, "closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.descriptor).is_some()
    }

    /// Key used by the metadata primitives: the path for namespaced kinds,
    /// the bare name for resources and users
    fn meta_target(&self) -> &str {
        if self.inner.kind.is_namespaced() {
            self.inner.path.as_str()
        } else {
            self.inner.path.name()
        }
    }

    fn live(&self, operation: &str) -> GridResult<Arc<SessionShared>> {
        match self.inner.session.upgrade() {
            Some(shared) if shared.is_connected() => Ok(shared),
            _ => Err(GridError::session_closed(
                operation,
                Some(self.inner.path.as_str()),
            )),
        }
    }

    fn endpoint(&self, shared: &SessionShared, operation: &str) -> GridResult<Arc<dyn Endpoint>> {
        shared.endpoint(operation, Some(self.inner.path.as_str()))
    }

    /// Map a collaborator failure, dropping cached handles the gateway no
    /// longer knows about
    fn gateway_failure(
        &self,
        shared: &SessionShared,
        err: GatewayError,
        operation: &str,
    ) -> GridError {
        if err == GatewayError::NotFound && self.inner.kind.is_namespaced() {
            shared.evict(&self.inner.path);
        }
        GridError::from_gateway(err, operation, self.inner.path.as_str())
    }

    fn contents(&self) -> Option<&Contents> {
        self.inner.contents.as_ref()
    }

    /// Whether this is a collection loaded with all its descendants
    pub(crate) fn is_recursive_collection(&self) -> bool {
        self.contents()
            .map(|c| c.recursive.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Snapshot of cached children (empty for non-collections)
    pub(crate) fn child_snapshot(&self) -> Vec<CatalogObject> {
        self.contents()
            .map(|c| read_lock(&c.children).clone())
            .unwrap_or_default()
    }

    /// An ancestor is only recursive while its whole subtree is loaded
    fn clear_ancestor_recursion(&self) {
        let mut next = self.inner.parent.as_ref().and_then(Weak::upgrade);
        while let Some(ancestor) = next {
            if let Some(contents) = ancestor.contents.as_ref() {
                contents.recursive.store(false, Ordering::Release);
            }
            next = ancestor.parent.as_ref().and_then(Weak::upgrade);
        }
    }

    /// Drop cached children at or below `path`, recursively
    pub(crate) fn evict_below(&self, path: &CatalogPath) -> usize {
        match self.contents() {
            Some(contents) => resolver::evict(&mut write_lock(&contents.children), path),
            None => 0,
        }
    }
}

impl PartialEq for CatalogObject {
    fn eq(&self, other: &Self) -> bool {
        self.inner.kind == other.inner.kind && self.inner.path == other.inner.path
    }
}

impl Eq for CatalogObject {}

impl Hash for CatalogObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.kind.hash(state);
        self.inner.path.hash(state);
    }
}

impl fmt::Debug for CatalogObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogObject")
            .field("kind", &self.inner.kind)
            .field("path", &self.inner.path)
            .finish()
    }
}

/// Handle onto a collection
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Collection(CatalogObject);

impl Collection {
    /// True iff every transitive descendant was loaded with this collection
    pub fn is_recursive(&self) -> bool {
        self.0.is_recursive_collection()
    }

    /// False for placeholder sub-collections whose children were never fetched
    pub fn is_loaded(&self) -> bool {
        self.0
            .contents()
            .map(|c| c.loaded.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Immediate children in catalog order
    pub fn children(&self) -> Vec<CatalogObject> {
        self.0.child_snapshot()
    }

    pub fn collections(&self) -> Vec<Collection> {
        self.children()
            .into_iter()
            .filter_map(|c| c.into_collection().ok())
            .collect()
    }

    pub fn data_objects(&self) -> Vec<DataObject> {
        self.children()
            .into_iter()
            .filter_map(|c| c.into_data_object().ok())
            .collect()
    }

    /// Cache-only lookup among the immediate children
    pub fn find(&self, path: &str) -> GridResult<Option<CatalogObject>> {
        resolver::find(&self.children(), path)
    }

    /// Cache-only lookup among all cached descendants
    pub fn find_recursive(&self, path: &str) -> GridResult<Option<CatalogObject>> {
        resolver::find_recursive(&self.children(), path)
    }

    pub fn exists(&self, path: &str) -> GridResult<bool> {
        resolver::exists(&self.children(), path)
    }

    /// Fetch the immediate children if this is an unloaded placeholder
    pub async fn load(&self) -> GridResult<()> {
        if self.is_loaded() {
            self.0.live("load collection")?;
            return Ok(());
        }
        self.refresh().await
    }

    /// Re-fetch the immediate children from the gateway.
    ///
    /// Sub-collections come back as placeholders, so neither this collection
    /// nor any of its loaded ancestors is recursive afterwards. On failure
    /// the cached children and flags are left untouched.
    pub async fn refresh(&self) -> GridResult<()> {
        let shared = self.0.live("load collection")?;
        let endpoint = self.0.endpoint(&shared, "load collection")?;
        let entry = endpoint
            .get_collection(self.path(), false)
            .await
            .map_err(|e| self.0.gateway_failure(&shared, e, "get_collection"))?;

        let listing = validate(entry)
            .and_then(|v| {
                if &v.path == self.path() && v.kind == Kind::Collection {
                    Ok(v)
                } else {
                    Err(GatewayError::Malformed(format!(
                        "asked for collection {}, got {} {}",
                        self.path(),
                        v.kind,
                        v.path
                    )))
                }
            })
            .map_err(|e| self.0.gateway_failure(&shared, e, "get_collection"))?;

        let me = Arc::downgrade(&self.0.inner);
        let children: Vec<CatalogObject> = listing
            .children
            .unwrap_or_default()
            .into_iter()
            .map(|child| build(child, Some(me.clone()), &self.0.inner.session, false))
            .collect();

        let contents = self
            .0
            .contents()
            .ok_or_else(|| GridError::fatal(format!("collection {} has no contents", self.path())))?;
        let count = children.len();
        *write_lock(&contents.children) = children;
        contents.loaded.store(true, Ordering::Release);
        contents.recursive.store(false, Ordering::Release);
        self.0.clear_ancestor_recursion();
        debug!(path = %self.path(), children = count, "loaded collection children");
        Ok(())
    }

    pub fn as_object(&self) -> &CatalogObject {
        &self.0
    }

    pub fn into_object(self) -> CatalogObject {
        self.0
    }
}

impl Deref for Collection {
    type Target = CatalogObject;

    fn deref(&self) -> &CatalogObject {
        &self.0
    }
}

/// Handle onto a data object
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DataObject(CatalogObject);

impl DataObject {
    pub fn size(&self) -> u64 {
        self.0.inner.info.size
    }

    pub fn owner(&self) -> Option<&str> {
        self.0.inner.info.owner.as_deref()
    }

    pub fn resource(&self) -> Option<&str> {
        self.0.inner.info.resource.as_deref()
    }

    pub fn checksum(&self) -> Option<&str> {
        self.0.inner.info.checksum.as_deref()
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.0.inner.info.modified
    }

    pub fn as_object(&self) -> &CatalogObject {
        &self.0
    }

    pub fn into_object(self) -> CatalogObject {
        self.0
    }
}

impl Deref for DataObject {
    type Target = CatalogObject;

    fn deref(&self) -> &CatalogObject {
        &self.0
    }
}

/// A gateway entry whose paths have been checked against the catalog
/// invariants
struct Validated {
    kind: Kind,
    path: CatalogPath,
    info: EntryInfo,
    children: Option<Vec<Validated>>,
}

fn validate(entry: CatalogEntry) -> Result<Validated, GatewayError> {
    let path = path::normalize(&entry.path).map_err(|e| GatewayError::Malformed(e.to_string()))?;

    let children = match entry.children {
        None => None,
        Some(_) if entry.kind != Kind::Collection => {
            return Err(GatewayError::Malformed(format!(
                "{} {} reported children",
                entry.kind, path
            )));
        }
        Some(list) => {
            let mut out: Vec<Validated> = Vec::with_capacity(list.len());
            for child in list {
                let child = validate(child)?;
                if !path.is_parent_of(&child.path) {
                    return Err(GatewayError::Malformed(format!(
                        "{} is not an immediate child of {}",
                        child.path, path
                    )));
                }
                if out.iter().any(|c| c.path == child.path) {
                    warn!(path = %child.path, "dropping duplicate child reported by gateway");
                    continue;
                }
                out.push(child);
            }
            Some(out)
        }
    };

    Ok(Validated {
        kind: entry.kind,
        path,
        info: entry.info,
        children,
    })
}

fn build(
    entry: Validated,
    parent: Option<Weak<ObjectInner>>,
    session: &Weak<SessionShared>,
    recursive: bool,
) -> CatalogObject {
    let Validated {
        kind,
        path,
        info,
        children,
    } = entry;

    let inner = Arc::new_cyclic(|me: &Weak<ObjectInner>| {
        let contents = (kind == Kind::Collection).then(|| {
            let loaded = children.is_some();
            let children: Vec<CatalogObject> = children
                .unwrap_or_default()
                .into_iter()
                .map(|child| build(child, Some(me.clone()), session, recursive))
                .collect();
            let complete = recursive
                && loaded
                && children
                    .iter()
                    .all(|c| !c.is_collection() || c.is_recursive_collection());
            Contents {
                recursive: AtomicBool::new(complete),
                loaded: AtomicBool::new(loaded),
                children: RwLock::new(children),
            }
        });

        ObjectInner {
            kind,
            path,
            info,
            parent,
            session: session.clone(),
            metadata: RwLock::new(None),
            descriptor: Mutex::new(None),
            contents,
        }
    });

    CatalogObject { inner }
}

/// Turn a gateway response into a handle tree owned by `session`.
///
/// `recursive` records whether the caller asked for all descendants; a
/// collection is only marked recursive if the response really contained
/// them.
pub(crate) fn materialize(
    entry: CatalogEntry,
    session: &Weak<SessionShared>,
    recursive: bool,
) -> Result<CatalogObject, GatewayError> {
    let validated = validate(entry)?;
    Ok(build(validated, None, session, recursive))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Handle tree with no session behind it
    pub(crate) fn detached(entry: CatalogEntry, recursive: bool) -> CatalogObject {
        materialize(entry, &Weak::new(), recursive).unwrap()
    }

    fn coll(path: &str, children: Vec<CatalogEntry>) -> CatalogEntry {
        CatalogEntry::new(Kind::Collection, path).with_children(children)
    }

    fn placeholder(path: &str) -> CatalogEntry {
        CatalogEntry::new(Kind::Collection, path)
    }

    fn file(path: &str) -> CatalogEntry {
        CatalogEntry::new(Kind::DataObject, path)
    }

    #[test]
    fn test_recursive_flag_follows_loaded_descendants() {
        let tree = coll(
            "/z/home",
            vec![coll("/z/home/alice", vec![file("/z/home/alice/a.txt")])],
        );
        let home = detached(tree, true).into_collection().unwrap();
        assert!(home.is_recursive());
        assert!(home.collections()[0].is_recursive());
    }

    #[test]
    fn test_non_recursive_fetch_leaves_placeholders() {
        let tree = coll("/z/home", vec![placeholder("/z/home/alice"), file("/z/home/b.txt")]);
        let home = detached(tree, false).into_collection().unwrap();
        assert!(!home.is_recursive());
        assert!(home.is_loaded());

        let alice = &home.collections()[0];
        assert!(!alice.is_loaded());
        assert!(!alice.is_recursive());
        assert_eq!(home.data_objects().len(), 1);
    }

    #[test]
    fn test_incomplete_recursive_response_is_not_recursive() {
        let tree = coll("/z/home", vec![placeholder("/z/home/alice")]);
        let home = detached(tree, true).into_collection().unwrap();
        assert!(!home.is_recursive());
    }

    #[test]
    fn test_children_link_back_to_parent() {
        let tree = coll("/z/home", vec![file("/z/home/b.txt")]);
        let home = detached(tree, false).into_collection().unwrap();
        let child = &home.children()[0];
        assert_eq!(child.name(), "b.txt");
        assert_eq!(child.parent_path().as_ref(), Some(home.path()));
        assert_eq!(home.parent_path().unwrap().as_str(), "/z");
        assert!(path::is_prefix(home.path(), child.path()));
    }

    #[test]
    fn test_only_root_has_no_parent_path() {
        let root = detached(placeholder("/"), false);
        assert!(root.parent_path().is_none());

        let user = detached(CatalogEntry::new(Kind::User, "/alice"), false);
        assert_eq!(user.parent_path(), Some(CatalogPath::root()));
    }

    #[tokio::test]
    async fn test_parent_of_detached_handle_is_closed() {
        let a = detached(file("/z/a.txt"), false);
        assert!(a.parent().await.unwrap_err().is_session_closed());
    }

    #[test]
    fn test_validate_rejects_foreign_child() {
        let tree = coll("/z/home", vec![file("/z/other/b.txt")]);
        let err = materialize(tree, &Weak::new(), false).unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
    }

    #[test]
    fn test_validate_rejects_grandchild_at_first_level() {
        let tree = coll("/z/home", vec![file("/z/home/alice/b.txt")]);
        assert!(materialize(tree, &Weak::new(), false).is_err());
    }

    #[test]
    fn test_validate_drops_duplicates() {
        let tree = coll("/z/home", vec![file("/z/home/b.txt"), file("/z/home/b.txt/")]);
        let home = detached(tree, false).into_collection().unwrap();
        assert_eq!(home.children().len(), 1);
    }

    #[test]
    fn test_display_codes() {
        let home = detached(placeholder("/z/home"), false);
        assert_eq!(home.display().unwrap(), "C:/z/home");

        let group = detached(CatalogEntry::new(Kind::ResourceGroup, "/rg"), false);
        assert!(group.display().unwrap_err().is_fatal());
    }

    #[test]
    fn test_equality_is_kind_and_path() {
        let a = detached(file("/z/a.txt"), false);
        let b = detached(file("/z/a.txt"), false);
        assert_eq!(a, b);
        assert!(!a.same_handle(&b));
        assert!(a.same_handle(&a.clone()));
    }

    #[tokio::test]
    async fn test_detached_handle_is_closed() {
        let a = detached(file("/z/a.txt"), false);
        assert!(a.metadata().await.unwrap_err().is_session_closed());
        assert!(a.session().unwrap_err().is_session_closed());
    }

    #[test]
    fn test_into_collection_mismatch() {
        let a = detached(file("/z/a.txt"), false);
        let err = a.into_collection().unwrap_err();
        assert!(matches!(
            err,
            GridError::KindMismatch {
                expected: Kind::Collection,
                found: Kind::DataObject,
                ..
            }
        ));
    }
}
