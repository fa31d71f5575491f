//! Cache lookup over sequences of handles
//!
//! The in-session cache is an ordered sequence, not a map: lookups match
//! either the full normalized path or the final segment (`name`), and the
//! first match in iteration order wins. None of these functions performs
//! I/O; a miss simply returns `None` and the caller decides whether to ask
//! the gateway.

use std::borrow::Cow;

use crate::error::{GridError, GridResult};
use crate::object::{CatalogObject, Kind};
use crate::path::{self, CatalogPath};

/// Normalize a lookup key.
///
/// Absolute input is fully normalized; anything else is a bare name with a
/// single trailing `/` stripped. Empty input is invalid.
fn lookup_key(input: &str) -> GridResult<Cow<'_, str>> {
    if input.starts_with('/') {
        return path::normalize(input).map(|p| Cow::Owned(p.into()));
    }
    let key = input.strip_suffix('/').unwrap_or(input);
    if key.is_empty() {
        return Err(GridError::InvalidPath {
            path: input.to_string(),
            reason: "path is empty".to_string(),
        });
    }
    Ok(Cow::Borrowed(key))
}

fn matches(obj: &CatalogObject, key: &str) -> bool {
    obj.path().as_str() == key || obj.name() == key
}

/// First element whose path or name equals `path`
pub fn find(objs: &[CatalogObject], path: &str) -> GridResult<Option<CatalogObject>> {
    let key = lookup_key(path)?;
    Ok(objs.iter().find(|obj| matches(obj, &key)).cloned())
}

/// Like [`find`], but also searches cached sub-collections.
///
/// A recursive collection is searched through all of its children; a
/// non-recursive one only through its child collections, never through its
/// data objects. Each collection's own flag decides, not the root's.
pub fn find_recursive(objs: &[CatalogObject], path: &str) -> GridResult<Option<CatalogObject>> {
    let key = lookup_key(path)?;
    Ok(descend(objs, &key))
}

fn descend(objs: &[CatalogObject], key: &str) -> Option<CatalogObject> {
    for obj in objs {
        if matches(obj, key) {
            return Some(obj.clone());
        }
        if obj.kind() != Kind::Collection {
            continue;
        }

        let children = obj.child_snapshot();
        let found = if obj.is_recursive_collection() {
            descend(&children, key)
        } else {
            let sub: Vec<CatalogObject> =
                children.into_iter().filter(CatalogObject::is_collection).collect();
            descend(&sub, key)
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// True iff [`find`] would return a handle
pub fn exists(objs: &[CatalogObject], path: &str) -> GridResult<bool> {
    Ok(find(objs, path)?.is_some())
}

/// Remove every handle at or below `path` from `objs` and from the cached
/// children of the collections that remain. Returns the number of handles
/// dropped.
pub(crate) fn evict(objs: &mut Vec<CatalogObject>, path: &CatalogPath) -> usize {
    let before = objs.len();
    objs.retain(|obj| !path::is_prefix(path, obj.path()));
    let mut removed = before - objs.len();

    for obj in objs.iter() {
        if obj.is_collection() && path::is_prefix(obj.path(), path) {
            removed += obj.evict_below(path);
        }
    }
    removed
}
