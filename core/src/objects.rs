//! Object store
//!
//! By-reference objects never cross the wire; clients see a stable opaque
//! 64-bit handle instead. The store keeps the reference/handle mapping in
//! both directions behind a single lock, so the two maps can never disagree.
//! Handle 0 is reserved and denotes "no object". Handle values increase
//! monotonically and are never recycled, even after removal.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// A live, type-erased server-side object.
pub type Instance = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("unknown object handle {0}")]
    UnknownHandle(u64),
    #[error("unknown object reference")]
    UnknownReference,
}

#[derive(Default)]
pub struct ObjectStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    by_handle: HashMap<u64, Instance>,
    by_ref: HashMap<usize, u64>,
    next_handle: u64,
}

/// Identity of an instance is the address of its allocation, so clones of the
/// same `Arc` always map to the same handle.
fn ref_id(obj: &Instance) -> usize {
    Arc::as_ptr(obj).cast::<()>() as usize
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an object and returns its handle. Null maps to 0. Adding an
    /// already-stored reference returns the existing handle.
    pub fn add_instance(&self, obj: Option<Instance>) -> u64 {
        let Some(obj) = obj else { return 0 };
        let mut inner = self.inner.lock().unwrap();
        let id = ref_id(&obj);
        if let Some(&handle) = inner.by_ref.get(&id) {
            return handle;
        }
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.by_handle.insert(handle, obj);
        inner.by_ref.insert(id, handle);
        handle
    }

    /// Looks up the object for a handle. Handle 0 resolves to null without
    /// error; any other handle must be live.
    pub fn get_instance(&self, handle: u64) -> Result<Option<Instance>, ObjectError> {
        if handle == 0 {
            return Ok(None);
        }
        let inner = self.inner.lock().unwrap();
        inner
            .by_handle
            .get(&handle)
            .cloned()
            .map(Some)
            .ok_or(ObjectError::UnknownHandle(handle))
    }

    /// Inverse lookup. Null maps to 0; a reference that was never stored (or
    /// was removed) is an error.
    pub fn get_object_id(&self, obj: Option<&Instance>) -> Result<u64, ObjectError> {
        let Some(obj) = obj else { return Ok(0) };
        let inner = self.inner.lock().unwrap();
        inner
            .by_ref
            .get(&ref_id(obj))
            .copied()
            .ok_or(ObjectError::UnknownReference)
    }

    /// Removes an object from the store. Removing null or an absent reference
    /// is a no-op.
    pub fn remove_instance(&self, obj: Option<&Instance>) {
        let Some(obj) = obj else { return };
        let mut inner = self.inner.lock().unwrap();
        if let Some(handle) = inner.by_ref.remove(&ref_id(obj)) {
            inner.by_handle.remove(&handle);
        }
    }

    /// True if the handle currently resolves (0 always does).
    pub fn contains(&self, handle: u64) -> bool {
        handle == 0 || self.inner.lock().unwrap().by_handle.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(value: &str) -> Instance {
        Arc::new(value.to_string())
    }

    #[test]
    fn null_maps_to_zero() {
        let store = ObjectStore::new();
        assert_eq!(store.add_instance(None), 0);
        assert_eq!(store.get_instance(0).unwrap(), None);
        assert_eq!(store.get_object_id(None).unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn add_is_idempotent() {
        let store = ObjectStore::new();
        let a = obj("a");
        let h1 = store.add_instance(Some(a.clone()));
        let h2 = store.add_instance(Some(a.clone()));
        assert_eq!(h1, h2);
        assert_ne!(h1, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_object_id(Some(&a)).unwrap(), h1);
        let got = store.get_instance(h1).unwrap().unwrap();
        assert!(Arc::ptr_eq(&got, &a));
    }

    #[test]
    fn distinct_objects_get_distinct_handles() {
        let store = ObjectStore::new();
        let a = obj("a");
        let b = obj("b");
        let ha = store.add_instance(Some(a));
        let hb = store.add_instance(Some(b));
        assert_ne!(ha, hb);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn unknown_lookups_fail() {
        let store = ObjectStore::new();
        assert_eq!(
            store.get_instance(1234).err().unwrap(),
            ObjectError::UnknownHandle(1234)
        );
        let never_added = obj("x");
        assert_eq!(
            store.get_object_id(Some(&never_added)).unwrap_err(),
            ObjectError::UnknownReference
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let store = ObjectStore::new();
        let a = obj("a");
        let h = store.add_instance(Some(a.clone()));
        store.remove_instance(Some(&a));
        assert!(store.get_instance(h).is_err());
        assert!(store.get_object_id(Some(&a)).is_err());
        // Removing again, or removing null, is not an error
        store.remove_instance(Some(&a));
        store.remove_instance(None);
        assert!(store.is_empty());
    }

    #[test]
    fn handles_are_never_recycled() {
        let store = ObjectStore::new();
        let a = obj("a");
        let h1 = store.add_instance(Some(a.clone()));
        store.remove_instance(Some(&a));
        let h2 = store.add_instance(Some(obj("b")));
        assert!(h2 > h1);
        // Re-adding a removed reference assigns a fresh handle
        let h3 = store.add_instance(Some(a));
        assert!(h3 > h2);
    }

    #[test]
    fn contains_tracks_liveness() {
        let store = ObjectStore::new();
        assert!(store.contains(0));
        assert!(!store.contains(1));
        let a = obj("a");
        let h = store.add_instance(Some(a.clone()));
        assert!(store.contains(h));
        store.remove_instance(Some(&a));
        assert!(!store.contains(h));
    }
}
