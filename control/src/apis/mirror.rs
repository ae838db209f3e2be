//! Cluster mirrors
//!
//! Read-only views over kube-rs reflector stores, one per resource kind, with a
//! `synced` flag that flips once the initial listing has completed. Until then
//! a lookup miss only means the object has not arrived yet.
//!
//! The watch side owns a [`MirrorWriter`] and feeds it raw watcher events; the
//! reconciler only ever holds a [`Mirror`].

use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// =============================================================================
// ObjectKey
// =============================================================================

/// Namespace-qualified key: (namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[inline]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object ("default" when the namespace is unset)
    pub fn of<K: ResourceExt>(obj: &K) -> Self {
        Self::new(
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Mirror
// =============================================================================

/// Read handle over a locally mirrored resource kind
pub struct Mirror<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K> Clone for Mirror<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            synced: self.synced.clone(),
        }
    }
}

impl<K> Mirror<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    /// Look up an object by namespace/name
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let object_ref = ObjectRef::<K>::new(&key.name).within(&key.namespace);
        self.store.get(&object_ref)
    }

    /// True once the initial listing from the cluster has completed
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Number of mirrored objects
    pub fn len(&self) -> usize {
        self.store.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// MirrorWriter
// =============================================================================

/// Write side of a mirror, driven by a watcher stream
pub struct MirrorWriter<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    writer: Writer<K>,
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K> MirrorWriter<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    /// Feed one watcher event into the store
    pub fn apply(&mut self, event: &watcher::Event<K>) {
        self.writer.apply_watcher_event(event);
        if matches!(event, watcher::Event::InitDone) {
            self.mark_synced();
        }
    }

    /// Currently stored copy of `obj`, before any pending event is applied
    pub fn previous(&self, obj: &K) -> Option<Arc<K>> {
        self.store.get(&ObjectRef::from_obj(obj))
    }

    /// Everything currently stored
    pub fn state(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Insert or replace a single object
    pub fn insert(&mut self, obj: K) {
        self.apply(&watcher::Event::Apply(obj));
    }

    /// Remove a single object
    pub fn remove(&mut self, obj: K) {
        self.apply(&watcher::Event::Delete(obj));
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }
}

/// Create a mirror and the writer that feeds it
pub fn mirror<K>() -> (Mirror<K>, MirrorWriter<K>)
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (store, writer) = reflector::store();
    let synced = Arc::new(AtomicBool::new(false));
    (
        Mirror {
            store: store.clone(),
            synced: synced.clone(),
        },
        MirrorWriter {
            writer,
            store,
            synced,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service(namespace: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::new("default", "svc1");
        assert_eq!(key.to_string(), "default/svc1");
        assert_eq!(ObjectKey::of(&service("prod", "api")), ObjectKey::new("prod", "api"));
    }

    #[test]
    fn test_mirror_lookup_by_key() {
        let (mirror, mut writer) = mirror::<Service>();
        writer.insert(service("default", "svc1"));

        assert!(mirror.get(&ObjectKey::new("default", "svc1")).is_some());
        assert!(mirror.get(&ObjectKey::new("other", "svc1")).is_none());
        assert_eq!(mirror.len(), 1);

        writer.remove(service("default", "svc1"));
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_synced_flips_on_init_done() {
        let (mirror, mut writer) = mirror::<Service>();
        assert!(!mirror.is_synced());

        writer.apply(&watcher::Event::Init);
        writer.apply(&watcher::Event::InitApply(service("default", "svc1")));
        assert!(!mirror.is_synced());

        writer.apply(&watcher::Event::InitDone);
        assert!(mirror.is_synced());
        assert!(mirror.get(&ObjectKey::new("default", "svc1")).is_some());
    }

    #[test]
    fn test_previous_returns_stored_copy() {
        let (_mirror, mut writer) = mirror::<Service>();
        let svc = service("default", "svc1");
        assert!(writer.previous(&svc).is_none());

        writer.insert(svc.clone());
        assert!(writer.previous(&svc).is_some());
    }
}
