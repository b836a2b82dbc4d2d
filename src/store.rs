//! In-process object store
//!
//! The engine reads and writes objects through the surrounding tool's
//! object store rather than a cluster apiserver. This module provides that
//! store: typed buckets keyed by name, optimistic concurrency via
//! `resourceVersion`, and change notification for level-triggering the
//! reconcile queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::api::{
    ApiObject, ConfigMap, DockerComposeService, FileWatch, ImageMap, KubernetesApply,
    KubernetesDiscovery, LiveUpdate, ObjectRef,
};
use crate::{Error, Result};

/// Versioning and change notification shared by every bucket
struct StoreCore {
    version: AtomicU64,
    watchers: Mutex<Vec<mpsc::UnboundedSender<ObjectRef>>>,
}

impl StoreCore {
    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn notify(&self, reference: ObjectRef) {
        let mut watchers = self.watchers.lock().expect("store watcher lock poisoned");
        watchers.retain(|w| w.send(reference.clone()).is_ok());
    }
}

/// A bucket of objects of one kind, keyed by name
pub struct TypedStore<T: ApiObject> {
    objects: DashMap<String, T>,
    core: Arc<StoreCore>,
}

impl<T: ApiObject> TypedStore<T> {
    fn new(core: Arc<StoreCore>) -> Self {
        Self {
            objects: DashMap::new(),
            core,
        }
    }

    /// Fetch a copy of the named object
    pub fn get(&self, name: &str) -> Option<T> {
        self.objects.get(name).map(|o| o.value().clone())
    }

    /// Fetch the named object or fail with `Error::NotFound`
    pub fn get_required(&self, name: &str) -> Result<T> {
        self.get(name).ok_or_else(|| Error::not_found(T::KIND, name))
    }

    /// List all objects, ordered by name
    pub fn list(&self) -> Vec<T> {
        let mut out: Vec<T> = self.objects.iter().map(|o| o.value().clone()).collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// Create a new object; fails if one with the same name exists
    pub fn create(&self, mut obj: T) -> Result<T> {
        let name = required_name(&obj)?;
        obj.metadata_mut().resource_version = Some(self.core.next_version());
        use dashmap::mapref::entry::Entry;
        match self.objects.entry(name.clone()) {
            Entry::Occupied(_) => return Err(Error::already_exists(T::KIND, name)),
            Entry::Vacant(v) => {
                v.insert(obj.clone());
            }
        }
        self.core.notify(ObjectRef::of::<T>(name));
        Ok(obj)
    }

    /// Create the object or replace whatever is there, ignoring versions
    pub fn upsert(&self, mut obj: T) -> Result<T> {
        let name = required_name(&obj)?;
        obj.metadata_mut().resource_version = Some(self.core.next_version());
        self.objects.insert(name.clone(), obj.clone());
        self.core.notify(ObjectRef::of::<T>(name));
        Ok(obj)
    }

    /// Replace an existing object, enforcing optimistic concurrency
    ///
    /// The caller's `resourceVersion` must match the stored one; a mismatch
    /// means someone else wrote in between and the caller should re-fetch
    /// on its next pass.
    pub fn update(&self, mut obj: T) -> Result<T> {
        let name = required_name(&obj)?;
        {
            let mut entry = self
                .objects
                .get_mut(&name)
                .ok_or_else(|| Error::not_found(T::KIND, name.clone()))?;
            if entry.metadata().resource_version != obj.metadata().resource_version {
                return Err(Error::conflict(T::KIND, name));
            }
            obj.metadata_mut().resource_version = Some(self.core.next_version());
            *entry = obj.clone();
        }
        self.core.notify(ObjectRef::of::<T>(name));
        Ok(obj)
    }

    /// Mutate an existing object in place under the bucket lock
    ///
    /// Cannot conflict; intended for collaborators that own the object
    /// (e.g. the file watcher appending events).
    pub fn update_with(&self, name: &str, f: impl FnOnce(&mut T)) -> Result<T> {
        let updated = {
            let mut entry = self
                .objects
                .get_mut(name)
                .ok_or_else(|| Error::not_found(T::KIND, name))?;
            f(entry.value_mut());
            entry.metadata_mut().resource_version = Some(self.core.next_version());
            entry.value().clone()
        };
        self.core.notify(ObjectRef::of::<T>(name));
        Ok(updated)
    }

    /// Remove the named object
    pub fn delete(&self, name: &str) -> Result<T> {
        let (_, obj) = self
            .objects
            .remove(name)
            .ok_or_else(|| Error::not_found(T::KIND, name))?;
        self.core.notify(ObjectRef::of::<T>(name));
        Ok(obj)
    }
}

fn required_name<T: ApiObject>(obj: &T) -> Result<String> {
    let name = obj.name();
    if name.is_empty() {
        return Err(Error::validation(format!("{} needs metadata.name", T::KIND)));
    }
    Ok(name.to_string())
}

/// The full set of object buckets the engine touches
///
/// Internally synchronized; safe to share across reconcilers and the
/// surrounding tool's subsystems.
pub struct ObjectStore {
    core: Arc<StoreCore>,
    live_updates: TypedStore<LiveUpdate>,
    file_watches: TypedStore<FileWatch>,
    image_maps: TypedStore<ImageMap>,
    kubernetes_applies: TypedStore<KubernetesApply>,
    kubernetes_discoveries: TypedStore<KubernetesDiscovery>,
    docker_compose_services: TypedStore<DockerComposeService>,
    config_maps: TypedStore<ConfigMap>,
}

impl ObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        let core = Arc::new(StoreCore {
            version: AtomicU64::new(0),
            watchers: Mutex::new(Vec::new()),
        });
        Self {
            live_updates: TypedStore::new(core.clone()),
            file_watches: TypedStore::new(core.clone()),
            image_maps: TypedStore::new(core.clone()),
            kubernetes_applies: TypedStore::new(core.clone()),
            kubernetes_discoveries: TypedStore::new(core.clone()),
            docker_compose_services: TypedStore::new(core.clone()),
            config_maps: TypedStore::new(core.clone()),
            core,
        }
    }

    /// Subscribe to object change notifications
    ///
    /// Every successful create/update/delete sends the changed object's
    /// reference. Dropped receivers are pruned on the next notification.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<ObjectRef> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.core
            .watchers
            .lock()
            .expect("store watcher lock poisoned")
            .push(tx);
        rx
    }

    /// LiveUpdate objects
    pub fn live_updates(&self) -> &TypedStore<LiveUpdate> {
        &self.live_updates
    }

    /// FileWatch objects
    pub fn file_watches(&self) -> &TypedStore<FileWatch> {
        &self.file_watches
    }

    /// ImageMap objects
    pub fn image_maps(&self) -> &TypedStore<ImageMap> {
        &self.image_maps
    }

    /// KubernetesApply objects
    pub fn kubernetes_applies(&self) -> &TypedStore<KubernetesApply> {
        &self.kubernetes_applies
    }

    /// KubernetesDiscovery objects
    pub fn kubernetes_discoveries(&self) -> &TypedStore<KubernetesDiscovery> {
        &self.kubernetes_discoveries
    }

    /// DockerComposeService objects
    pub fn docker_compose_services(&self) -> &TypedStore<DockerComposeService> {
        &self.docker_compose_services
    }

    /// ConfigMap objects
    pub fn config_maps(&self) -> &TypedStore<ConfigMap> {
        &self.config_maps
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}
