//! Reverse index from external objects to the LiveUpdates that read them
//!
//! This is what makes the reconciler level-triggered on all of its inputs:
//! when any referenced object changes, the index answers "which LiveUpdates
//! care?" and those names get enqueued.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::api::{
    ConfigMap, DockerComposeService, FileWatch, ImageMap, KubernetesApply, KubernetesDiscovery,
    LiveUpdateSelector, LiveUpdateSpec, ObjectRef,
};
use crate::trigger::TRIGGER_QUEUE_NAME;

/// Reverse index keyed by (kind, name) references
#[derive(Default)]
pub struct Indexer {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    refs_by_owner: HashMap<String, HashSet<ObjectRef>>,
    owners_by_ref: HashMap<ObjectRef, HashSet<String>>,
}

impl Indexer {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the references recorded for one LiveUpdate
    ///
    /// Called on every reconcile so the index always reflects the spec
    /// that was just observed.
    pub fn on_reconcile(&self, owner: &str, refs: HashSet<ObjectRef>) {
        let mut inner = self.inner.lock().expect("indexer lock poisoned");
        inner.remove_owner(owner);
        for reference in &refs {
            inner
                .owners_by_ref
                .entry(reference.clone())
                .or_default()
                .insert(owner.to_string());
        }
        inner.refs_by_owner.insert(owner.to_string(), refs);
    }

    /// Drop a deleted LiveUpdate from the index
    pub fn forget(&self, owner: &str) {
        self.inner
            .lock()
            .expect("indexer lock poisoned")
            .remove_owner(owner);
    }

    /// LiveUpdate names that reference the changed object, sorted
    pub fn owners_of(&self, reference: &ObjectRef) -> Vec<String> {
        let inner = self.inner.lock().expect("indexer lock poisoned");
        let mut owners: Vec<String> = inner
            .owners_by_ref
            .get(reference)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        owners.sort();
        owners
    }
}

impl Inner {
    fn remove_owner(&mut self, owner: &str) {
        if let Some(refs) = self.refs_by_owner.remove(owner) {
            for reference in refs {
                if let Some(owners) = self.owners_by_ref.get_mut(&reference) {
                    owners.remove(owner);
                    if owners.is_empty() {
                        self.owners_by_ref.remove(&reference);
                    }
                }
            }
        }
    }
}

/// Every object reference a LiveUpdate spec names
///
/// The trigger queue is included unconditionally: flipping a manifest into
/// the queue must wake manual-mode objects.
pub fn spec_references(spec: &LiveUpdateSpec) -> HashSet<ObjectRef> {
    let mut refs = HashSet::new();
    for source in &spec.sources {
        refs.insert(ObjectRef::of::<FileWatch>(source.file_watch.clone()));
        if let Some(image_map) = source.image_map.as_deref().filter(|s| !s.is_empty()) {
            refs.insert(ObjectRef::of::<ImageMap>(image_map));
        }
    }
    match &spec.selector {
        LiveUpdateSelector::Kubernetes(k8s) => {
            refs.insert(ObjectRef::of::<KubernetesDiscovery>(
                k8s.discovery_name.clone(),
            ));
            if let Some(apply) = k8s.apply_name.as_deref().filter(|s| !s.is_empty()) {
                refs.insert(ObjectRef::of::<KubernetesApply>(apply));
            }
            if let Some(image_map) = k8s.image_map_name.as_deref().filter(|s| !s.is_empty()) {
                refs.insert(ObjectRef::of::<ImageMap>(image_map));
            }
        }
        LiveUpdateSelector::DockerCompose(dc) => {
            refs.insert(ObjectRef::of::<DockerComposeService>(dc.service.clone()));
        }
    }
    refs.insert(ObjectRef::of::<ConfigMap>(TRIGGER_QUEUE_NAME));
    refs
}
