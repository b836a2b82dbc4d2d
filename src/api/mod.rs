//! Typed API objects consumed and produced by the live-update engine
//!
//! These are snapshots of the surrounding tool's objects: the engine owns
//! the [`LiveUpdate`] object and reads everything else. Objects refer to one
//! another by name, never by pointer; every reconcile re-fetches (the
//! reference graph is cyclic).

mod configmap;
mod dockercompose;
mod filewatch;
mod imagemap;
mod kubernetes;
mod liveupdate;

use chrono::{Timelike, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};

pub use configmap::ConfigMap;
pub use dockercompose::{
    DockerComposeService, DockerComposeServiceSpec, DockerComposeServiceStatus,
    DockerContainerState, DockerContainerStatus,
};
pub use filewatch::{FileEvent, FileWatch, FileWatchSpec, FileWatchStatus};
pub use imagemap::{ImageMap, ImageMapSpec, ImageMapStatus};
pub use kubernetes::{
    Container, ContainerState, ContainerStateRunning, ContainerStateTerminated,
    ContainerStateWaiting, KubernetesApply, KubernetesApplySpec, KubernetesApplyStatus,
    KubernetesDiscovery, KubernetesDiscoveryStatus, Pod,
};
pub use liveupdate::{
    FailureReason, LiveUpdate, LiveUpdateContainerStatus, LiveUpdateDockerComposeSelector,
    LiveUpdateExec, LiveUpdateKubernetesSelector, LiveUpdateRestartStrategy, LiveUpdateSelector,
    LiveUpdateSource, LiveUpdateSpec, LiveUpdateStateFailed, LiveUpdateStateWaiting,
    LiveUpdateStatus, LiveUpdateSync, UpdateMode, WaitingReason, ANNOTATION_MANIFEST,
    ANNOTATION_UPDATE_MODE,
};

/// An object served by the in-process store
///
/// Mirrors the shape of a Kubernetes API object: standard metadata plus
/// kind-specific spec/status. The constant kind is what the indexer and
/// object references key on.
pub trait ApiObject: Clone + PartialEq + Send + Sync + 'static {
    /// Kind discriminator, e.g. `"LiveUpdate"`
    const KIND: &'static str;

    /// Standard object metadata
    fn metadata(&self) -> &ObjectMeta;

    /// Mutable access to the standard object metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// The object name, or `""` when metadata carries none
    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }
}

/// A (kind, name) reference to an object in the store
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Kind of the referenced object
    pub kind: &'static str,
    /// Name of the referenced object
    pub name: String,
}

impl ObjectRef {
    /// Build a reference to an object of kind `T`
    pub fn of<T: ApiObject>(name: impl Into<String>) -> Self {
        Self {
            kind: T::KIND,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// The current wall-clock time, truncated to microsecond precision
///
/// Event, build, and apply times all carry microsecond precision on the
/// wire; truncating here keeps comparisons stable across a serialization
/// round trip.
pub fn now_micro() -> MicroTime {
    let now = Utc::now();
    let truncated = now
        .with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now);
    MicroTime(truncated)
}
