//! Kubernetes-side external objects (read-only inputs)
//!
//! `KubernetesApply` is consumed only for its apply clock; the engine never
//! looks inside the YAML. `KubernetesDiscovery` is the pod/container
//! snapshot the selector resolves against.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ApiObject;

/// Result of applying manifests to the cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesApply {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// What gets applied, owned by the apply subsystem
    #[serde(default)]
    pub spec: KubernetesApplySpec,

    /// Apply outcome
    #[serde(default)]
    pub status: KubernetesApplyStatus,
}

impl ApiObject for KubernetesApply {
    const KIND: &'static str = "KubernetesApply";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Desired state of a KubernetesApply (opaque to this engine)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesApplySpec {
    /// Manifest YAML to apply
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub yaml: String,

    /// ImageMaps injected into the YAML before applying
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_maps: Vec<String>,
}

/// Observed state of a KubernetesApply
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesApplyStatus {
    /// When the most recent apply started; deployed pods carry at least
    /// this state, so older file events are superseded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_apply_start_time: Option<MicroTime>,

    /// Set when the apply failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of pods discovered for one deployed workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesDiscovery {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Discovered pods
    #[serde(default)]
    pub status: KubernetesDiscoveryStatus,
}

impl ApiObject for KubernetesDiscovery {
    const KIND: &'static str = "KubernetesDiscovery";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Observed state of a KubernetesDiscovery
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesDiscoveryStatus {
    /// When pod discovery started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_start_time: Option<MicroTime>,

    /// Pods matching the workload, most recent first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pods: Vec<Pod>,
}

/// A discovered pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// Pod name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Pod namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Init containers; these are never live-update targets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,

    /// Application containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
}

/// A container inside a discovered pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name from the pod spec
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Runtime container ID; empty until the runtime assigns one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Image reference the container is running
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Whether the readiness probe passes
    #[serde(default)]
    pub ready: bool,

    /// Current container state
    #[serde(default)]
    pub state: ContainerState,
}

/// Container state, mirroring the Kubernetes one-of
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// Set while the container waits to start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<ContainerStateWaiting>,

    /// Set while the container runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<ContainerStateRunning>,

    /// Set once the container exited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<ContainerStateTerminated>,
}

/// Waiting container state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateWaiting {
    /// Kubernetes waiting reason, e.g. `PodInitializing` or
    /// `CrashLoopBackOff`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Running container state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateRunning {
    /// When this container instance started; file events older than this
    /// were baked into the image or lost with the previous instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<MicroTime>,
}

/// Terminated container state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateTerminated {
    /// Exit code of the terminated container
    #[serde(default)]
    pub exit_code: i32,

    /// Kubernetes termination reason
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl ContainerState {
    /// The waiting reason Kubernetes reports for a crash-looping container
    pub const CRASH_LOOP_BACK_OFF: &'static str = "CrashLoopBackOff";

    /// True if the container is in CrashLoopBackOff
    pub fn is_crash_looping(&self) -> bool {
        self.waiting
            .as_ref()
            .is_some_and(|w| w.reason == Self::CRASH_LOOP_BACK_OFF)
    }
}
