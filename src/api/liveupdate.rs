//! The LiveUpdate object
//!
//! A LiveUpdate is a declarative statement: "for the containers this
//! selector picks, copy files matching these syncs into the container and
//! optionally run these commands." The engine reconciles it against file
//! events, image builds, and container discovery.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ApiObject;
use crate::Error;

/// Annotation selecting between automatic and manual update mode
pub const ANNOTATION_UPDATE_MODE: &str = "tilt.dev/update-mode";

/// Annotation naming the manifest that owns this object
///
/// Used only to cross-reference the trigger queue and to key build events.
pub const ANNOTATION_MANIFEST: &str = "tilt.dev/manifest";

/// A LiveUpdate object: spec, status, and standard metadata
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdate {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired live-update behavior
    pub spec: LiveUpdateSpec,

    /// Observed live-update state
    #[serde(default)]
    pub status: LiveUpdateStatus,
}

impl ApiObject for LiveUpdate {
    const KIND: &'static str = "LiveUpdate";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl LiveUpdate {
    /// The update mode declared by the `tilt.dev/update-mode` annotation
    ///
    /// Unset or unrecognized values fall back to [`UpdateMode::Auto`].
    pub fn update_mode(&self) -> UpdateMode {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_UPDATE_MODE))
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// The owning manifest name, falling back to the object name
    pub fn manifest_name(&self) -> &str {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_MANIFEST))
            .map(String::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.name())
    }
}

/// Desired state of a LiveUpdate
///
/// Immutable within a single reconcile pass; a spec change resets the
/// engine's in-memory bookkeeping for the object.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateSpec {
    /// Absolute local directory used to resolve relative paths below
    pub base_path: String,

    /// Input sources: file watches paired with the image build (if any)
    /// whose advancement invalidates their older file events
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<LiveUpdateSource>,

    /// Which containers to update
    pub selector: LiveUpdateSelector,

    /// Ordered sync rules; the first rule whose localPath prefixes a
    /// changed file determines where it lands in the container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub syncs: Vec<LiveUpdateSync>,

    /// Commands to run in-container after a sync
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execs: Vec<LiveUpdateExec>,

    /// Paths that, when changed, permanently stop the live update until a
    /// newer build or apply supersedes the change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_paths: Vec<String>,

    /// Whether to restart the container after a sync
    #[serde(default, skip_serializing_if = "is_default_restart")]
    pub restart: LiveUpdateRestartStrategy,
}

fn is_default_restart(r: &LiveUpdateRestartStrategy) -> bool {
    *r == LiveUpdateRestartStrategy::None
}

impl LiveUpdateSpec {
    /// Validate the spec
    ///
    /// The engine treats an invalid spec as a programmer error in the
    /// surrounding tool rather than a reconcilable condition.
    pub fn validate(&self) -> Result<(), Error> {
        if self.base_path.is_empty() {
            return Err(Error::validation("basePath is required"));
        }
        for source in &self.sources {
            if source.file_watch.is_empty() {
                return Err(Error::validation("every source needs a fileWatch name"));
            }
        }
        self.selector.validate()
    }
}

/// One input source: a file watch, optionally tied to an image build
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateSource {
    /// Name of the FileWatch object to read file events from
    pub file_watch: String,

    /// Name of the ImageMap whose build start time invalidates file events
    /// that predate it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_map: Option<String>,
}

/// Which containers a LiveUpdate targets
///
/// Exactly one arm. The two arms have different invariants and different
/// "container started at" clocks, so this is a tagged variant rather than a
/// trait.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum LiveUpdateSelector {
    /// Select containers from Kubernetes pod discovery
    Kubernetes(LiveUpdateKubernetesSelector),

    /// Select the single container of a Docker Compose service
    DockerCompose(LiveUpdateDockerComposeSelector),
}

impl LiveUpdateSelector {
    fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Kubernetes(k) => k.validate(),
            Self::DockerCompose(dc) => {
                if dc.service.is_empty() {
                    return Err(Error::validation("dockerCompose selector needs a service"));
                }
                Ok(())
            }
        }
    }
}

/// Kubernetes container selection
///
/// `discovery_name` is required, plus at least one of `image_map_name`,
/// `container_name`, or `image` to pick containers out of the discovered
/// pods. Init containers are never selectable.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateKubernetesSelector {
    /// Name of the KubernetesDiscovery object listing candidate pods
    pub discovery_name: String,

    /// Name of the KubernetesApply whose apply start time supersedes older
    /// file events and clears stop-path failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_name: Option<String>,

    /// Name of an ImageMap; containers running the image it pushed to the
    /// cluster are selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_map_name: Option<String>,

    /// Select containers by container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Select containers by image reference (tags are ignored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl LiveUpdateKubernetesSelector {
    fn validate(&self) -> Result<(), Error> {
        if self.discovery_name.is_empty() {
            return Err(Error::validation("kubernetes selector needs a discoveryName"));
        }
        let has_match = self.image_map_name.as_deref().is_some_and(|s| !s.is_empty())
            || self.container_name.as_deref().is_some_and(|s| !s.is_empty())
            || self.image.as_deref().is_some_and(|s| !s.is_empty());
        if !has_match {
            return Err(Error::validation(
                "kubernetes selector needs one of imageMapName, containerName, or image",
            ));
        }
        Ok(())
    }
}

/// Docker Compose container selection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateDockerComposeSelector {
    /// Name of the DockerComposeService object to update
    pub service: String,
}

/// A sync rule mapping a host path into the container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateSync {
    /// Host path, absolute or relative to the spec's basePath
    pub local_path: String,

    /// Absolute destination path inside the container
    pub container_path: String,
}

/// An in-container command, optionally gated on trigger paths
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateExec {
    /// Command and arguments, exec-style (no shell)
    pub args: Vec<String>,

    /// If non-empty, the command runs only when a synced file equals, lies
    /// under, or glob-matches one of these paths (relative to basePath)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger_paths: Vec<String>,
}

/// Whether the container restarts after a sync
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LiveUpdateRestartStrategy {
    /// Hot reload: leave the container running (default)
    #[default]
    None,

    /// Restart the container after every sync
    Always,
}

/// Observed state of a LiveUpdate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateStatus {
    /// Set when the live update is terminally failed until superseded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<LiveUpdateStateFailed>,

    /// One entry per currently-selected target container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<LiveUpdateContainerStatus>,
}

/// Terminal failure state
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateStateFailed {
    /// Machine-readable failure category
    pub reason: FailureReason,

    /// Human-readable failure detail
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// When the failure was first observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<MicroTime>,
}

/// Why a live update is failed
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FailureReason {
    /// A referenced object does not exist; clears when it reappears
    ObjectNotFound,

    /// The selected container is terminated
    Terminated,

    /// The selected container entered CrashLoopBackOff; sticky within the
    /// container epoch even if the container reports Running again
    CrashLoopBackOff,

    /// A stop path was touched; cleared by a newer build or apply
    UpdateStopped,

    /// The container updater reported an infrastructure error; cleared by a
    /// newer build or apply
    UpdateFailed,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ObjectNotFound => "ObjectNotFound",
            Self::Terminated => "Terminated",
            Self::CrashLoopBackOff => "CrashLoopBackOff",
            Self::UpdateStopped => "UpdateStopped",
            Self::UpdateFailed => "UpdateFailed",
        };
        write!(f, "{s}")
    }
}

impl FailureReason {
    /// Whether transitions into this failure are worth a log line
    ///
    /// Transient conditions that resolve themselves stay quiet.
    pub fn loggable(&self) -> bool {
        !matches!(self, Self::ObjectNotFound)
    }
}

/// Per-container live-update status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateContainerStatus {
    /// Pod holding the container (Kubernetes only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    /// Namespace of the pod (Kubernetes only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Container name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_name: String,

    /// Runtime container ID; empty while the container is waiting
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,

    /// Modification time of the newest file delivered to this container;
    /// non-decreasing within a container epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_file_time_synced: Option<MicroTime>,

    /// Set while the container cannot be updated yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<LiveUpdateStateWaiting>,

    /// Message of the last in-container command that exited non-zero;
    /// retried on the next file change, never a terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exec_error: Option<String>,
}

/// Why a container is waiting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateStateWaiting {
    /// Machine-readable waiting category
    pub reason: WaitingReason,
}

/// Waiting categories
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum WaitingReason {
    /// The container is not running yet or has no runtime ID
    ContainerWaiting,

    /// Manual update mode: waiting for the manifest to be triggered
    Trigger,
}

impl std::fmt::Display for WaitingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContainerWaiting => write!(f, "ContainerWaiting"),
            Self::Trigger => write!(f, "Trigger"),
        }
    }
}

/// Automatic vs. manual update gating, from the update-mode annotation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Sync as soon as files change (default)
    #[default]
    Auto,

    /// Sync only when the manifest is in the trigger queue
    Manual,
}

impl std::str::FromStr for UpdateMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            _ => Err(Error::validation(format!(
                "invalid update mode: {s}, expected auto or manual"
            ))),
        }
    }
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
        }
    }
}
