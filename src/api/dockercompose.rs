//! The DockerComposeService object (read-only input)

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ApiObject;

/// Status of one Docker Compose service
///
/// A Compose service has at most one container. Unlike Kubernetes pods,
/// that container can be restarted in place with its filesystem preserved,
/// so a `startedAt` advance both supersedes stale file events and clears
/// sticky failures.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerComposeService {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Service identity, owned by the Compose subsystem
    #[serde(default)]
    pub spec: DockerComposeServiceSpec,

    /// Observed container state
    #[serde(default)]
    pub status: DockerComposeServiceStatus,
}

impl ApiObject for DockerComposeService {
    const KIND: &'static str = "DockerComposeService";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Desired state of a DockerComposeService (opaque to this engine)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerComposeServiceSpec {
    /// Service name within the Compose project
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,

    /// Compose project name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
}

/// Observed state of a DockerComposeService
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerComposeServiceStatus {
    /// Runtime ID of the service's container
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,

    /// State of the service's container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_state: Option<DockerContainerState>,
}

/// Docker container state snapshot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerContainerState {
    /// Docker lifecycle status
    #[serde(default)]
    pub status: DockerContainerStatus,

    /// When the container (last) started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<MicroTime>,
}

/// Docker container lifecycle states
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DockerContainerStatus {
    /// Created but never started
    #[default]
    Created,
    /// Running
    Running,
    /// Paused
    Paused,
    /// Restarting
    Restarting,
    /// Being removed
    Removing,
    /// Exited
    Exited,
    /// Dead
    Dead,
}

impl std::fmt::Display for DockerContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
        };
        write!(f, "{s}")
    }
}
