//! The FileWatch object (read-only input)

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ApiObject;

/// A file watch maintained by the file-watch subsystem
///
/// The engine only reads the append-only event list; watching itself is an
/// external collaborator's job.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileWatch {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// What to watch
    #[serde(default)]
    pub spec: FileWatchSpec,

    /// Observed file events
    #[serde(default)]
    pub status: FileWatchStatus,
}

impl ApiObject for FileWatch {
    const KIND: &'static str = "FileWatch";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Desired state of a FileWatch
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileWatchSpec {
    /// Absolute directories and files under watch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watched_paths: Vec<String>,
}

/// Observed state of a FileWatch
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileWatchStatus {
    /// When the watcher started monitoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_start_time: Option<MicroTime>,

    /// Append-only sequence of observed file changes, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_events: Vec<FileEvent>,

    /// Set when the watcher itself is broken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A batch of file changes observed at one instant
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    /// When the change was observed
    pub time: MicroTime,

    /// Absolute paths seen changing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seen_files: Vec<String>,
}
