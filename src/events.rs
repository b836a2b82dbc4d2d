//! Build lifecycle events
//!
//! The engine emits a `BuildStarted`/`BuildCompleted` pair around every
//! container update, keyed by the owning manifest name. Consuming them
//! (UI, logs, analytics) is the surrounding tool's concern.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;

#[cfg(test)]
use mockall::automock;

/// Emitted immediately before the container updater is invoked
#[derive(Clone, Debug, PartialEq)]
pub struct BuildStarted {
    /// Manifest the LiveUpdate belongs to
    pub manifest_name: String,

    /// Sorted local paths being delivered in this update
    pub files_changed: Vec<String>,

    /// When the update began
    pub start_time: MicroTime,
}

/// Emitted after the container updater returns
#[derive(Clone, Debug, PartialEq)]
pub struct BuildCompleted {
    /// Manifest the LiveUpdate belongs to
    pub manifest_name: String,

    /// When the update began
    pub start_time: MicroTime,

    /// When the update finished
    pub finish_time: MicroTime,

    /// Error message when the update failed (infrastructure or exec)
    pub error: Option<String>,
}

/// Destination for build events
///
/// Implementations must not block; dispatch happens on the reconcile path.
#[cfg_attr(test, automock)]
pub trait BuildEventSink: Send + Sync {
    /// Deliver a build-started event
    fn build_started(&self, event: BuildStarted);

    /// Deliver a build-completed event
    fn build_completed(&self, event: BuildCompleted);
}
