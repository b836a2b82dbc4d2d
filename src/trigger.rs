//! Trigger queue: the gate for manual-mode updates
//!
//! The queue is a ConfigMap whose entries map `"<N>-name"` keys to manifest
//! names the user explicitly asked to re-run. Membership is all that
//! matters here; consuming entries is another subsystem's job.

use crate::api::ConfigMap;

/// Name of the trigger-queue ConfigMap
pub const TRIGGER_QUEUE_NAME: &str = "tilt-trigger-queue";

/// True if the manifest is queued for a manual run
pub fn in_trigger_queue(queue: Option<&ConfigMap>, manifest_name: &str) -> bool {
    queue.is_some_and(|cm| cm.data.values().any(|v| v == manifest_name))
}
