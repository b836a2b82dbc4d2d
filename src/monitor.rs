//! Per-LiveUpdate in-process state
//!
//! A monitor is the engine's durable memory for one LiveUpdate: which file
//! events it has folded in, which external clocks it has observed, what it
//! has already delivered to each container, and whether it is terminally
//! failed. Monitors live for the life of the reconciler and are never
//! persisted; a spec change resets the monitor wholesale.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;

use crate::api::{FailureReason, FileWatch, LiveUpdateSpec};

/// Durable in-memory state for one LiveUpdate object
#[derive(Debug)]
pub(crate) struct Monitor {
    /// The spec this state was accumulated under
    pub(crate) spec: LiveUpdateSpec,

    /// Per-FileWatch event ledger
    pub(crate) sources: HashMap<String, MonitorSource>,

    /// Most recent build start time per ImageMap name
    pub(crate) last_image_build_start: HashMap<String, MicroTime>,

    /// Most recent apply start time of the selected KubernetesApply
    pub(crate) last_kubernetes_apply_start: Option<MicroTime>,

    /// Last KubernetesDiscovery snapshot observed
    pub(crate) last_kubernetes_discovery: Option<crate::api::KubernetesDiscovery>,

    /// Last DockerComposeService snapshot observed
    pub(crate) last_docker_compose_service: Option<crate::api::DockerComposeService>,

    /// Most recent Compose container start time
    pub(crate) last_docker_compose_start: Option<MicroTime>,

    /// Container instance identity: ID to the startedAt we saw for it
    pub(crate) container_epochs: HashMap<String, Option<MicroTime>>,

    /// High-watermark of file times already delivered, per container ID
    pub(crate) synced_time_by_container: HashMap<String, MicroTime>,

    /// Message of the last failed in-container command, per container ID
    pub(crate) last_exec_error_by_container: HashMap<String, String>,

    /// Sticky terminal failure, if any
    pub(crate) terminal_failure: Option<TerminalFailure>,
}

/// Event ledger for one FileWatch source
#[derive(Debug, Default, PartialEq)]
pub(crate) struct MonitorSource {
    /// Newest observed modification time per path
    pub(crate) mod_time_by_path: BTreeMap<String, MicroTime>,

    /// Time of the newest file event folded in; events at or before this
    /// are already consumed
    pub(crate) last_event_observed: Option<MicroTime>,
}

/// A sticky failure recorded in the monitor
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TerminalFailure {
    /// Failure category
    pub(crate) reason: FailureReason,

    /// Human-readable detail
    pub(crate) message: String,

    /// An external clock must advance past this instant to clear the
    /// failure. For a stop path this is the stop file's modification time;
    /// for everything else it is the observation time.
    pub(crate) clear_after: MicroTime,
}

/// External clocks that supersede file events and clear failures
///
/// `build_start` is the maximum build start across every image map the
/// spec names (sources and selector); only the clocks applicable to the
/// selector arm are set.
#[derive(Clone, Debug, Default)]
pub(crate) struct Clocks {
    pub(crate) build_start: Option<MicroTime>,
    pub(crate) apply_start: Option<MicroTime>,
    pub(crate) compose_start: Option<MicroTime>,
}

impl Clocks {
    /// The newest clock, if any; file events at or before this are
    /// consumed by the build/apply/restart they predate
    pub(crate) fn invalidation_time(&self) -> Option<&MicroTime> {
        [&self.build_start, &self.apply_start, &self.compose_start]
            .into_iter()
            .flatten()
            .max_by(|a, b| a.0.cmp(&b.0))
    }

    /// True if any clock is strictly after the given instant
    pub(crate) fn any_after(&self, t: &MicroTime) -> bool {
        self.invalidation_time().is_some_and(|c| c.0 > t.0)
    }
}

impl Monitor {
    pub(crate) fn new(spec: LiveUpdateSpec) -> Self {
        Self {
            spec,
            sources: HashMap::new(),
            last_image_build_start: HashMap::new(),
            last_kubernetes_apply_start: None,
            last_kubernetes_discovery: None,
            last_docker_compose_service: None,
            last_docker_compose_start: None,
            container_epochs: HashMap::new(),
            synced_time_by_container: HashMap::new(),
            last_exec_error_by_container: HashMap::new(),
            terminal_failure: None,
        }
    }

    /// Fold new file events from one source into the ledger
    ///
    /// Every seen path is recorded, whether or not any sync rule matches
    /// it; filtering happens at plan time, and recording everything keeps
    /// `lastEventObserved` monotonic.
    pub(crate) fn absorb_file_events(&mut self, fw_name: &str, fw: &FileWatch) {
        if fw.status.file_events.is_empty() {
            return;
        }
        let source = self.sources.entry(fw_name.to_string()).or_default();
        for event in &fw.status.file_events {
            if source
                .last_event_observed
                .as_ref()
                .is_some_and(|seen| event.time.0 <= seen.0)
            {
                continue;
            }
            for path in &event.seen_files {
                match source.mod_time_by_path.get_mut(path) {
                    Some(existing) if existing.0 >= event.time.0 => {}
                    Some(existing) => *existing = event.time.clone(),
                    None => {
                        source
                            .mod_time_by_path
                            .insert(path.clone(), event.time.clone());
                    }
                }
            }
            source.last_event_observed = Some(event.time.clone());
        }
    }

    /// Record an image map's build start time
    pub(crate) fn note_image_build(&mut self, image_map: &str, start: Option<&MicroTime>) {
        if let Some(start) = start {
            self.last_image_build_start
                .insert(image_map.to_string(), start.clone());
        }
    }

    /// The maximum build start across every recorded image map
    pub(crate) fn max_image_build_start(&self) -> Option<MicroTime> {
        self.last_image_build_start
            .values()
            .max_by(|a, b| a.0.cmp(&b.0))
            .cloned()
    }

    /// Union of all sources' path ledgers, newest time per path
    pub(crate) fn changed_paths(&self) -> BTreeMap<String, MicroTime> {
        let mut out: BTreeMap<String, MicroTime> = BTreeMap::new();
        for source in self.sources.values() {
            for (path, time) in &source.mod_time_by_path {
                match out.get_mut(path) {
                    Some(existing) if existing.0 >= time.0 => {}
                    Some(existing) => *existing = time.clone(),
                    None => {
                        out.insert(path.clone(), time.clone());
                    }
                }
            }
        }
        out
    }

    /// Track a container instance and invalidate the delivery watermark
    /// when a genuinely new instance replaced the one we synced into
    ///
    /// A `startedAt` change alone is not enough: Compose restarts a
    /// container in place with its filesystem intact, so files delivered
    /// before the restart are still there. The watermark is dropped only
    /// when the instance started after our last delivery.
    pub(crate) fn observe_container(&mut self, id: &str, started_at: Option<&MicroTime>) {
        if id.is_empty() {
            return;
        }
        let changed = self
            .container_epochs
            .get(id)
            .map_or(true, |prev| prev.as_ref() != started_at);
        if !changed {
            return;
        }
        if let (Some(start), Some(synced)) = (started_at, self.synced_time_by_container.get(id)) {
            if start.0 > synced.0 {
                self.synced_time_by_container.remove(id);
                self.last_exec_error_by_container.remove(id);
            }
        }
        self.container_epochs
            .insert(id.to_string(), started_at.cloned());
    }

    /// Advance a container's delivery watermark; never moves backwards
    pub(crate) fn note_synced(&mut self, id: &str, time: &MicroTime) {
        match self.synced_time_by_container.get_mut(id) {
            Some(existing) if existing.0 >= time.0 => {}
            Some(existing) => *existing = time.clone(),
            None => {
                self.synced_time_by_container
                    .insert(id.to_string(), time.clone());
            }
        }
    }

    /// Record a sticky failure unless one is already in place
    pub(crate) fn ensure_failure(&mut self, failure: TerminalFailure) {
        if self.terminal_failure.is_none() {
            self.terminal_failure = Some(failure);
        }
    }

    /// Drop the sticky failure if an external clock superseded it
    pub(crate) fn clear_failure_if_superseded(&mut self, clocks: &Clocks) {
        if let Some(failure) = &self.terminal_failure {
            if clocks.any_after(&failure.clear_after) {
                self.terminal_failure = None;
            }
        }
    }
}
