//! The plan builder: a pure function from observed state to one action
//!
//! Everything the decision depends on arrives as an explicit input,
//! including the current time. Side effects live in the executor; keeping
//! this function pure is what makes the engine's ordering guarantees
//! testable.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;

use crate::api::{FailureReason, LiveUpdateExec, LiveUpdateSpec, UpdateMode};
use crate::executor::PathMapping;
use crate::monitor::{Clocks, Monitor, TerminalFailure};
use crate::selector::{ResolvedSelector, TargetContainer};

/// What this reconcile pass should do
#[derive(Debug)]
pub(crate) enum Plan {
    /// Nothing to deliver; refresh status only
    Noop,

    /// Files are ready but manual mode gates them on the trigger queue
    WaitForTrigger,

    /// Record (or keep) a terminal failure
    Fail(TerminalFailure),

    /// Invoke the container updater
    Update(UpdatePlan),
}

/// A concrete update for the executor
#[derive(Debug)]
pub(crate) struct UpdatePlan {
    /// Per-container file sets; only containers with something new to
    /// deliver appear here
    pub(crate) targets: Vec<TargetUpdate>,

    /// Commands to run after the sync, already filtered by trigger paths
    pub(crate) cmds: Vec<Vec<String>>,

    /// Leave the container running after the sync
    pub(crate) hot_reload: bool,
}

/// Files destined for one container
#[derive(Debug)]
pub(crate) struct TargetUpdate {
    /// The container to update
    pub(crate) container: TargetContainer,

    /// Files to deliver, ordered by local path
    pub(crate) files: Vec<PathMapping>,

    /// Newest modification time among `files`; becomes the container's
    /// delivery watermark on success
    pub(crate) newest_mod_time: MicroTime,
}

/// Everything the decision depends on
pub(crate) struct PlanInputs<'a> {
    pub(crate) spec: &'a LiveUpdateSpec,
    pub(crate) resolved: &'a ResolvedSelector,
    pub(crate) clocks: &'a Clocks,
    pub(crate) update_mode: UpdateMode,
    pub(crate) in_trigger_queue: bool,
    pub(crate) now: MicroTime,
}

/// Decide what to do this pass
pub(crate) fn build(inputs: &PlanInputs<'_>, monitor: &Monitor) -> Plan {
    // A sticky failure that no newer build/apply/restart has cleared wins.
    if let Some(failure) = &monitor.terminal_failure {
        return Plan::Fail(failure.clone());
    }

    if let Some((reason, message)) = &inputs.resolved.terminal {
        return Plan::Fail(TerminalFailure {
            reason: *reason,
            message: message.clone(),
            clear_after: inputs.now.clone(),
        });
    }

    let spec = inputs.spec;
    let changed = monitor.changed_paths();
    let invalidation = inputs.clocks.invalidation_time();

    // A touched stop path newer than every external clock stops the show.
    // The newest hit decides, so the failure survives exactly until a
    // build/apply passes it.
    let mut stop_hit: Option<(&String, &MicroTime)> = None;
    for (path, time) in &changed {
        if !is_stop_path(spec, path) {
            continue;
        }
        if invalidation.is_some_and(|clock| clock.0 >= time.0) {
            continue;
        }
        if stop_hit.is_none_or(|(_, prev)| time.0 > prev.0) {
            stop_hit = Some((path, time));
        }
    }
    if let Some((path, time)) = stop_hit {
        return Plan::Fail(TerminalFailure {
            reason: FailureReason::UpdateStopped,
            message: format!("Detected change to stop path {path:?}"),
            clear_after: time.clone(),
        });
    }

    let mut targets = Vec::new();
    for target in &inputs.resolved.targets {
        let synced = monitor.synced_time_by_container.get(&target.container_id);
        let mut files = Vec::new();
        let mut newest: Option<MicroTime> = None;
        for (path, time) in &changed {
            let Some(container_path) = dest_path(spec, path) else {
                continue;
            };
            if invalidation.is_some_and(|clock| clock.0 >= time.0) {
                continue;
            }
            if target.started_at.as_ref().is_some_and(|s| s.0 >= time.0) {
                continue;
            }
            if synced.is_some_and(|s| s.0 >= time.0) {
                continue;
            }
            files.push(PathMapping {
                local_path: PathBuf::from(path),
                container_path,
            });
            if newest.as_ref().is_none_or(|n| time.0 > n.0) {
                newest = Some(time.clone());
            }
        }
        if let Some(newest_mod_time) = newest {
            targets.push(TargetUpdate {
                container: target.clone(),
                files,
                newest_mod_time,
            });
        }
    }

    if targets.is_empty() {
        return Plan::Noop;
    }

    if inputs.update_mode == UpdateMode::Manual && !inputs.in_trigger_queue {
        return Plan::WaitForTrigger;
    }

    let changed_files: BTreeSet<&Path> = targets
        .iter()
        .flat_map(|t| t.files.iter())
        .map(|f| f.local_path.as_path())
        .collect();
    let cmds = spec
        .execs
        .iter()
        .filter(|exec| exec_triggered(spec, exec, &changed_files))
        .map(|exec| exec.args.clone())
        .collect();

    Plan::Update(UpdatePlan {
        targets,
        cmds,
        hot_reload: spec.restart != crate::api::LiveUpdateRestartStrategy::Always,
    })
}

/// Resolve a spec-relative path against the base path
fn abs_path(base_path: &str, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        Path::new(base_path).join(p)
    }
}

/// Where a changed file lands in the container, per the first matching
/// sync rule; `None` means the file is irrelevant to this LiveUpdate
fn dest_path(spec: &LiveUpdateSpec, file: &str) -> Option<String> {
    let file_path = Path::new(file);
    for sync in &spec.syncs {
        let local = abs_path(&spec.base_path, &sync.local_path);
        if let Ok(rel) = file_path.strip_prefix(&local) {
            let rel = rel.to_string_lossy();
            if rel.is_empty() {
                return Some(sync.container_path.clone());
            }
            let container = sync.container_path.trim_end_matches('/');
            return Some(format!("{container}/{rel}"));
        }
    }
    None
}

fn is_stop_path(spec: &LiveUpdateSpec, file: &str) -> bool {
    let file_path = Path::new(file);
    spec.stop_paths
        .iter()
        .any(|stop| file_path.strip_prefix(abs_path(&spec.base_path, stop)).is_ok())
}

/// Whether an exec's trigger paths match any synced file
///
/// A trigger matches a file that equals it, lies under it, or glob-matches
/// it, always resolved against the base path.
fn exec_triggered(spec: &LiveUpdateSpec, exec: &LiveUpdateExec, changed: &BTreeSet<&Path>) -> bool {
    if exec.trigger_paths.is_empty() {
        return true;
    }
    exec.trigger_paths.iter().any(|trigger| {
        let trigger = abs_path(&spec.base_path, trigger);
        let pattern = glob::Pattern::new(&trigger.to_string_lossy()).ok();
        changed.iter().any(|file| {
            file.strip_prefix(&trigger).is_ok()
                || pattern
                    .as_ref()
                    .is_some_and(|p| p.matches(&file.to_string_lossy()))
        })
    })
}
