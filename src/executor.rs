//! Container update execution
//!
//! The executor is the only part of the engine with side effects beyond
//! status writes: it streams files into containers through the
//! [`ContainerUpdater`] and brackets the work with build events. Targets
//! are updated one at a time; the first error skips the remainder for this
//! pass.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::api::{now_micro, FailureReason};
use crate::events::{BuildCompleted, BuildEventSink, BuildStarted};
use crate::monitor::{Monitor, TerminalFailure};
use crate::plan::UpdatePlan;
use crate::selector::TargetContainer;

/// One file to deliver: where it lives locally and where it lands in the
/// container
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathMapping {
    /// Absolute path on the developer's machine
    pub local_path: PathBuf,

    /// Absolute destination path inside the container
    pub container_path: String,
}

/// Errors from the container updater, classified for the engine
///
/// The classification matters: a command that ran and exited non-zero is a
/// normal development-loop event, while anything else means the update
/// itself could not be delivered.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// An in-container command ran and exited non-zero. The synced files
    /// are in place; the next file change retries the commands.
    #[error("{message}")]
    RunStepFailure {
        /// Output or summary of the failed command
        message: String,
        /// The command's exit code
        exit_code: i32,
    },

    /// The update could not be delivered (runtime unreachable, tar stream
    /// broken, container gone)
    #[error("{0}")]
    Infrastructure(String),
}

impl UpdateError {
    /// Create a run-step failure with the given message and exit code
    pub fn run_step_failure(message: impl Into<String>, exit_code: i32) -> Self {
        Self::RunStepFailure {
            message: message.into(),
            exit_code,
        }
    }

    /// Create an infrastructure error with the given message
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure(message.into())
    }

    /// True if this is a run-step (exec) failure
    pub fn is_run_step_failure(&self) -> bool {
        matches!(self, Self::RunStepFailure { .. })
    }
}

/// The one operation the engine needs from the container runtime
///
/// Implementations tar `files` into the container, run `cmds` in order,
/// and restart the container unless `hot_reload` is set. The call may
/// block for seconds; it is never interrupted mid-flight.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerUpdater: Send + Sync {
    /// Deliver files and run commands in one container
    async fn update_container(
        &self,
        target: &TargetContainer,
        files: Vec<PathMapping>,
        cmds: Vec<Vec<String>>,
        hot_reload: bool,
    ) -> Result<(), UpdateError>;
}

/// Run an update plan against every target, updating the monitor's
/// bookkeeping as containers succeed or fail
pub(crate) async fn execute(
    updater: &dyn ContainerUpdater,
    events: &dyn BuildEventSink,
    manifest_name: &str,
    plan: &UpdatePlan,
    monitor: &mut Monitor,
) {
    let start_time = now_micro();
    let files_changed: Vec<String> = plan
        .targets
        .iter()
        .flat_map(|t| t.files.iter())
        .map(|f| f.local_path.to_string_lossy().into_owned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    events.build_started(BuildStarted {
        manifest_name: manifest_name.to_string(),
        files_changed,
        start_time: start_time.clone(),
    });

    let mut error: Option<String> = None;
    for target in &plan.targets {
        let id = target.container.container_id.as_str();
        info!(
            container = id,
            files = target.files.len(),
            hot_reload = plan.hot_reload,
            "updating container"
        );
        let result = updater
            .update_container(
                &target.container,
                target.files.clone(),
                plan.cmds.clone(),
                plan.hot_reload,
            )
            .await;
        match result {
            Ok(()) => {
                monitor.note_synced(id, &target.newest_mod_time);
                monitor.last_exec_error_by_container.remove(id);
            }
            Err(UpdateError::RunStepFailure { message, exit_code }) => {
                // The files landed; only the command failed. Record it on
                // the container and move on when more files change.
                debug!(container = id, exit_code, "run step failed");
                monitor.note_synced(id, &target.newest_mod_time);
                monitor
                    .last_exec_error_by_container
                    .insert(id.to_string(), message.clone());
                error = Some(message);
                break;
            }
            Err(err) => {
                let message = format!("Updating container {id}: {err}");
                monitor.ensure_failure(TerminalFailure {
                    reason: FailureReason::UpdateFailed,
                    message: message.clone(),
                    clear_after: now_micro(),
                });
                error = Some(message);
                break;
            }
        }
    }

    events.build_completed(BuildCompleted {
        manifest_name: manifest_name.to_string(),
        start_time,
        finish_time: now_micro(),
        error,
    });
}
