//! Hand-rolled fakes for exercising the engine without a container runtime
//!
//! These ship as regular code (not test-only) so embedding tools can drive
//! the engine in their own tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::events::{BuildCompleted, BuildEventSink, BuildStarted};
use crate::executor::{ContainerUpdater, PathMapping, UpdateError};
use crate::selector::TargetContainer;

/// One recorded call to [`FakeContainerUpdater::update_container`]
#[derive(Clone, Debug)]
pub struct UpdateContainerCall {
    /// Container that was updated
    pub target: TargetContainer,

    /// Files that were delivered
    pub files: Vec<PathMapping>,

    /// Commands that were run
    pub cmds: Vec<Vec<String>>,

    /// Whether the container was left running
    pub hot_reload: bool,
}

/// A [`ContainerUpdater`] that records calls and can fail on demand
#[derive(Default)]
pub struct FakeContainerUpdater {
    calls: Mutex<Vec<UpdateContainerCall>>,
    errors: Mutex<VecDeque<UpdateError>>,
}

impl FakeContainerUpdater {
    /// Create a fake that succeeds on every call
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next call; later calls succeed again
    pub fn set_update_error(&self, err: UpdateError) {
        self.errors.lock().expect("fake updater lock poisoned").push_back(err);
    }

    /// Snapshot of every call made so far
    pub fn calls(&self) -> Vec<UpdateContainerCall> {
        self.calls.lock().expect("fake updater lock poisoned").clone()
    }

    /// Number of calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("fake updater lock poisoned").len()
    }
}

#[async_trait]
impl ContainerUpdater for FakeContainerUpdater {
    async fn update_container(
        &self,
        target: &TargetContainer,
        files: Vec<PathMapping>,
        cmds: Vec<Vec<String>>,
        hot_reload: bool,
    ) -> Result<(), UpdateError> {
        self.calls
            .lock()
            .expect("fake updater lock poisoned")
            .push(UpdateContainerCall {
                target: target.clone(),
                files,
                cmds,
                hot_reload,
            });
        match self.errors.lock().expect("fake updater lock poisoned").pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A [`BuildEventSink`] that records every event
#[derive(Default)]
pub struct RecordingEventSink {
    started: Mutex<Vec<BuildStarted>>,
    completed: Mutex<Vec<BuildCompleted>>,
}

impl RecordingEventSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Every build-started event so far
    pub fn started(&self) -> Vec<BuildStarted> {
        self.started.lock().expect("event sink lock poisoned").clone()
    }

    /// Every build-completed event so far
    pub fn completed(&self) -> Vec<BuildCompleted> {
        self.completed.lock().expect("event sink lock poisoned").clone()
    }

    /// The most recent build-started event, if any
    pub fn last_started(&self) -> Option<BuildStarted> {
        self.started.lock().expect("event sink lock poisoned").last().cloned()
    }

    /// The most recent build-completed event, if any
    pub fn last_completed(&self) -> Option<BuildCompleted> {
        self.completed.lock().expect("event sink lock poisoned").last().cloned()
    }
}

impl BuildEventSink for RecordingEventSink {
    fn build_started(&self, event: BuildStarted) {
        self.started.lock().expect("event sink lock poisoned").push(event);
    }

    fn build_completed(&self, event: BuildCompleted) {
        self.completed.lock().expect("event sink lock poisoned").push(event);
    }
}
