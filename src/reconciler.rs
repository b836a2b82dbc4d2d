//! The LiveUpdate reconciler
//!
//! `reconcile` is the level-triggered entry point: it re-reads everything
//! it depends on, folds new file events into the object's monitor, decides
//! on exactly one action, and writes status only when it changed. Calling
//! it again with no input change is a no-op, which is what makes the whole
//! engine safe to re-trigger aggressively.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::api::{
    now_micro, ApiObject, ConfigMap, DockerComposeService, FailureReason, FileWatch, ImageMap,
    KubernetesApply, KubernetesDiscovery, LiveUpdate, LiveUpdateContainerStatus, LiveUpdateSelector,
    LiveUpdateSpec, LiveUpdateStateFailed, LiveUpdateStateWaiting, LiveUpdateStatus, WaitingReason,
};
use crate::events::BuildEventSink;
use crate::executor::{self, ContainerUpdater};
use crate::indexer::{spec_references, Indexer};
use crate::monitor::{Clocks, Monitor, TerminalFailure};
use crate::plan::{self, Plan, PlanInputs};
use crate::selector::{self, ResolvedSelector};
use crate::store::ObjectStore;
use crate::trigger::{in_trigger_queue, TRIGGER_QUEUE_NAME};
use crate::{Error, Result};

/// Reconciles LiveUpdate objects against their inputs
///
/// One reconciler serves every LiveUpdate; per-object state lives in the
/// monitor map. The map itself is guarded by a single lock, but only the
/// lookup goes through it; each monitor is then locked individually, and
/// the runner guarantees at most one reconcile per name at a time.
pub struct Reconciler {
    store: Arc<ObjectStore>,
    updater: Arc<dyn ContainerUpdater>,
    events: Arc<dyn BuildEventSink>,
    indexer: Arc<Indexer>,
    monitors: Mutex<HashMap<String, Arc<AsyncMutex<Monitor>>>>,
}

/// Snapshot of every external object one reconcile pass reads
struct Inputs {
    file_watches: Vec<(String, FileWatch)>,
    image_maps: HashMap<String, ImageMap>,
    selector_image_map: Option<ImageMap>,
    apply: Option<KubernetesApply>,
    discovery: Option<KubernetesDiscovery>,
    compose: Option<DockerComposeService>,
    trigger_queue: Option<ConfigMap>,
}

impl Reconciler {
    /// Create a reconciler over the given store, updater, and event sink
    pub fn new(
        store: Arc<ObjectStore>,
        updater: Arc<dyn ContainerUpdater>,
        events: Arc<dyn BuildEventSink>,
    ) -> Self {
        Self {
            store,
            updater,
            events,
            indexer: Arc::new(Indexer::new()),
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// The reverse index kept current by this reconciler
    pub fn indexer(&self) -> Arc<Indexer> {
        self.indexer.clone()
    }

    /// The object store this reconciler reads and writes
    pub fn store(&self) -> Arc<ObjectStore> {
        self.store.clone()
    }

    /// Reconcile one LiveUpdate by name
    ///
    /// Idempotent: with no input change, a second call makes no updater
    /// calls and leaves the object's `resourceVersion` untouched.
    /// Cancellation is cooperative; an in-flight container update always
    /// runs to completion.
    #[instrument(skip_all, fields(live_update = %name))]
    pub async fn reconcile(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let Some(lu) = self.store.live_updates().get(name) else {
            debug!("live update deleted, dropping monitor");
            self.monitors
                .lock()
                .expect("monitor map lock poisoned")
                .remove(name);
            self.indexer.forget(name);
            return Ok(());
        };

        self.indexer.on_reconcile(name, spec_references(&lu.spec));
        lu.spec.validate()?;

        let inputs = match self.fetch_inputs(&lu.spec) {
            Ok(inputs) => inputs,
            Err(Error::NotFound { kind, name: missing }) => {
                // Expected transient: the referenced object may simply not
                // exist yet, and its creation re-enqueues us.
                let failure = LiveUpdateStateFailed {
                    reason: FailureReason::ObjectNotFound,
                    message: format!("{kind} {missing:?} not found"),
                    last_transition_time: Some(now_micro()),
                };
                return self.write_failed_status(&lu, failure);
            }
            Err(err) => return Err(err),
        };

        let handle = self.ensure_monitor(name, &lu.spec);
        let mut monitor = handle.lock().await;
        if monitor.spec != lu.spec {
            *monitor = Monitor::new(lu.spec.clone());
        }

        for (fw_name, fw) in &inputs.file_watches {
            monitor.absorb_file_events(fw_name, fw);
        }
        for (im_name, im) in &inputs.image_maps {
            monitor.note_image_build(im_name, im.status.build_start_time.as_ref());
        }
        monitor.last_kubernetes_apply_start = inputs
            .apply
            .as_ref()
            .and_then(|a| a.status.last_apply_start_time.clone());
        monitor.last_docker_compose_start = inputs
            .compose
            .as_ref()
            .and_then(|c| c.status.container_state.as_ref())
            .and_then(|s| s.started_at.clone());
        monitor.last_kubernetes_discovery = inputs.discovery.clone();
        monitor.last_docker_compose_service = inputs.compose.clone();

        let clocks = Clocks {
            build_start: monitor.max_image_build_start(),
            apply_start: monitor.last_kubernetes_apply_start.clone(),
            compose_start: monitor.last_docker_compose_start.clone(),
        };
        monitor.clear_failure_if_superseded(&clocks);

        let resolved = selector::resolve(
            &lu.spec.selector,
            inputs.discovery.as_ref(),
            inputs.selector_image_map.as_ref(),
            inputs.compose.as_ref(),
        );
        for target in &resolved.targets {
            monitor.observe_container(&target.container_id, target.started_at.as_ref());
        }

        let plan = plan::build(
            &PlanInputs {
                spec: &lu.spec,
                resolved: &resolved,
                clocks: &clocks,
                update_mode: lu.update_mode(),
                in_trigger_queue: in_trigger_queue(
                    inputs.trigger_queue.as_ref(),
                    lu.manifest_name(),
                ),
                now: now_micro(),
            },
            &monitor,
        );

        match plan {
            Plan::Noop => {
                let containers = synthesize_containers(&resolved, &monitor, false);
                self.write_status(
                    &lu,
                    LiveUpdateStatus {
                        failed: None,
                        containers,
                    },
                )
            }
            Plan::WaitForTrigger => {
                let containers = synthesize_containers(&resolved, &monitor, true);
                self.write_status(
                    &lu,
                    LiveUpdateStatus {
                        failed: None,
                        containers,
                    },
                )
            }
            Plan::Fail(failure) => {
                monitor.ensure_failure(failure.clone());
                self.write_failed_status(&lu, failed_status_of(&failure))
            }
            Plan::Update(update) => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                executor::execute(
                    self.updater.as_ref(),
                    self.events.as_ref(),
                    lu.manifest_name(),
                    &update,
                    &mut monitor,
                )
                .await;

                match monitor.terminal_failure.clone() {
                    Some(failure) => self.write_failed_status(&lu, failed_status_of(&failure)),
                    None => {
                        let containers = synthesize_containers(&resolved, &monitor, false);
                        self.write_status(
                            &lu,
                            LiveUpdateStatus {
                                failed: None,
                                containers,
                            },
                        )
                    }
                }
            }
        }
    }

    fn fetch_inputs(&self, spec: &LiveUpdateSpec) -> Result<Inputs> {
        let mut file_watches = Vec::new();
        let mut image_maps = HashMap::new();

        for source in &spec.sources {
            let fw = self.store.file_watches().get_required(&source.file_watch)?;
            file_watches.push((source.file_watch.clone(), fw));
            if let Some(im_name) = source.image_map.as_deref().filter(|s| !s.is_empty()) {
                let im = self.store.image_maps().get_required(im_name)?;
                image_maps.insert(im_name.to_string(), im);
            }
        }

        let mut selector_image_map = None;
        let mut apply = None;
        let mut discovery = None;
        let mut compose = None;
        match &spec.selector {
            LiveUpdateSelector::Kubernetes(k8s) => {
                discovery = Some(
                    self.store
                        .kubernetes_discoveries()
                        .get_required(&k8s.discovery_name)?,
                );
                if let Some(apply_name) = k8s.apply_name.as_deref().filter(|s| !s.is_empty()) {
                    apply = Some(self.store.kubernetes_applies().get_required(apply_name)?);
                }
                if let Some(im_name) = k8s.image_map_name.as_deref().filter(|s| !s.is_empty()) {
                    let im = self.store.image_maps().get_required(im_name)?;
                    image_maps.insert(im_name.to_string(), im.clone());
                    selector_image_map = Some(im);
                }
            }
            LiveUpdateSelector::DockerCompose(dc) => {
                compose = Some(
                    self.store
                        .docker_compose_services()
                        .get_required(&dc.service)?,
                );
            }
        }

        Ok(Inputs {
            file_watches,
            image_maps,
            selector_image_map,
            apply,
            discovery,
            compose,
            trigger_queue: self.store.config_maps().get(TRIGGER_QUEUE_NAME),
        })
    }

    fn ensure_monitor(&self, name: &str, spec: &LiveUpdateSpec) -> Arc<AsyncMutex<Monitor>> {
        self.monitors
            .lock()
            .expect("monitor map lock poisoned")
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(Monitor::new(spec.clone()))))
            .clone()
    }

    /// Write a failed status, logging exactly once per transition
    fn write_failed_status(&self, lu: &LiveUpdate, failure: LiveUpdateStateFailed) -> Result<()> {
        let failure = match &lu.status.failed {
            // Same failure as last pass: keep the original transition time
            // so the status (and resourceVersion) stay put.
            Some(old) if old.reason == failure.reason && old.message == failure.message => {
                old.clone()
            }
            _ => {
                if failure.reason.loggable() {
                    error!(
                        live_update = %lu.name(),
                        reason = %failure.reason,
                        "{}",
                        failure.message
                    );
                } else {
                    debug!(
                        live_update = %lu.name(),
                        reason = %failure.reason,
                        "{}",
                        failure.message
                    );
                }
                failure
            }
        };
        self.write_status(
            lu,
            LiveUpdateStatus {
                failed: Some(failure),
                containers: Vec::new(),
            },
        )
    }

    /// Write the status if it changed; a conflict means someone else wrote
    /// in between and the change will re-enqueue us anyway
    fn write_status(&self, lu: &LiveUpdate, status: LiveUpdateStatus) -> Result<()> {
        if lu.status == status {
            return Ok(());
        }
        let mut updated = lu.clone();
        updated.status = status;
        match self.store.live_updates().update(updated) {
            Ok(_) => Ok(()),
            Err(err) if err.is_conflict() => {
                debug!("status write conflicted, retrying next reconcile");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    #[cfg(test)]
    pub(crate) fn monitor_handle(&self, name: &str) -> Option<Arc<AsyncMutex<Monitor>>> {
        self.monitors
            .lock()
            .expect("monitor map lock poisoned")
            .get(name)
            .cloned()
    }
}

fn failed_status_of(failure: &TerminalFailure) -> LiveUpdateStateFailed {
    LiveUpdateStateFailed {
        reason: failure.reason,
        message: failure.message.clone(),
        last_transition_time: Some(now_micro()),
    }
}

/// One status row per selected container, targets and waiting alike,
/// ordered by (pod, container) for stable output
fn synthesize_containers(
    resolved: &ResolvedSelector,
    monitor: &Monitor,
    trigger_gated: bool,
) -> Vec<LiveUpdateContainerStatus> {
    let mut out = Vec::new();
    for target in &resolved.targets {
        out.push(LiveUpdateContainerStatus {
            pod_name: target.pod_name.clone(),
            namespace: target.namespace.clone(),
            container_name: target.container_name.clone(),
            container_id: target.container_id.clone(),
            last_file_time_synced: monitor
                .synced_time_by_container
                .get(&target.container_id)
                .cloned(),
            waiting: trigger_gated.then(|| LiveUpdateStateWaiting {
                reason: WaitingReason::Trigger,
            }),
            last_exec_error: monitor
                .last_exec_error_by_container
                .get(&target.container_id)
                .cloned(),
        });
    }
    for waiting in &resolved.waiting {
        out.push(LiveUpdateContainerStatus {
            pod_name: waiting.pod_name.clone(),
            namespace: waiting.namespace.clone(),
            container_name: waiting.container_name.clone(),
            container_id: waiting.container_id.clone(),
            last_file_time_synced: monitor
                .synced_time_by_container
                .get(&waiting.container_id)
                .cloned(),
            waiting: Some(LiveUpdateStateWaiting {
                reason: WaitingReason::ContainerWaiting,
            }),
            last_exec_error: None,
        });
    }
    out.sort_by(|a, b| {
        (&a.pod_name, &a.container_name).cmp(&(&b.pod_name, &b.container_name))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};

    use crate::api::{
        Container, ContainerState, ContainerStateRunning, ContainerStateTerminated,
        ContainerStateWaiting, DockerComposeServiceStatus, DockerContainerState,
        DockerContainerStatus, FileEvent, FileWatchSpec, FileWatchStatus, ImageMapStatus,
        KubernetesApplyStatus, KubernetesDiscoveryStatus, LiveUpdateDockerComposeSelector,
        LiveUpdateExec, LiveUpdateKubernetesSelector, LiveUpdateRestartStrategy, LiveUpdateSource,
        LiveUpdateSync, Pod, ANNOTATION_MANIFEST, ANNOTATION_UPDATE_MODE,
    };
    use crate::executor::UpdateError;
    use crate::fake::{FakeContainerUpdater, RecordingEventSink};

    const LU: &str = "frontend-liveupdate";
    const BASE_PATH: &str = "/src/frontend";

    struct Fixture {
        store: Arc<ObjectStore>,
        reconciler: Reconciler,
        updater: Arc<FakeContainerUpdater>,
        sink: Arc<RecordingEventSink>,
        cancel: CancellationToken,
        base: MicroTime,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(ObjectStore::new());
            let updater = Arc::new(FakeContainerUpdater::new());
            let sink = Arc::new(RecordingEventSink::new());
            let reconciler = Reconciler::new(store.clone(), updater.clone(), sink.clone());
            Self {
                store,
                reconciler,
                updater,
                sink,
                cancel: CancellationToken::new(),
                base: now_micro(),
            }
        }

        /// The fixture base time shifted by whole seconds
        fn t(&self, secs: i64) -> MicroTime {
            MicroTime(self.base.0 + chrono::Duration::seconds(secs))
        }

        /// An absolute path under the LiveUpdate's base path
        fn p(&self, file: &str) -> String {
            format!("{BASE_PATH}/{file}")
        }

        async fn must_reconcile(&self, name: &str) {
            self.reconciler
                .reconcile(&self.cancel, name)
                .await
                .expect("reconcile should succeed");
        }

        fn live_update(&self) -> LiveUpdate {
            self.store.live_updates().get(LU).expect("live update exists")
        }

        fn add_file_event(&self, fw: &str, path: &str, time: MicroTime) {
            self.store
                .file_watches()
                .update_with(fw, |fw| {
                    fw.status.file_events.push(FileEvent {
                        time,
                        seen_files: vec![path.to_string()],
                    });
                })
                .expect("file watch exists");
        }

        fn kd_update_status(&self, name: &str, status: KubernetesDiscoveryStatus) {
            self.store
                .kubernetes_discoveries()
                .update_with(name, |kd| kd.status = status)
                .expect("discovery exists");
        }

        /// Two back-to-back reconciles with no input change must leave the
        /// resourceVersion alone and make no updater calls.
        async fn assert_steady_state(&self) {
            let before = self.live_update();
            let calls = self.updater.call_count();
            self.must_reconcile(LU).await;
            let after = self.live_update();
            assert_eq!(
                before.metadata.resource_version, after.metadata.resource_version,
                "steady state must not rewrite status"
            );
            assert_eq!(calls, self.updater.call_count(), "steady state must not sync");
        }

        fn running_pod(&self, pod_name: &str, container_id: &str) -> Pod {
            Pod {
                name: pod_name.to_string(),
                namespace: "default".to_string(),
                init_containers: vec![],
                containers: vec![Container {
                    name: "main".to_string(),
                    id: container_id.to_string(),
                    image: "local-registry:12345/frontend-image:my-tag".to_string(),
                    ready: true,
                    state: ContainerState {
                        running: Some(ContainerStateRunning {
                            started_at: Some(self.t(0)),
                        }),
                        ..Default::default()
                    },
                }],
            }
        }

        async fn setup_frontend(&self) {
            self.setup_frontend_with_selector(None).await;
        }

        /// Create a frontend LiveUpdate with all objects attached.
        async fn setup_frontend_with_selector(&self, selector: Option<LiveUpdateSelector>) {
            self.store
                .file_watches()
                .create(FileWatch {
                    metadata: meta("frontend-fw"),
                    spec: FileWatchSpec {
                        watched_paths: vec![BASE_PATH.to_string()],
                    },
                    status: FileWatchStatus {
                        monitor_start_time: Some(self.t(0)),
                        ..Default::default()
                    },
                })
                .unwrap();
            self.store
                .kubernetes_applies()
                .create(KubernetesApply {
                    metadata: meta("frontend-apply"),
                    ..Default::default()
                })
                .unwrap();
            self.store
                .image_maps()
                .create(ImageMap {
                    metadata: meta("frontend-image-map"),
                    status: ImageMapStatus {
                        image: "frontend-image:my-tag".to_string(),
                        image_from_cluster: "local-registry:12345/frontend-image:my-tag"
                            .to_string(),
                        build_start_time: Some(self.t(0)),
                    },
                    ..Default::default()
                })
                .unwrap();
            self.store
                .kubernetes_discoveries()
                .create(KubernetesDiscovery {
                    metadata: meta("frontend-discovery"),
                    status: KubernetesDiscoveryStatus {
                        monitor_start_time: Some(self.t(0)),
                        pods: vec![self.running_pod("pod-1", "main-id")],
                    },
                })
                .unwrap();

            // The default selector matches the most common wiring:
            // discovery + apply, selecting containers via the image map.
            let selector = selector.unwrap_or_else(|| {
                LiveUpdateSelector::Kubernetes(LiveUpdateKubernetesSelector {
                    discovery_name: "frontend-discovery".to_string(),
                    apply_name: Some("frontend-apply".to_string()),
                    image_map_name: Some("frontend-image-map".to_string()),
                    ..Default::default()
                })
            });
            self.create_live_update(selector);
            self.store
                .config_maps()
                .create(ConfigMap {
                    metadata: meta(TRIGGER_QUEUE_NAME),
                    ..Default::default()
                })
                .unwrap();
            self.must_reconcile(LU).await;
        }

        /// Create a frontend Docker Compose LiveUpdate with all objects
        /// attached.
        async fn setup_docker_compose_frontend(&self) {
            self.store
                .file_watches()
                .create(FileWatch {
                    metadata: meta("frontend-fw"),
                    spec: FileWatchSpec {
                        watched_paths: vec![BASE_PATH.to_string()],
                    },
                    status: FileWatchStatus {
                        monitor_start_time: Some(self.t(0)),
                        ..Default::default()
                    },
                })
                .unwrap();
            self.store
                .docker_compose_services()
                .create(DockerComposeService {
                    metadata: meta("frontend-service"),
                    status: DockerComposeServiceStatus {
                        container_id: "main-id".to_string(),
                        container_state: Some(DockerContainerState {
                            status: DockerContainerStatus::Running,
                            started_at: Some(self.t(0)),
                        }),
                    },
                    ..Default::default()
                })
                .unwrap();
            self.store
                .image_maps()
                .create(ImageMap {
                    metadata: meta("frontend-image-map"),
                    status: ImageMapStatus {
                        image: "frontend-image:my-tag".to_string(),
                        image_from_cluster: "frontend-image:my-tag".to_string(),
                        build_start_time: Some(self.t(0)),
                    },
                    ..Default::default()
                })
                .unwrap();
            self.create_live_update(LiveUpdateSelector::DockerCompose(
                LiveUpdateDockerComposeSelector {
                    service: "frontend-service".to_string(),
                },
            ));
            self.store
                .config_maps()
                .create(ConfigMap {
                    metadata: meta(TRIGGER_QUEUE_NAME),
                    ..Default::default()
                })
                .unwrap();
            self.must_reconcile(LU).await;
        }

        fn create_live_update(&self, selector: LiveUpdateSelector) {
            let mut metadata = meta(LU);
            metadata.annotations = Some(
                [
                    (ANNOTATION_MANIFEST.to_string(), "frontend".to_string()),
                    (ANNOTATION_UPDATE_MODE.to_string(), "auto".to_string()),
                ]
                .into_iter()
                .collect(),
            );
            self.store
                .live_updates()
                .create(LiveUpdate {
                    metadata,
                    spec: LiveUpdateSpec {
                        base_path: BASE_PATH.to_string(),
                        sources: vec![LiveUpdateSource {
                            file_watch: "frontend-fw".to_string(),
                            image_map: Some("frontend-image-map".to_string()),
                        }],
                        selector,
                        syncs: vec![LiveUpdateSync {
                            local_path: ".".to_string(),
                            container_path: "/app".to_string(),
                        }],
                        execs: vec![],
                        stop_paths: vec!["stop.txt".to_string()],
                        restart: LiveUpdateRestartStrategy::None,
                    },
                    status: LiveUpdateStatus::default(),
                })
                .unwrap();
        }
    }

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn indexing_maps_externals_back_to_live_updates() {
        let f = Fixture::new();
        let indexer = f.reconciler.indexer();

        // Discovery + apply + image map.
        f.store
            .live_updates()
            .create(LiveUpdate {
                metadata: meta("all"),
                spec: LiveUpdateSpec {
                    base_path: "/tmp".to_string(),
                    sources: vec![],
                    selector: LiveUpdateSelector::Kubernetes(LiveUpdateKubernetesSelector {
                        discovery_name: "discovery".to_string(),
                        apply_name: Some("apply".to_string()),
                        image_map_name: Some("imagemap".to_string()),
                        ..Default::default()
                    }),
                    syncs: vec![LiveUpdateSync {
                        local_path: "in".to_string(),
                        container_path: "/out/".to_string(),
                    }],
                    execs: vec![],
                    stop_paths: vec![],
                    restart: LiveUpdateRestartStrategy::None,
                },
                status: LiveUpdateStatus::default(),
            })
            .unwrap();

        // Discovery only, no apply or image map.
        f.store
            .live_updates()
            .create(LiveUpdate {
                metadata: meta("kdisco-only"),
                spec: LiveUpdateSpec {
                    base_path: "/tmp".to_string(),
                    sources: vec![],
                    selector: LiveUpdateSelector::Kubernetes(LiveUpdateKubernetesSelector {
                        discovery_name: "discovery".to_string(),
                        container_name: Some("foo".to_string()),
                        ..Default::default()
                    }),
                    syncs: vec![LiveUpdateSync {
                        local_path: "in".to_string(),
                        container_path: "/out/".to_string(),
                    }],
                    execs: vec![],
                    stop_paths: vec![],
                    restart: LiveUpdateRestartStrategy::None,
                },
                status: LiveUpdateStatus::default(),
            })
            .unwrap();

        f.must_reconcile("all").await;
        f.must_reconcile("kdisco-only").await;

        assert_eq!(
            indexer.owners_of(&crate::api::ObjectRef::of::<KubernetesDiscovery>("discovery")),
            vec!["all".to_string(), "kdisco-only".to_string()],
        );
        assert_eq!(
            indexer.owners_of(&crate::api::ObjectRef::of::<KubernetesApply>("apply")),
            vec!["all".to_string()],
        );
        assert_eq!(
            indexer.owners_of(&crate::api::ObjectRef::of::<ImageMap>("imagemap")),
            vec!["all".to_string()],
        );
    }

    #[tokio::test]
    async fn missing_apply_is_a_quiet_object_not_found() {
        let f = Fixture::new();
        f.setup_frontend().await;

        f.store.kubernetes_applies().delete("frontend-apply").unwrap();
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        let failed = lu.status.failed.as_ref().expect("status should be failed");
        assert_eq!(failed.reason, FailureReason::ObjectNotFound);
        assert!(failed.message.contains("frontend-apply"));
        assert!(lu.status.containers.is_empty());

        f.assert_steady_state().await;
    }

    #[tokio::test]
    async fn object_not_found_clears_when_the_object_reappears() {
        let f = Fixture::new();
        f.setup_frontend().await;

        f.store.kubernetes_applies().delete("frontend-apply").unwrap();
        f.must_reconcile(LU).await;
        assert!(f.live_update().status.failed.is_some());

        f.store
            .kubernetes_applies()
            .create(KubernetesApply {
                metadata: meta("frontend-apply"),
                ..Default::default()
            })
            .unwrap();
        f.must_reconcile(LU).await;
        assert!(f.live_update().status.failed.is_none());
    }

    /// Basic sync: one file event produces exactly one updater call, the
    /// status records the sync watermark, and a second reconcile with no
    /// new input does nothing.
    #[tokio::test]
    async fn consume_file_events() {
        let f = Fixture::new();
        f.setup_frontend().await;

        // Verify initial setup.
        {
            let handle = f.reconciler.monitor_handle(LU).expect("monitor exists");
            let monitor = handle.lock().await;
            assert!(monitor.sources.is_empty());
            assert_eq!(
                monitor
                    .last_kubernetes_discovery
                    .as_ref()
                    .map(|kd| kd.name().to_string()),
                Some("frontend-discovery".to_string())
            );
        }
        assert!(f.sink.last_started().is_none());

        let txt_path = f.p("a.txt");
        f.add_file_event("frontend-fw", &txt_path, f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(
            lu.status.containers[0].last_file_time_synced,
            Some(f.t(1))
        );
        assert_eq!(lu.status.containers[0].container_id, "main-id");

        // The sync is pulled into the monitor.
        {
            let handle = f.reconciler.monitor_handle(LU).expect("monitor exists");
            let monitor = handle.lock().await;
            assert_eq!(
                monitor.sources["frontend-fw"].mod_time_by_path[&txt_path],
                f.t(1)
            );
        }
        assert_eq!(f.updater.call_count(), 1);
        let calls = f.updater.calls();
        assert!(calls[0].hot_reload);
        assert_eq!(calls[0].files[0].container_path, "/app/a.txt");

        // Re-reconcile: no resync.
        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);
        assert!(f.live_update().status.failed.is_none());

        let started = f.sink.last_started().expect("build started posted");
        assert_eq!(started.manifest_name, "frontend");
        assert_eq!(started.files_changed, vec![txt_path]);
        assert!(f.sink.last_completed().is_some());

        f.assert_steady_state().await;
    }

    #[tokio::test]
    async fn consume_file_events_docker_compose() {
        let f = Fixture::new();
        f.setup_docker_compose_frontend().await;

        {
            let handle = f.reconciler.monitor_handle(LU).expect("monitor exists");
            let monitor = handle.lock().await;
            assert!(monitor.sources.is_empty());
            assert_eq!(
                monitor
                    .last_docker_compose_service
                    .as_ref()
                    .map(|dc| dc.name().to_string()),
                Some("frontend-service".to_string())
            );
        }
        assert!(f.sink.last_started().is_none());

        let txt_path = f.p("a.txt");
        f.add_file_event("frontend-fw", &txt_path, f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(lu.status.containers[0].last_file_time_synced, Some(f.t(1)));

        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);

        // The container was not restarted.
        assert!(f.updater.calls()[0].hot_reload);
        assert_eq!(
            f.sink.last_started().unwrap().files_changed,
            vec![txt_path]
        );

        f.assert_steady_state().await;

        // Compose containers restart in place, preserving their
        // filesystem; an earlier-than-the-sync restart must not replay.
        f.store
            .docker_compose_services()
            .update_with("frontend-service", |dc| {
                let state = dc.status.container_state.as_mut().unwrap();
                state.started_at =
                    Some(MicroTime(f.base.0 + chrono::Duration::milliseconds(500)));
            })
            .unwrap();

        f.assert_steady_state().await;
    }

    /// Supersession: once the Compose container restarts *after* every
    /// observed file event, those events never cause another update.
    #[tokio::test]
    async fn compose_restart_supersedes_older_events() {
        let f = Fixture::new();
        f.setup_docker_compose_frontend().await;

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);

        f.store
            .docker_compose_services()
            .update_with("frontend-service", |dc| {
                let state = dc.status.container_state.as_mut().unwrap();
                state.started_at = Some(f.t(5));
            })
            .unwrap();

        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);
        f.assert_steady_state().await;
    }

    #[tokio::test]
    async fn manual_mode_waits_for_the_trigger_queue() {
        let f = Fixture::new();
        f.setup_frontend().await;

        f.store
            .live_updates()
            .update_with(LU, |lu| {
                lu.metadata
                    .annotations
                    .get_or_insert_with(Default::default)
                    .insert(ANNOTATION_UPDATE_MODE.to_string(), "manual".to_string());
            })
            .unwrap();

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(
            lu.status.containers[0]
                .waiting
                .as_ref()
                .map(|w| w.reason),
            Some(WaitingReason::Trigger)
        );
        assert_eq!(f.updater.call_count(), 0);

        f.store
            .config_maps()
            .update_with(TRIGGER_QUEUE_NAME, |cm| {
                cm.data
                    .insert("0-name".to_string(), "frontend".to_string());
            })
            .unwrap();

        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(lu.status.containers[0].last_file_time_synced, Some(f.t(1)));
        assert_eq!(f.updater.call_count(), 1);
    }

    /// Waiting then running: a waiting container produces no calls and a
    /// waiting status; once it runs, the pending file syncs exactly once.
    #[tokio::test]
    async fn waiting_container_syncs_after_it_starts() {
        let f = Fixture::new();
        f.setup_frontend().await;

        f.kd_update_status(
            "frontend-discovery",
            KubernetesDiscoveryStatus {
                pods: vec![Pod {
                    name: "pod-1".to_string(),
                    namespace: "default".to_string(),
                    init_containers: vec![],
                    containers: vec![Container {
                        name: "main".to_string(),
                        id: "main-id".to_string(),
                        image: "local-registry:12345/frontend-image:my-tag".to_string(),
                        ready: false,
                        state: ContainerState {
                            waiting: Some(ContainerStateWaiting::default()),
                            ..Default::default()
                        },
                    }],
                }],
                ..Default::default()
            },
        );

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(
            lu.status.containers[0]
                .waiting
                .as_ref()
                .map(|w| w.reason),
            Some(WaitingReason::ContainerWaiting)
        );
        assert_eq!(f.updater.call_count(), 0);

        f.assert_steady_state().await;

        f.kd_update_status(
            "frontend-discovery",
            KubernetesDiscoveryStatus {
                pods: vec![Pod {
                    name: "pod-1".to_string(),
                    namespace: "default".to_string(),
                    init_containers: vec![],
                    containers: vec![Container {
                        name: "main".to_string(),
                        id: "main-id".to_string(),
                        image: "local-registry:12345/frontend-image:my-tag".to_string(),
                        ready: true,
                        state: ContainerState {
                            running: Some(ContainerStateRunning { started_at: None }),
                            ..Default::default()
                        },
                    }],
                }],
                ..Default::default()
            },
        );

        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);
        assert_eq!(
            f.live_update().status.containers[0].last_file_time_synced,
            Some(f.t(1))
        );
    }

    /// A container with no runtime ID yet is waiting, even though its
    /// (running) init container has one.
    #[tokio::test]
    async fn waiting_container_without_an_id() {
        let f = Fixture::new();
        f.setup_frontend().await;

        f.kd_update_status(
            "frontend-discovery",
            KubernetesDiscoveryStatus {
                pods: vec![Pod {
                    name: "pod-1".to_string(),
                    namespace: "default".to_string(),
                    init_containers: vec![Container {
                        name: "main-init".to_string(),
                        id: "main-id".to_string(),
                        image: "busybox".to_string(),
                        ready: true,
                        state: ContainerState {
                            running: Some(ContainerStateRunning { started_at: None }),
                            ..Default::default()
                        },
                    }],
                    containers: vec![Container {
                        name: "main".to_string(),
                        id: String::new(),
                        image: "local-registry:12345/frontend-image:my-tag".to_string(),
                        ready: false,
                        state: ContainerState {
                            waiting: Some(ContainerStateWaiting {
                                reason: "PodInitializing".to_string(),
                            }),
                            ..Default::default()
                        },
                    }],
                }],
                ..Default::default()
            },
        );

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(
            lu.status.containers[0]
                .waiting
                .as_ref()
                .map(|w| w.reason),
            Some(WaitingReason::ContainerWaiting)
        );
        assert_eq!(f.updater.call_count(), 0);

        f.assert_steady_state().await;
    }

    #[tokio::test]
    async fn one_terminated_container_fails_the_update() {
        let f = Fixture::new();
        f.setup_frontend().await;

        f.kd_update_status(
            "frontend-discovery",
            KubernetesDiscoveryStatus {
                pods: vec![Pod {
                    name: "pod-1".to_string(),
                    namespace: "default".to_string(),
                    init_containers: vec![],
                    containers: vec![Container {
                        name: "main".to_string(),
                        id: "main-id".to_string(),
                        image: "local-registry:12345/frontend-image:my-tag".to_string(),
                        ready: false,
                        state: ContainerState {
                            terminated: Some(ContainerStateTerminated::default()),
                            ..Default::default()
                        },
                    }],
                }],
                ..Default::default()
            },
        );

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        let failed = lu.status.failed.as_ref().expect("status should be failed");
        assert_eq!(failed.reason, FailureReason::Terminated);
        assert_eq!(
            failed.message,
            "Container for live update is stopped. Pod name: pod-1"
        );
        assert_eq!(f.updater.call_count(), 0);

        f.assert_steady_state().await;
    }

    #[tokio::test]
    async fn terminated_sibling_does_not_block_the_running_pod() {
        let f = Fixture::new();
        f.setup_frontend().await;

        let mut dead = f.running_pod("pod-1", "main-id");
        dead.containers[0].state = ContainerState {
            terminated: Some(ContainerStateTerminated::default()),
            ..Default::default()
        };
        let alive = f.running_pod("pod-2", "main-id-2");
        f.kd_update_status(
            "frontend-discovery",
            KubernetesDiscoveryStatus {
                pods: vec![dead, alive],
                ..Default::default()
            },
        );

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(lu.status.containers[0].last_file_time_synced, Some(f.t(1)));

        assert_eq!(f.updater.call_count(), 1);
        assert_eq!(
            f.updater.calls()[0].target.pod_name.as_deref(),
            Some("pod-2")
        );

        f.assert_steady_state().await;
    }

    /// Crash loop is sticky: the failure survives the container reporting
    /// Running again, and only a newer image build clears it.
    #[tokio::test]
    async fn crash_loop_back_off_is_sticky() {
        let f = Fixture::new();
        f.setup_frontend().await;

        let mut crashing = f.running_pod("pod-1", "main-id");
        crashing.containers[0].state = ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: "CrashLoopBackOff".to_string(),
            }),
            ..Default::default()
        };
        f.kd_update_status(
            "frontend-discovery",
            KubernetesDiscoveryStatus {
                pods: vec![crashing],
                ..Default::default()
            },
        );

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert_eq!(
            lu.status.failed.as_ref().map(|s| s.reason),
            Some(FailureReason::CrashLoopBackOff)
        );
        assert_eq!(f.updater.call_count(), 0);

        f.assert_steady_state().await;

        // The container recovers, but the failure does not.
        f.kd_update_status(
            "frontend-discovery",
            KubernetesDiscoveryStatus {
                pods: vec![f.running_pod("pod-1", "main-id")],
                ..Default::default()
            },
        );
        f.must_reconcile(LU).await;
        assert_eq!(
            f.live_update().status.failed.as_ref().map(|s| s.reason),
            Some(FailureReason::CrashLoopBackOff)
        );

        // A newer image build clears it.
        f.store
            .image_maps()
            .update_with("frontend-image-map", |im| {
                im.status.build_start_time = Some(f.t(2));
            })
            .unwrap();
        f.must_reconcile(LU).await;
        assert!(f.live_update().status.failed.is_none());
    }

    #[tokio::test]
    async fn stop_path_consumed_by_image_build() {
        let f = Fixture::new();
        f.setup_frontend().await;

        f.add_file_event("frontend-fw", &f.p("stop.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert_eq!(
            lu.status.failed.as_ref().map(|s| s.reason),
            Some(FailureReason::UpdateStopped)
        );

        f.assert_steady_state().await;

        // Clear the failure with an image build.
        f.store
            .image_maps()
            .update_with("frontend-image-map", |im| {
                im.status.build_start_time = Some(f.t(2));
            })
            .unwrap();

        f.must_reconcile(LU).await;
        assert!(f.live_update().status.failed.is_none());

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(3));
        assert_eq!(f.updater.call_count(), 0);
        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);
    }

    #[tokio::test]
    async fn stop_path_consumed_by_kubernetes_apply() {
        let f = Fixture::new();
        // The image map is going away, so select by image instead.
        f.setup_frontend_with_selector(Some(LiveUpdateSelector::Kubernetes(
            LiveUpdateKubernetesSelector {
                discovery_name: "frontend-discovery".to_string(),
                apply_name: Some("frontend-apply".to_string()),
                image: Some("local-registry:12345/frontend-image:some-tag".to_string()),
                ..Default::default()
            },
        )))
        .await;

        f.store
            .live_updates()
            .update_with(LU, |lu| {
                lu.spec.sources[0].image_map = None;
            })
            .unwrap();
        f.store.image_maps().delete("frontend-image-map").unwrap();

        f.add_file_event("frontend-fw", &f.p("stop.txt"), f.t(1));
        f.must_reconcile(LU).await;

        assert_eq!(
            f.live_update().status.failed.as_ref().map(|s| s.reason),
            Some(FailureReason::UpdateStopped)
        );

        f.assert_steady_state().await;

        // Clear the failure with an apply.
        f.store
            .kubernetes_applies()
            .update_with("frontend-apply", |apply| {
                apply.status = KubernetesApplyStatus {
                    last_apply_start_time: Some(f.t(2)),
                    ..Default::default()
                };
            })
            .unwrap();

        f.must_reconcile(LU).await;
        assert!(f.live_update().status.failed.is_none());

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(3));
        assert_eq!(f.updater.call_count(), 0);
        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);
    }

    #[tokio::test]
    async fn container_name_selector() {
        let f = Fixture::new();
        f.setup_frontend_with_selector(Some(LiveUpdateSelector::Kubernetes(
            LiveUpdateKubernetesSelector {
                discovery_name: "frontend-discovery".to_string(),
                apply_name: Some("frontend-apply".to_string()),
                container_name: Some("main".to_string()),
                ..Default::default()
            },
        )))
        .await;

        f.kd_update_status(
            "frontend-discovery",
            KubernetesDiscoveryStatus {
                pods: vec![Pod {
                    name: "pod-1".to_string(),
                    namespace: "default".to_string(),
                    init_containers: vec![],
                    containers: vec![Container {
                        name: "main".to_string(),
                        id: "main-id".to_string(),
                        image: "frontend-image".to_string(),
                        ready: true,
                        state: ContainerState {
                            running: Some(ContainerStateRunning { started_at: None }),
                            ..Default::default()
                        },
                    }],
                }],
                ..Default::default()
            },
        );

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(lu.status.containers[0].last_file_time_synced, Some(f.t(1)));

        f.assert_steady_state().await;
    }

    #[tokio::test]
    async fn image_selector_ignores_tags() {
        let f = Fixture::new();
        f.setup_frontend_with_selector(Some(LiveUpdateSelector::Kubernetes(
            LiveUpdateKubernetesSelector {
                discovery_name: "frontend-discovery".to_string(),
                apply_name: Some("frontend-apply".to_string()),
                image: Some("local-registry:12345/frontend-image:some-tag".to_string()),
                ..Default::default()
            },
        )))
        .await;

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(lu.status.containers[0].last_file_time_synced, Some(f.t(1)));

        f.assert_steady_state().await;
    }

    #[tokio::test]
    async fn restart_always_turns_off_hot_reload() {
        let f = Fixture::new();
        f.setup_docker_compose_frontend().await;

        f.store
            .live_updates()
            .update_with(LU, |lu| {
                lu.spec.restart = LiveUpdateRestartStrategy::Always;
            })
            .unwrap();

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers[0].last_file_time_synced, Some(f.t(1)));

        assert_eq!(f.updater.call_count(), 1);
        assert!(!f.updater.calls()[0].hot_reload);
    }

    #[tokio::test]
    async fn execs_run_only_when_their_trigger_paths_match() {
        let f = Fixture::new();
        f.setup_docker_compose_frontend().await;

        f.store
            .live_updates()
            .update_with(LU, |lu| {
                lu.spec.execs = vec![
                    LiveUpdateExec {
                        args: vec!["./foo.sh".to_string(), "bar".to_string()],
                        trigger_paths: vec![],
                    },
                    LiveUpdateExec {
                        args: vec!["yarn".to_string(), "install".to_string()],
                        trigger_paths: vec!["a.txt".to_string()],
                    },
                    LiveUpdateExec {
                        args: vec!["pip".to_string(), "install".to_string()],
                        trigger_paths: vec!["requirements.txt".to_string()],
                    },
                ];
            })
            .unwrap();

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers[0].last_file_time_synced, Some(f.t(1)));
        assert!(f.sink.last_completed().unwrap().error.is_none());

        // Two commands ran, one was skipped.
        assert_eq!(f.updater.call_count(), 1);
        assert_eq!(
            f.updater.calls()[0].cmds,
            vec![
                vec!["./foo.sh".to_string(), "bar".to_string()],
                vec!["yarn".to_string(), "install".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn infra_failure_during_exec_is_terminal() {
        let f = Fixture::new();
        f.setup_docker_compose_frontend().await;
        f.updater
            .set_update_error(UpdateError::infrastructure("cluster connection lost"));

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        let failed = lu.status.failed.as_ref().expect("status should be failed");
        assert_eq!(failed.reason, FailureReason::UpdateFailed);
        assert_eq!(
            failed.message,
            "Updating container main-id: cluster connection lost"
        );
        assert_eq!(
            f.sink.last_completed().unwrap().error.as_deref(),
            Some("Updating container main-id: cluster connection lost")
        );

        f.assert_steady_state().await;
    }

    #[tokio::test]
    async fn run_step_failure_is_retryable_not_terminal() {
        let f = Fixture::new();
        f.setup_docker_compose_frontend().await;
        f.updater
            .set_update_error(UpdateError::run_step_failure("compilation failed", 1));

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;

        let lu = f.live_update();
        assert!(lu.status.failed.is_none());
        assert_eq!(lu.status.containers.len(), 1);
        assert_eq!(
            lu.status.containers[0].last_exec_error.as_deref(),
            Some("compilation failed")
        );
        assert_eq!(
            f.sink.last_completed().unwrap().error.as_deref(),
            Some("compilation failed")
        );

        f.assert_steady_state().await;

        // The next file change retries and the error clears.
        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(2));
        f.must_reconcile(LU).await;
        let lu = f.live_update();
        assert!(lu.status.containers[0].last_exec_error.is_none());
        assert_eq!(lu.status.containers[0].last_file_time_synced, Some(f.t(2)));
        assert_eq!(f.updater.call_count(), 2);
    }

    /// No-replay across pod turnover: a new container epoch gets files
    /// newer than its own start, and only those.
    #[tokio::test]
    async fn a_new_pod_only_receives_events_newer_than_its_start() {
        let f = Fixture::new();
        f.setup_frontend().await;

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);

        // The pod is replaced; its container started after the event.
        let mut replacement = f.running_pod("pod-2", "main-id-2");
        replacement.containers[0].state = ContainerState {
            running: Some(ContainerStateRunning {
                started_at: Some(f.t(2)),
            }),
            ..Default::default()
        };
        f.kd_update_status(
            "frontend-discovery",
            KubernetesDiscoveryStatus {
                pods: vec![replacement],
                ..Default::default()
            },
        );

        // The old event predates the new container: nothing to do.
        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);

        // A genuinely new event syncs to the new container.
        f.add_file_event("frontend-fw", &f.p("b.txt"), f.t(3));
        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 2);
        let calls = f.updater.calls();
        assert_eq!(calls[1].target.container_id, "main-id-2");
        assert_eq!(calls[1].files.len(), 1);
        assert_eq!(calls[1].files[0].container_path, "/app/b.txt");
    }

    /// A spec change resets the monitor wholesale: the accumulated state
    /// was built for different sync rules, so still-relevant file events
    /// are re-absorbed and re-delivered to the new destination.
    #[tokio::test]
    async fn a_spec_change_resets_the_monitor() {
        let f = Fixture::new();
        f.setup_frontend().await;

        f.add_file_event("frontend-fw", &f.p("a.txt"), f.t(1));
        f.must_reconcile(LU).await;
        assert_eq!(f.updater.call_count(), 1);

        f.store
            .live_updates()
            .update_with(LU, |lu| {
                lu.spec.syncs[0].container_path = "/srv".to_string();
            })
            .unwrap();
        f.must_reconcile(LU).await;

        assert_eq!(f.updater.call_count(), 2);
        let calls = f.updater.calls();
        assert_eq!(calls[1].files[0].container_path, "/srv/a.txt");

        let handle = f.reconciler.monitor_handle(LU).expect("monitor exists");
        let monitor = handle.lock().await;
        assert_eq!(monitor.spec.syncs[0].container_path, "/srv");
    }

    #[tokio::test]
    async fn deleting_the_live_update_drops_the_monitor() {
        let f = Fixture::new();
        f.setup_frontend().await;
        assert!(f.reconciler.monitor_handle(LU).is_some());

        f.store.live_updates().delete(LU).unwrap();
        f.must_reconcile(LU).await;

        assert!(f.reconciler.monitor_handle(LU).is_none());
        assert!(f
            .reconciler
            .indexer()
            .owners_of(&crate::api::ObjectRef::of::<KubernetesDiscovery>(
                "frontend-discovery"
            ))
            .is_empty());
    }
}
