//! Selector resolution: from a discovery snapshot to concrete containers
//!
//! Resolution classifies every matching container as a target (running,
//! with a runtime ID), waiting (not updatable yet, never a failure), or
//! evidence of a terminal state (crash loop, all instances dead).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;

use crate::api::{
    Container, DockerComposeService, DockerContainerStatus, FailureReason, ImageMap,
    KubernetesDiscovery, LiveUpdateKubernetesSelector, LiveUpdateSelector, Pod,
};

/// A concrete container instance an update can be streamed into
#[derive(Clone, Debug, PartialEq)]
pub struct TargetContainer {
    /// Pod holding the container (Kubernetes only)
    pub pod_name: Option<String>,

    /// Namespace of the pod (Kubernetes only)
    pub namespace: Option<String>,

    /// Container name (the Compose service name for Compose targets)
    pub container_name: String,

    /// Runtime container ID; empty only for waiting containers
    pub container_id: String,

    /// When this instance started, when known
    pub started_at: Option<MicroTime>,
}

/// Outcome of resolving a selector against the current snapshots
#[derive(Debug, Default)]
pub(crate) struct ResolvedSelector {
    /// Running containers with IDs, in (pod, container) order
    pub(crate) targets: Vec<TargetContainer>,

    /// Matching containers that cannot be updated yet
    pub(crate) waiting: Vec<TargetContainer>,

    /// Terminal condition detected during resolution
    pub(crate) terminal: Option<(FailureReason, String)>,
}

/// Resolve a selector to concrete containers
pub(crate) fn resolve(
    selector: &LiveUpdateSelector,
    discovery: Option<&KubernetesDiscovery>,
    selector_image_map: Option<&ImageMap>,
    compose: Option<&DockerComposeService>,
) -> ResolvedSelector {
    match selector {
        LiveUpdateSelector::Kubernetes(k8s) => match discovery {
            Some(discovery) => resolve_kubernetes(k8s, discovery, selector_image_map),
            None => ResolvedSelector::default(),
        },
        LiveUpdateSelector::DockerCompose(dc) => match compose {
            Some(compose) => resolve_docker_compose(&dc.service, compose),
            None => ResolvedSelector::default(),
        },
    }
}

fn resolve_kubernetes(
    selector: &LiveUpdateKubernetesSelector,
    discovery: &KubernetesDiscovery,
    image_map: Option<&ImageMap>,
) -> ResolvedSelector {
    let selector_repo = selector
        .image
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(image_repo);
    let cluster_repo = image_map
        .map(|im| im.status.image_from_cluster.as_str())
        .filter(|s| !s.is_empty())
        .map(image_repo);

    let mut resolved = ResolvedSelector::default();
    let mut crash_loop_pod: Option<String> = None;
    let mut terminated_pod: Option<String> = None;

    for pod in &discovery.status.pods {
        // Init containers are never selectable.
        for container in &pod.containers {
            if !container_matches(selector, container, selector_repo, cluster_repo) {
                continue;
            }
            let state = &container.state;
            if state.is_crash_looping() {
                crash_loop_pod.get_or_insert_with(|| pod.name.clone());
            } else if state.waiting.is_some() {
                resolved.waiting.push(target(pod, container, None));
            } else if let Some(running) = &state.running {
                if container.id.is_empty() {
                    resolved.waiting.push(target(pod, container, None));
                } else {
                    resolved
                        .targets
                        .push(target(pod, container, running.started_at.clone()));
                }
            } else if state.terminated.is_some() {
                terminated_pod.get_or_insert_with(|| pod.name.clone());
            } else {
                // No state reported yet; treat like waiting.
                resolved.waiting.push(target(pod, container, None));
            }
        }
    }

    if let Some(pod) = crash_loop_pod {
        resolved.terminal = Some((
            FailureReason::CrashLoopBackOff,
            format!("Container for live update is crash looping. Pod name: {pod}"),
        ));
    } else if resolved.targets.is_empty() && resolved.waiting.is_empty() {
        if let Some(pod) = terminated_pod {
            resolved.terminal = Some((
                FailureReason::Terminated,
                format!("Container for live update is stopped. Pod name: {pod}"),
            ));
        }
    }

    resolved
}

fn resolve_docker_compose(service: &str, svc: &DockerComposeService) -> ResolvedSelector {
    let mut resolved = ResolvedSelector::default();
    let state = svc.status.container_state.as_ref();
    let started_at = state.and_then(|s| s.started_at.clone());
    let running = state.is_some_and(|s| s.status == DockerContainerStatus::Running);

    if !svc.status.container_id.is_empty() && running && started_at.is_some() {
        resolved.targets.push(TargetContainer {
            pod_name: None,
            namespace: None,
            container_name: service.to_string(),
            container_id: svc.status.container_id.clone(),
            started_at,
        });
    } else {
        resolved.waiting.push(TargetContainer {
            pod_name: None,
            namespace: None,
            container_name: service.to_string(),
            container_id: svc.status.container_id.clone(),
            started_at: None,
        });
    }
    resolved
}

fn target(pod: &Pod, container: &Container, started_at: Option<MicroTime>) -> TargetContainer {
    TargetContainer {
        pod_name: Some(pod.name.clone()),
        namespace: Some(pod.namespace.clone()),
        container_name: container.name.clone(),
        container_id: container.id.clone(),
        started_at,
    }
}

fn container_matches(
    selector: &LiveUpdateKubernetesSelector,
    container: &Container,
    selector_repo: Option<&str>,
    cluster_repo: Option<&str>,
) -> bool {
    if let Some(name) = selector.container_name.as_deref().filter(|n| !n.is_empty()) {
        if container.name == name {
            return true;
        }
    }
    if container.image.is_empty() {
        return false;
    }
    let repo = image_repo(&container.image);
    selector_repo == Some(repo) || cluster_repo == Some(repo)
}

/// The repository part of an image reference: tag and digest stripped
///
/// Registry ports contain a colon too, so the tag colon is the one after
/// the final path separator.
fn image_repo(image: &str) -> &str {
    let base = image.split('@').next().unwrap_or(image);
    match (base.rfind(':'), base.rfind('/')) {
        (Some(colon), Some(slash)) if colon > slash => &base[..colon],
        (Some(colon), None) => &base[..colon],
        _ => base,
    }
}
