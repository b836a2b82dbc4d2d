//! The reconcile queue
//!
//! The runner turns store change notifications into reconcile calls: at
//! most one in-flight reconcile per LiveUpdate name, a dirty bit for
//! changes that arrive mid-pass, parallelism across names, and backoff on
//! errors. Cancellation stops dispatching new passes and waits for
//! whatever is in flight; the container updater is never interrupted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ApiObject, LiveUpdate, ObjectRef};
use crate::reconciler::Reconciler;
use crate::retry::RetryConfig;
use crate::Result;

/// Drives a [`Reconciler`] from store change notifications
pub struct Runner {
    reconciler: Arc<Reconciler>,
    retry: RetryConfig,
}

impl Runner {
    /// Create a runner with the default retry policy
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Consume change notifications until cancelled
    ///
    /// Typically spawned as a task with the receiver from
    /// [`crate::store::ObjectStore::watch`]. Returns after cancellation
    /// once every in-flight reconcile has finished.
    pub async fn run(
        self,
        mut changes: mpsc::UnboundedReceiver<ObjectRef>,
        cancel: CancellationToken,
    ) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, Result<()>)>();
        let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel::<String>();
        // name -> dirty: a change arrived while the pass was in flight
        let mut in_flight: HashMap<String, bool> = HashMap::new();
        let mut attempts: HashMap<String, u32> = HashMap::new();

        info!("reconcile queue started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(change) = changes.recv() => {
                    for name in self.requests_for(&change) {
                        self.kick(&cancel, &done_tx, &mut in_flight, name);
                    }
                }
                Some(name) = requeue_rx.recv() => {
                    self.kick(&cancel, &done_tx, &mut in_flight, name);
                }
                Some((name, result)) = done_rx.recv() => {
                    let dirty = in_flight.remove(&name).unwrap_or(false);
                    match result {
                        Ok(()) => {
                            attempts.remove(&name);
                            if dirty {
                                self.kick(&cancel, &done_tx, &mut in_flight, name);
                            }
                        }
                        Err(err) => {
                            let attempt = attempts.entry(name.clone()).or_insert(0);
                            *attempt += 1;
                            if self.retry.exhausted(*attempt) {
                                error!(
                                    live_update = %name,
                                    error = %err,
                                    attempts = *attempt,
                                    "giving up on reconcile"
                                );
                                attempts.remove(&name);
                                continue;
                            }
                            let delay = self.retry.delay_for(*attempt);
                            warn!(
                                live_update = %name,
                                error = %err,
                                delay_ms = delay.as_millis() as u64,
                                "reconcile failed, requeueing"
                            );
                            let requeue = requeue_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = requeue.send(name);
                            });
                        }
                    }
                }
            }
        }

        // Let in-flight passes finish; the updater is never force-killed.
        debug!(in_flight = in_flight.len(), "reconcile queue draining");
        while !in_flight.is_empty() {
            match done_rx.recv().await {
                Some((name, _)) => {
                    in_flight.remove(&name);
                }
                None => break,
            }
        }
        info!("reconcile queue stopped");
    }

    /// Start a pass for the name, or mark it dirty if one is in flight
    fn kick(
        &self,
        cancel: &CancellationToken,
        done_tx: &mpsc::UnboundedSender<(String, Result<()>)>,
        in_flight: &mut HashMap<String, bool>,
        name: String,
    ) {
        if let Some(dirty) = in_flight.get_mut(&name) {
            *dirty = true;
            return;
        }
        in_flight.insert(name.clone(), false);
        let reconciler = self.reconciler.clone();
        let cancel = cancel.clone();
        let done = done_tx.clone();
        tokio::spawn(async move {
            let result = reconciler.reconcile(&cancel, &name).await;
            let _ = done.send((name, result));
        });
    }

    /// The LiveUpdate names a changed object maps to
    fn requests_for(&self, change: &ObjectRef) -> Vec<String> {
        if change.kind == LiveUpdate::KIND {
            return vec![change.name.clone()];
        }
        self.reconciler.indexer().owners_of(change)
    }
}
