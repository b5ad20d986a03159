//! Controller for SnapshotRequest resources
//!
//! A watcher task runs the list-then-watch stream and enqueues each newly
//! observed request key once; worker tasks drain the queue concurrently,
//! protected by the queue's per-key exclusivity.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher::{watcher, Config, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, ResourceExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::controllers::Context;
use crate::crd::SnapshotRequest;
use crate::metrics::{
    OPERATOR_HEALTH, PROCESS_DURATION, PROCESS_ERRORS, PROCESS_TOTAL, QUEUE_DEPTH,
};
use crate::queue::WorkQueue;
use crate::reconcilers::snapshot;
use crate::{Error, Result};

/// Number of concurrent worker tasks
const WORKER_COUNT: usize = 2;

/// Maximum time to wait for the watcher's initial list before failing startup
const SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Failed keys are requeued with backoff at most this many times
const MAX_RETRIES: u32 = 5;

/// First retry delay; doubles per consecutive failure
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Retry delay ceiling
const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

/// Notification emitted by the watcher task.
///
/// Only creation is observed today; the variant tag leaves room for update
/// and delete handling without changing consumers blindly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchNotification {
    /// A request key observed for the first time
    RequestAdded(String),
}

/// Run the SnapshotRequest controller until the token is cancelled.
///
/// Fails with [`Error::SyncTimeout`] if the initial list never completes;
/// callers should treat that as fatal.
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) -> Result<()> {
    info!("Starting SnapshotRequest controller");

    let queue = Arc::new(WorkQueue::new(RETRY_BASE_DELAY, RETRY_MAX_DELAY));
    let (synced_tx, synced_rx) = oneshot::channel();

    let watch_handle = spawn_watcher(ctx.clone(), queue.clone(), synced_tx);

    match tokio::time::timeout(SYNC_TIMEOUT, synced_rx).await {
        Ok(Ok(())) => info!("Initial SnapshotRequest sync complete"),
        _ => {
            error!(
                "Initial sync did not complete within {}s",
                SYNC_TIMEOUT.as_secs()
            );
            OPERATOR_HEALTH.set(0.0);
            watch_handle.abort();
            return Err(Error::SyncTimeout);
        }
    }

    let workers: Vec<JoinHandle<()>> = (0..WORKER_COUNT)
        .map(|id| {
            let ctx = ctx.clone();
            let queue = queue.clone();
            tokio::spawn(worker(ctx, queue, id))
        })
        .collect();

    shutdown.cancelled().await;
    info!("Shutting down SnapshotRequest controller");

    queue.shutdown();
    watch_handle.abort();
    for handle in workers {
        let _ = handle.await;
    }

    info!("SnapshotRequest controller stopped");
    Ok(())
}

/// Spawn the list-then-watch task feeding the queue.
fn spawn_watcher(
    ctx: Arc<Context>,
    queue: Arc<WorkQueue>,
    synced_tx: oneshot::Sender<()>,
) -> JoinHandle<()> {
    let requests: Api<SnapshotRequest> = Api::all(ctx.client.clone());

    tokio::spawn(async move {
        let mut seen = SeenRequests::new();
        let mut synced_tx = Some(synced_tx);

        let mut stream = watcher(requests, Config::default().any_semantic())
            .default_backoff()
            .boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::InitApply(request)) | Ok(Event::Apply(request)) => {
                    if let Some(WatchNotification::RequestAdded(key)) = seen.observe(&request) {
                        info!(key = %key, "Enqueueing new SnapshotRequest");
                        queue.add(key);
                        QUEUE_DEPTH.set(queue.len() as f64);
                    }
                }
                Ok(Event::InitDone) => {
                    if let Some(tx) = synced_tx.take() {
                        let _ = tx.send(());
                    }
                }
                // A deleted key is forgotten so that a request recreated
                // under the same namespace/name counts as newly created.
                Ok(Event::Delete(request)) => seen.forget(&request),
                // Init only marks the start of a re-list.
                Ok(Event::Init) => {}
                Err(e) => {
                    // The watcher re-lists on its own; nothing is lost.
                    warn!("Watch stream error, stream will restart: {}", e);
                }
            }
        }
    })
}

/// Request keys the watcher has already enqueued.
///
/// Re-lists after a stream desync replay every object, so a key is only
/// reported once while it stays live; deleting it makes the key observable
/// again for a recreated request.
#[derive(Debug, Default)]
pub struct SeenRequests {
    keys: HashSet<String>,
}

impl SeenRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notification for a newly observed request, once per live key.
    ///
    /// Requests that already carry a terminal status phase were processed in
    /// a previous run of the operator and are skipped.
    pub fn observe(&mut self, request: &SnapshotRequest) -> Option<WatchNotification> {
        let key = request_key(request);

        if !self.keys.insert(key.clone()) {
            return None;
        }
        if request.is_terminal() {
            info!(key = %key, "Skipping already processed SnapshotRequest");
            return None;
        }

        Some(WatchNotification::RequestAdded(key))
    }

    /// Drop a deleted request's key so a later recreation is observed as new.
    pub fn forget(&mut self, request: &SnapshotRequest) {
        self.keys.remove(&request_key(request));
    }
}

fn request_key(request: &SnapshotRequest) -> String {
    let namespace = request.namespace().unwrap_or_default();
    format!("{}/{}", namespace, request.name_any())
}

/// Worker loop: drain the queue until shutdown.
async fn worker(ctx: Arc<Context>, queue: Arc<WorkQueue>, id: usize) {
    info!(worker = id, "Worker started");

    while let Some(key) = queue.get().await {
        let start = std::time::Instant::now();
        PROCESS_TOTAL.with_label_values(&["SnapshotRequest"]).inc();

        let result = snapshot::process(&ctx, &key).await;

        PROCESS_DURATION
            .with_label_values(&["SnapshotRequest"])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(Some(outcome)) => {
                info!(
                    key = %key,
                    matched = outcome.matched,
                    created = outcome.created,
                    "Processed SnapshotRequest"
                );
                queue.forget(&key);
            }
            Ok(None) => {
                // Deleted between enqueue and processing: benign no-op.
                queue.forget(&key);
            }
            Err(e) if !e.is_retryable() => {
                warn!(key = %key, "Dropping SnapshotRequest: {}", e);
                PROCESS_ERRORS.with_label_values(&["SnapshotRequest"]).inc();
                snapshot::mark_failed(&ctx, &key, &e).await;
                queue.forget(&key);
            }
            Err(e) => {
                PROCESS_ERRORS.with_label_values(&["SnapshotRequest"]).inc();
                let attempts = queue.retries(&key);
                if attempts < MAX_RETRIES {
                    warn!(
                        key = %key,
                        attempt = attempts + 1,
                        "Processing failed, requeueing: {}",
                        e
                    );
                    queue.add_rate_limited(key.clone());
                } else {
                    error!(key = %key, "Giving up after {} attempts: {}", attempts, e);
                    snapshot::mark_failed(&ctx, &key, &e).await;
                    queue.forget(&key);
                }
            }
        }

        queue.done(&key);
        QUEUE_DEPTH.set(queue.len() as f64);
    }

    info!(worker = id, "Worker stopped");
}
