use std::sync::Arc;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::errors::WardenError;

/// Dispatch and cancellation signalling for admitted scans.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, scan_id: &str) -> Result<(), WardenError>;

    /// Signal a queued or running scan to stop. Returns false when the queue
    /// holds nothing for this id.
    async fn request_cancel(&self, scan_id: &str) -> Result<bool, WardenError>;
}

/// Processes one scan end to end. Implemented by the scan engine.
#[async_trait]
pub trait ScanWorker: Send + Sync {
    async fn process(&self, scan_id: &str, cancel: CancellationToken);
}

/// In-process queue: one tokio task per scan, at most `workers` running.
pub struct LocalQueue {
    worker: Arc<dyn ScanWorker>,
    permits: Arc<Semaphore>,
    tokens: Arc<DashMap<String, CancellationToken>>,
    handles: DashMap<String, JoinHandle<()>>,
}

impl LocalQueue {
    pub fn new(worker: Arc<dyn ScanWorker>, workers: usize) -> Self {
        Self {
            worker,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tokens: Arc::new(DashMap::new()),
            handles: DashMap::new(),
        }
    }

    pub fn is_queued(&self, scan_id: &str) -> bool {
        self.tokens.contains_key(scan_id)
    }

    /// Wait for a scan's task to finish. Returns immediately for unknown ids.
    pub async fn wait(&self, scan_id: &str) {
        let handle = self.handles.remove(scan_id).map(|(_, h)| h);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(scan_id, error = %e, "Scan task ended abnormally");
            }
        }
    }

    /// Wait for every scan enqueued so far.
    pub async fn drain(&self) {
        let ids: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.wait(&id).await;
        }
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn enqueue(&self, scan_id: &str) -> Result<(), WardenError> {
        if self.tokens.contains_key(scan_id) {
            return Err(WardenError::Internal(format!("scan {} is already queued", scan_id)));
        }
        let token = CancellationToken::new();
        self.tokens.insert(scan_id.to_string(), token.clone());

        let worker = self.worker.clone();
        let permits = self.permits.clone();
        let tokens = self.tokens.clone();
        let id = scan_id.to_string();
        let handle = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(scan_id = %id, "Worker pool closed, scan not started");
                    tokens.remove(&id);
                    return;
                }
            };
            debug!(scan_id = %id, "Worker picked up scan");
            worker.process(&id, token).await;
            tokens.remove(&id);
        });
        self.handles.insert(scan_id.to_string(), handle);
        info!(scan_id, "Scan enqueued");
        Ok(())
    }

    async fn request_cancel(&self, scan_id: &str) -> Result<bool, WardenError> {
        match self.tokens.get(scan_id) {
            Some(token) => {
                token.cancel();
                info!(scan_id, "Cancellation requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Queue handle for a process that runs no workers, such as `warden cancel`.
/// Cancellation of a running scan is carried by its stored status, which
/// the owning engine polls between tools.
pub struct DetachedQueue;

#[async_trait]
impl TaskQueue for DetachedQueue {
    async fn enqueue(&self, scan_id: &str) -> Result<(), WardenError> {
        Err(WardenError::Internal(format!("no workers in this process to run scan {}", scan_id)))
    }

    async fn request_cancel(&self, _scan_id: &str) -> Result<bool, WardenError> {
        Ok(false)
    }
}
