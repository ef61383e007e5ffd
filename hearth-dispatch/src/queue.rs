use hearth_core::{BoxError, DispatchScheduler, DispatchTask};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::DispatchEngine;

/// Sending half of the dispatch task queue.
///
/// Scheduling never waits: a full queue is reported to the caller, which logs
/// it. The order then stays `searching_provider` until the expiry sweep.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<DispatchTask>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DispatchTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl DispatchScheduler for DispatchQueue {
    fn schedule(&self, task: DispatchTask) -> Result<(), BoxError> {
        self.tx
            .try_send(task)
            .map_err(|e| format!("dispatch queue rejected task: {}", e).into())
    }
}

/// Drain the queue, one spawned handler per task. At most one task is in
/// flight per order: every task comes from creation, from consuming that
/// order's single live offer, or from a retry deferred while it had none.
pub fn start_dispatch_worker(
    mut rx: mpsc::Receiver<DispatchTask>,
    engine: Arc<DispatchEngine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Dispatch worker started");
        while let Some(task) = rx.recv().await {
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.handle(task).await {
                    tracing::error!(order_id = %task.order_id, reason = ?task.reason, error = %e, "Dispatch task failed");
                }
            });
        }
        tracing::info!("Dispatch queue closed, worker stopping");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::DispatchReason;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let (queue, mut rx) = DispatchQueue::new(1);
        let task = DispatchTask::new(Uuid::new_v4(), DispatchReason::Created);
        queue.schedule(task).unwrap();
        assert!(queue.schedule(task).is_err());
        assert_eq!(rx.recv().await, Some(task));
    }
}
