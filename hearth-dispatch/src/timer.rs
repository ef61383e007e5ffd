use hearth_core::{DispatchReason, DispatchScheduler, DispatchTask};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKey {
    Offer { provider_id: Uuid, order_id: Uuid },
    Retry { order_id: Uuid },
}

/// One-shot dispatch timers: offer timeouts and contention retries. Firing
/// only enqueues a task; the engine decides whether it still applies.
pub struct OfferTimers {
    armed: Mutex<HashSet<TimerKey>>,
    queue: Arc<dyn DispatchScheduler>,
}

impl OfferTimers {
    pub fn new(queue: Arc<dyn DispatchScheduler>) -> Arc<Self> {
        Arc::new(Self { armed: Mutex::new(HashSet::new()), queue })
    }

    /// Arm a timeout for the provider/order pair. Returns `false` when one is
    /// already pending for that pair.
    pub fn arm(self: &Arc<Self>, provider_id: Uuid, order_id: Uuid, after: Duration) -> bool {
        self.fire_after(
            TimerKey::Offer { provider_id, order_id },
            DispatchTask::new(order_id, DispatchReason::OfferTimeout { provider_id }),
            after,
        )
    }

    /// Run the order through dispatch again after `after`. At most one retry
    /// is pending per order.
    pub fn defer(self: &Arc<Self>, order_id: Uuid, after: Duration) -> bool {
        self.fire_after(
            TimerKey::Retry { order_id },
            DispatchTask::new(order_id, DispatchReason::Retry),
            after,
        )
    }

    pub fn is_armed(&self, provider_id: Uuid, order_id: Uuid) -> bool {
        self.lock().contains(&TimerKey::Offer { provider_id, order_id })
    }

    pub fn is_deferred(&self, order_id: Uuid) -> bool {
        self.lock().contains(&TimerKey::Retry { order_id })
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn fire_after(self: &Arc<Self>, key: TimerKey, task: DispatchTask, after: Duration) -> bool {
        if !self.lock().insert(key) {
            return false;
        }
        let timers = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            timers.lock().remove(&key);
            if let Err(e) = timers.queue.schedule(task) {
                tracing::error!(order_id = %task.order_id, reason = ?task.reason, error = %e, "Failed to enqueue timed dispatch");
            }
        });
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<TimerKey>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
