use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BoxError;

/// Why an order needs a dispatch pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchReason {
    Created,
    Rejected { provider_id: Uuid },
    OfferTimeout { provider_id: Uuid },
    /// The accepted offer could not be applied to the order row.
    AcceptFailed { provider_id: Uuid },
    /// Every untried candidate was holding another order's offer.
    Retry,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchTask {
    pub order_id: Uuid,
    pub reason: DispatchReason,
}

impl DispatchTask {
    pub fn new(order_id: Uuid, reason: DispatchReason) -> Self {
        Self { order_id, reason }
    }
}

/// Hands dispatch work to the background engine. Never blocks the caller.
pub trait DispatchScheduler: Send + Sync {
    fn schedule(&self, task: DispatchTask) -> Result<(), BoxError>;
}
