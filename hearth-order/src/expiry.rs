use chrono::{DateTime, Utc};
use hearth_core::{Actor, CoreError, CoreResult, OrderStatus};
use std::sync::Arc;
use std::time::Duration;

use crate::service::OrderService;
use crate::state_machine::{StatusChange, Transition};

const SWEEP_BATCH: usize = 100;

impl OrderService {
    /// Expire orders still waiting for a provider past `expires_at`.
    /// Returns how many were expired by this call.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let overdue = self
            .repo
            .find_overdue(now, SWEEP_BATCH)
            .await
            .map_err(CoreError::dependency("orders.find_overdue"))?;

        let mut expired = 0;
        for order in overdue {
            let order_id = order.id;
            let transition = Transition::new(
                StatusChange::new(order.status, OrderStatus::Expired),
                Actor::system(),
            )
            .reason("Order expired before a provider accepted");
            match self.commit(order, transition).await {
                Ok((order, entry)) => {
                    expired += 1;
                    self.release_hold_logged(&order, "expiry sweep").await;
                    self.withdraw_offers(order.id).await;
                    self.publish(&order, &entry);
                }
                // Accepted or cancelled while the sweep ran.
                Err(CoreError::ConflictError(_)) | Err(CoreError::ValidationError(_)) => {}
                Err(e) => tracing::error!(order_id = %order_id, error = %e, "Failed to expire order"),
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Expired overdue orders");
        }
        Ok(expired)
    }
}

/// Runs [`OrderService::expire_overdue`] every `period` until the task is dropped.
pub fn spawn_expiry_sweeper(service: Arc<OrderService>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = service.expire_overdue(Utc::now()).await {
                tracing::error!(error = %e, "Expiry sweep failed");
            }
        }
    })
}
