use hearth_core::wallet::TX_ADMIN_CANCELLATION_FEE;
use hearth_core::{Actor, CoreError, CoreResult, OrderStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Order, StatusHistoryEntry};
use crate::service::OrderService;
use crate::state_machine::{StatusChange, Transition, TransitionRule};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order: Order,
    pub history: Vec<StatusHistoryEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkUpdateResult {
    pub affected: usize,
    pub requested: usize,
}

impl OrderService {
    pub async fn get_order_detail(&self, order_id: Uuid) -> CoreResult<OrderDetail> {
        let order = self.load(order_id).await?;
        let history = self
            .repo
            .history(order_id)
            .await
            .map_err(CoreError::dependency("orders.history"))?;
        Ok(OrderDetail { order, history })
    }

    /// Admin override. Completion and cancellation settle money through the
    /// same paths as the provider and customer flows.
    pub async fn update_status(
        &self,
        admin_id: Uuid,
        order_id: Uuid,
        to: OrderStatus,
        reason: Option<String>,
        notes: Option<String>,
    ) -> CoreResult<OrderDetail> {
        let order = self.load(order_id).await?;
        let actor = Actor::admin(admin_id);

        let mut text = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("Status changed by admin from {} to {}", order.status, to));
        if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
            text.push_str(". Notes: ");
            text.push_str(&notes);
        }

        match to {
            OrderStatus::Completed => {
                self.finish(order, actor, Some(text)).await?;
            }
            OrderStatus::Cancelled => {
                self.admin_cancel(admin_id, order_id, Some(text), None).await?;
            }
            _ => {
                if matches!(to, OrderStatus::Assigned | OrderStatus::Accepted) && order.provider_id.is_none() {
                    return Err(CoreError::validation("Order has no provider; use reassign to assign one"));
                }
                let from = order.status;
                let transition = Transition::new(StatusChange::new(from, to), actor).reason(text);
                let (order, entry) = self.commit(order, transition).await?;
                if to == OrderStatus::Expired {
                    self.release_hold_logged(&order, "admin expiry").await;
                    self.withdraw_offers(order.id).await;
                }
                tracing::info!(order_id = %order_id, admin_id = %admin_id, from = %from, to = %to, "Order status updated by admin");
                self.publish(&order, &entry);
            }
        }

        self.get_order_detail(order_id).await
    }

    pub async fn reassign_order(
        &self,
        admin_id: Uuid,
        order_id: Uuid,
        provider_id: Uuid,
        reason: Option<String>,
    ) -> CoreResult<OrderDetail> {
        let order = self.load(order_id).await?;
        if !matches!(order.status, OrderStatus::Assigned | OrderStatus::Accepted) {
            return Err(CoreError::validation(format!(
                "Cannot reassign order in '{}' status",
                order.status
            )));
        }
        self.providers
            .get_provider(provider_id)
            .await
            .map_err(CoreError::dependency("providers.get_provider"))?
            .ok_or_else(|| CoreError::not_found("Provider"))?;

        let old_provider = order.provider_id;
        let metadata = serde_json::json!({
            "old_provider_id": old_provider,
            "new_provider_id": provider_id,
        });
        let transition = Transition::new(
            StatusChange::new(order.status, OrderStatus::Assigned),
            Actor::admin(admin_id),
        )
        .rule(TransitionRule::Reassignment)
        .assign(provider_id)
        .reason(format!(
            "Order reassigned by admin. Reason: {}",
            reason.as_deref().unwrap_or("not given")
        ))
        .metadata(metadata);
        let (order, entry) = self.commit(order, transition).await?;

        if let Some(old) = old_provider.filter(|old| *old != provider_id) {
            self.release_provider(old).await;
        }
        // Out of the candidate pool until they accept and finish the job.
        self.mark_busy(provider_id).await;
        tracing::info!(order_id = %order_id, admin_id = %admin_id, new_provider_id = %provider_id, "Order reassigned by admin");
        self.publish(&order, &entry);
        self.get_order_detail(order_id).await
    }

    /// Cancel on behalf of the platform. With `refund` the fee is
    /// `total - refund`; without it the standard stage fee applies.
    pub async fn admin_cancel(
        &self,
        admin_id: Uuid,
        order_id: Uuid,
        reason: Option<String>,
        refund: Option<Decimal>,
    ) -> CoreResult<OrderDetail> {
        let order = self.load(order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(CoreError::validation("Order is already cancelled"));
        }
        if order.status == OrderStatus::Completed {
            return Err(CoreError::validation("Cannot cancel a completed order. Use refund instead."));
        }

        let quote = match refund {
            Some(amount) => self.pricing.split_explicit_refund(order.total, amount)?,
            None => self.pricing.compute_cancellation_fee(order.status, order.total)?,
        };
        let reason = Some(format!(
            "Cancelled by admin. Reason: {}",
            reason.as_deref().unwrap_or("not given")
        ));
        self.cancel_with(
            order,
            Actor::admin(admin_id),
            reason,
            quote.fee,
            quote.refund,
            TX_ADMIN_CANCELLATION_FEE,
        )
        .await?;
        self.get_order_detail(order_id).await
    }

    /// Apply one status to many orders. The prior status is not carried in
    /// this path, so history records none. Orders the table rejects are
    /// skipped and not counted.
    pub async fn bulk_update_status(
        &self,
        admin_id: Uuid,
        order_ids: &[Uuid],
        status: &str,
        reason: Option<String>,
    ) -> CoreResult<BulkUpdateResult> {
        let to: OrderStatus = status
            .parse()
            .map_err(|e: hearth_core::status::UnknownStatus| CoreError::validation(e.to_string()))?;
        if matches!(to, OrderStatus::Completed | OrderStatus::Cancelled) {
            return Err(CoreError::validation(format!(
                "Bulk updates cannot move orders to '{}'; settle them individually",
                to
            )));
        }
        if order_ids.is_empty() {
            return Err(CoreError::validation("At least one order ID is required"));
        }

        let actor = Actor::admin(admin_id);
        let mut affected = 0;
        for order_id in order_ids {
            let order = match self.repo.get(*order_id).await {
                Ok(Some(order)) => order,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(order_id = %order_id, error = %e, "Bulk update lookup failed");
                    continue;
                }
            };
            if matches!(to, OrderStatus::Assigned | OrderStatus::Accepted) && order.provider_id.is_none() {
                continue;
            }
            let transition = Transition::new(StatusChange::blind(to), actor)
                .maybe_reason(reason.clone())
                .metadata(serde_json::json!({ "bulk": true }));
            match self.commit(order, transition).await {
                Ok((order, entry)) => {
                    affected += 1;
                    if to == OrderStatus::Expired {
                        self.release_hold_logged(&order, "bulk expiry").await;
                        self.withdraw_offers(order.id).await;
                    }
                    self.publish(&order, &entry);
                }
                Err(e) => tracing::debug!(order_id = %order_id, error = %e, "Bulk update skipped order"),
            }
        }

        tracing::info!(
            admin_id = %admin_id,
            status = %to,
            requested = order_ids.len(),
            affected,
            "Bulk status update completed"
        );
        Ok(BulkUpdateResult { affected, requested: order_ids.len() })
    }
}
