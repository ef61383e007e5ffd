use chrono::Utc;
use hearth_core::{
    BoxError, CoreError, CoreResult, DispatchReason, DispatchTask, OfferLedger, OrderStatus,
    ProviderDirectory,
};
use hearth_order::{OrderRepository, OrderService};
use hearth_shared::events::OfferExtendedEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::timer::OfferTimers;

/// The ledger keeps an offer slightly longer than its timer so the timer,
/// not key expiry, ends the offer. Timers do not survive a restart; see
/// [`DispatchEngine::recover`].
const OFFER_TTL_GRACE: Duration = Duration::from_secs(5);

const RECOVERY_BATCH: usize = 500;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub offer_timeout: Duration,
    pub tried_ttl: Duration,
    pub search_radius_meters: u32,
    pub candidate_limit: usize,
    /// Delay before retrying an order whose untried candidates were all
    /// holding other offers.
    pub contention_retry: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            offer_timeout: Duration::from_secs(60),
            tried_ttl: Duration::from_secs(24 * 60 * 60),
            search_radius_meters: 15_000,
            candidate_limit: 10,
            contention_retry: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A provider now holds the live offer.
    Offered { provider_id: Uuid },
    /// No candidate left; the order failed with `no_provider_available`.
    Exhausted,
    /// Untried candidates exist but all hold other offers; a retry is pending.
    Deferred,
    /// Nothing to do: the order moved on, or the timed-out offer was already consumed.
    Skipped,
}

/// Sequential, one-offer-at-a-time provider matching.
pub struct DispatchEngine {
    orders: Arc<OrderService>,
    ledger: Arc<dyn OfferLedger>,
    providers: Arc<dyn ProviderDirectory>,
    timers: Arc<OfferTimers>,
    settings: DispatchSettings,
    offers: broadcast::Sender<OfferExtendedEvent>,
}

impl DispatchEngine {
    pub fn new(
        orders: Arc<OrderService>,
        ledger: Arc<dyn OfferLedger>,
        providers: Arc<dyn ProviderDirectory>,
        timers: Arc<OfferTimers>,
        settings: DispatchSettings,
    ) -> Self {
        let (offers, _) = broadcast::channel(256);
        Self { orders, ledger, providers, timers, settings, offers }
    }

    /// Offers extended to providers, for notification delivery.
    pub fn subscribe_offers(&self) -> broadcast::Receiver<OfferExtendedEvent> {
        self.offers.subscribe()
    }

    pub async fn handle(&self, task: DispatchTask) -> CoreResult<DispatchOutcome> {
        if let DispatchReason::OfferTimeout { provider_id } = task.reason {
            // Accept and reject consume the same key; whoever deletes it owns the outcome.
            let expired = self
                .ledger
                .consume_offer(provider_id, task.order_id)
                .await
                .map_err(CoreError::dependency("ledger.consume_offer"))?;
            if !expired {
                tracing::debug!(order_id = %task.order_id, provider_id = %provider_id, "Offer already resolved before timeout");
                return Ok(DispatchOutcome::Skipped);
            }
            tracing::info!(order_id = %task.order_id, provider_id = %provider_id, "Offer timed out");
        }
        self.dispatch(task.order_id).await
    }

    /// Offer the order to the nearest qualified provider not yet tried.
    pub async fn dispatch(&self, order_id: Uuid) -> CoreResult<DispatchOutcome> {
        let tried = self
            .ledger
            .tried_providers(order_id)
            .await
            .map_err(CoreError::dependency("ledger.tried_providers"))?;

        let order = match self
            .orders
            .repository()
            .get(order_id)
            .await
            .map_err(CoreError::dependency("orders.get"))?
        {
            Some(order) => order,
            None => {
                tracing::warn!(order_id = %order_id, "Dispatch for unknown order");
                return Ok(DispatchOutcome::Skipped);
            }
        };
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::SearchingProvider) {
            tracing::debug!(order_id = %order_id, status = %order.status, "Order no longer needs a provider");
            return Ok(DispatchOutcome::Skipped);
        }

        // Tried providers are filtered out below, so widen the page by that many.
        let limit = self.settings.candidate_limit + tried.len();
        let candidates = self
            .providers
            .find_nearest_qualified(
                &order.service_ids(),
                order.location,
                self.settings.search_radius_meters,
                limit,
            )
            .await
            .map_err(CoreError::dependency("providers.find_nearest_qualified"))?;

        let mut contended = false;
        for candidate in candidates.iter().filter(|c| !tried.contains(&c.id)) {
            match self.extend_offer(candidate.id, order_id).await {
                Ok(true) => {
                    tracing::info!(
                        order_id = %order_id,
                        provider_id = %candidate.id,
                        distance_meters = candidate.distance_meters,
                        "Offer extended"
                    );
                    return Ok(DispatchOutcome::Offered { provider_id: candidate.id });
                }
                Ok(false) => {
                    contended = true;
                    tracing::debug!(order_id = %order_id, provider_id = %candidate.id, "Provider holds another offer, skipping");
                }
                Err(e) => return Err(CoreError::dependency("ledger.claim_offer")(e)),
            }
        }

        // A busy candidate is not an exhausted one.
        if contended {
            let retry_in = self.settings.contention_retry;
            if self.timers.defer(order_id, retry_in) {
                tracing::info!(
                    order_id = %order_id,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "All untried candidates hold other offers, retrying later"
                );
            }
            return Ok(DispatchOutcome::Deferred);
        }

        if self.orders.mark_no_provider_available(order_id).await? {
            Ok(DispatchOutcome::Exhausted)
        } else {
            Ok(DispatchOutcome::Skipped)
        }
    }

    /// Re-drive orders that were waiting for a provider when the process
    /// stopped. Their offer timers died with it, so any offer still held in
    /// the ledger is withdrawn and the order goes through dispatch afresh.
    /// Assumes this process is the only dispatcher.
    pub async fn recover(&self) -> CoreResult<usize> {
        let waiting = self
            .orders
            .repository()
            .find_awaiting_provider(RECOVERY_BATCH)
            .await
            .map_err(CoreError::dependency("orders.find_awaiting_provider"))?;

        let mut recovered = 0;
        for order in waiting {
            self.orders.withdraw_offers(order.id).await;
            match self.dispatch(order.id).await {
                Ok(outcome) => {
                    recovered += 1;
                    tracing::debug!(order_id = %order.id, outcome = ?outcome, "Recovered order");
                }
                Err(e) => tracing::error!(order_id = %order.id, error = %e, "Recovery dispatch failed"),
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "Recovered orders awaiting a provider");
        }
        Ok(recovered)
    }

    async fn extend_offer(&self, provider_id: Uuid, order_id: Uuid) -> Result<bool, BoxError> {
        let ttl = self.settings.offer_timeout + OFFER_TTL_GRACE;
        if !self.ledger.claim_offer(provider_id, order_id, ttl).await? {
            return Ok(false);
        }
        if !self.timers.arm(provider_id, order_id, self.settings.offer_timeout) {
            tracing::warn!(order_id = %order_id, provider_id = %provider_id, "Offer timer already armed");
        }
        // The live offer and its timer stand even if this write fails.
        if let Err(e) = self
            .ledger
            .mark_tried(order_id, provider_id, self.settings.tried_ttl)
            .await
        {
            tracing::error!(order_id = %order_id, provider_id = %provider_id, error = %e, "ledger.mark_tried failed");
        }

        let _ = self.offers.send(OfferExtendedEvent {
            order_id,
            provider_id,
            expires_in_seconds: self.settings.offer_timeout.as_secs(),
            timestamp: Utc::now().timestamp(),
        });
        Ok(true)
    }
}
