use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use hearth_catalog::{AddOn, PricingCalculator, SelectedOption, ServiceCatalog, ServiceDefinition};
use hearth_core::wallet::{REFERENCE_SERVICE_ORDER, TX_CANCELLATION_FEE};
use hearth_core::{
    Actor, ActorRole, CoreError, CoreResult, DispatchReason, DispatchScheduler, DispatchTask,
    GeoPoint, OfferLedger, OrderStatus, PaymentMethod, PaymentStatus, ProviderDirectory,
    ProviderStatus, WalletService,
};
use hearth_shared::{Masked, OrderEvent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{generate_order_code, Order, OrderAddOn, OrderItem, StatusHistoryEntry};
use crate::repository::OrderRepository;
use crate::state_machine::{apply_transition, can_transition, StatusChange, Transition, TransitionRule};

#[derive(Debug, Clone)]
pub struct OrderSettings {
    pub hold_duration_minutes: u32,
    pub expiration_minutes: i64,
    pub max_active_orders_per_customer: usize,
    /// Accepting a new offer is refused at this many active jobs.
    pub max_active_orders_per_provider: usize,
    /// TTL of a rejected provider's entry in the exclusion set.
    pub exclusion_ttl: Duration,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            hold_duration_minutes: 24 * 60,
            expiration_minutes: 30,
            max_active_orders_per_customer: 5,
            max_active_orders_per_provider: 5,
            exclusion_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub service_id: Uuid,
    #[serde(default)]
    pub selected_options: Vec<SelectedOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Carries the customer's UTC offset; surge is judged on local time.
    pub service_date: DateTime<FixedOffset>,
    #[serde(default = "default_frequency")]
    pub frequency: String,
    pub notes: Option<String>,
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub add_on_ids: Vec<Uuid>,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
}

fn default_frequency() -> String {
    "once".to_string()
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Wallet
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationPreview {
    pub order_id: Uuid,
    pub order_code: String,
    pub current_status: OrderStatus,
    pub total: Decimal,
    pub cancellation_fee: Decimal,
    pub refund_amount: Decimal,
    pub fee_percentage: Decimal,
    pub message: String,
}

/// Customer, provider and admin operations on orders.
///
/// Every status change goes through [`apply_transition`] and is persisted with
/// [`OrderRepository::save_transition`], so the audit trail and timestamps are
/// written the same way whoever acts.
pub struct OrderService {
    pub(crate) repo: Arc<dyn OrderRepository>,
    pub(crate) catalog: Arc<dyn ServiceCatalog>,
    pub(crate) wallet: Arc<dyn WalletService>,
    pub(crate) ledger: Arc<dyn OfferLedger>,
    pub(crate) providers: Arc<dyn ProviderDirectory>,
    pub(crate) scheduler: Arc<dyn DispatchScheduler>,
    pub(crate) pricing: PricingCalculator,
    pub(crate) settings: OrderSettings,
    events: broadcast::Sender<OrderEvent>,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        catalog: Arc<dyn ServiceCatalog>,
        wallet: Arc<dyn WalletService>,
        ledger: Arc<dyn OfferLedger>,
        providers: Arc<dyn ProviderDirectory>,
        scheduler: Arc<dyn DispatchScheduler>,
        pricing: PricingCalculator,
        settings: OrderSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { repo, catalog, wallet, ledger, providers, scheduler, pricing, settings, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    pub fn pricing(&self) -> &PricingCalculator {
        &self.pricing
    }

    pub fn repository(&self) -> Arc<dyn OrderRepository> {
        self.repo.clone()
    }

    // --- Customer ---

    pub async fn create_order(&self, customer_id: Uuid, req: CreateOrderRequest) -> CoreResult<Order> {
        let now = Utc::now();
        let location = GeoPoint::new(req.latitude, req.longitude);

        if req.items.is_empty() {
            return Err(CoreError::validation("At least one service is required"));
        }
        if req.address.trim().is_empty() {
            return Err(CoreError::validation("Address is required"));
        }
        if !location.is_valid() {
            return Err(CoreError::validation("Invalid coordinates"));
        }
        if req.service_date.with_timezone(&Utc) <= now {
            return Err(CoreError::validation("Service date must be in the future"));
        }

        let active = self
            .repo
            .count_active_for_customer(customer_id)
            .await
            .map_err(CoreError::dependency("orders.count_active"))?;
        if active >= self.settings.max_active_orders_per_customer {
            return Err(CoreError::validation(
                "You have too many active orders. Please wait for some to complete before booking again.",
            ));
        }

        let (items, category_slug) = self.price_items(&req).await?;
        let add_ons = self.load_add_ons(&req.add_on_ids, &category_slug).await?;

        let subtotal = items.iter().map(|i| i.calculated_price).sum::<Decimal>()
            + add_ons.iter().map(|a| a.price).sum::<Decimal>();
        let surge_fee = self.pricing.compute_surge_fee(&req.service_date);
        let breakdown = self.pricing.compute_breakdown(subtotal, surge_fee, Decimal::ZERO)?;

        let code = generate_order_code(now);
        let hold_id = self
            .wallet
            .hold_funds(
                customer_id,
                breakdown.total,
                REFERENCE_SERVICE_ORDER,
                &code,
                self.settings.hold_duration_minutes,
            )
            .await
            .map_err(CoreError::dependency("wallet.hold_funds"))?;

        let mut order = Order {
            id: Uuid::new_v4(),
            code,
            customer_id,
            provider_id: None,
            category_slug,
            address: Masked::new(req.address),
            location,
            service_date: req.service_date.with_timezone(&Utc),
            frequency: req.frequency,
            notes: req.notes,
            items,
            add_ons,
            subtotal: breakdown.subtotal,
            surge_fee: breakdown.surge_fee,
            platform_commission: breakdown.platform_commission,
            discount: breakdown.discount,
            total: breakdown.total,
            status: OrderStatus::Pending,
            wallet_hold_id: Some(hold_id.clone()),
            payment_method: req.payment_method,
            payment_status: PaymentStatus::Pending,
            cancellation: None,
            customer_rating: None,
            provider_rating: None,
            created_at: now,
            updated_at: now,
            provider_accepted_at: None,
            provider_started_at: None,
            provider_completed_at: None,
            completed_at: None,
            expires_at: Some(now + ChronoDuration::minutes(self.settings.expiration_minutes)),
        };

        let opened = apply_transition(
            &mut order,
            Transition::new(
                StatusChange::new(OrderStatus::Pending, OrderStatus::SearchingProvider),
                Actor::customer(customer_id),
            )
            .reason("Order placed"),
            now,
        )?;

        if let Err(e) = self.repo.create(&order, std::slice::from_ref(&opened)).await {
            tracing::error!(customer_id = %customer_id, error = %e, "Failed to persist order, releasing hold");
            if let Err(release_err) = self.wallet.release_hold(&hold_id).await {
                tracing::error!(hold_id = %hold_id, error = %release_err, "Failed to release hold after order failure");
            }
            return Err(CoreError::dependency("orders.create")(e));
        }

        tracing::info!(order_id = %order.id, code = %order.code, total = %order.total, "Order created");
        self.publish(&order, &opened);
        self.schedule(DispatchTask::new(order.id, DispatchReason::Created));

        Ok(order)
    }

    async fn price_items(&self, req: &CreateOrderRequest) -> CoreResult<(Vec<OrderItem>, String)> {
        let mut ids: Vec<Uuid> = Vec::new();
        for item in &req.items {
            if !ids.contains(&item.service_id) {
                ids.push(item.service_id);
            }
        }
        let services: HashMap<Uuid, ServiceDefinition> = self
            .catalog
            .get_services(&ids)
            .await
            .map_err(CoreError::dependency("catalog.get_services"))?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let mut items = Vec::with_capacity(req.items.len());
        let mut category: Option<String> = None;
        for item in &req.items {
            let service = services.get(&item.service_id).ok_or_else(|| {
                CoreError::validation(format!("Service with ID {} not found", item.service_id))
            })?;
            if !service.is_active {
                return Err(CoreError::validation(format!(
                    "Service '{}' is not available",
                    service.title
                )));
            }
            match &category {
                None => category = Some(service.category_slug.clone()),
                Some(slug) if *slug != service.category_slug => {
                    return Err(CoreError::validation("All services must belong to the same category"));
                }
                Some(_) => {}
            }
            let quote = self.pricing.compute_item_price(service, &item.selected_options)?;
            items.push(OrderItem::from_quote(service, quote));
        }

        let category = category.ok_or_else(|| CoreError::validation("At least one service is required"))?;
        Ok((items, category))
    }

    async fn load_add_ons(&self, ids: &[Uuid], category_slug: &str) -> CoreResult<Vec<OrderAddOn>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let found: HashMap<Uuid, AddOn> = self
            .catalog
            .get_addons(ids)
            .await
            .map_err(CoreError::dependency("catalog.get_addons"))?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        ids.iter()
            .map(|id| {
                let addon = found
                    .get(id)
                    .ok_or_else(|| CoreError::validation(format!("Add-on with ID {} not found", id)))?;
                if !addon.is_active {
                    return Err(CoreError::validation(format!(
                        "Add-on '{}' is not available",
                        addon.title
                    )));
                }
                if addon.category_slug != category_slug {
                    return Err(CoreError::validation(format!(
                        "Add-on '{}' does not belong to category '{}'",
                        addon.title, category_slug
                    )));
                }
                Ok(OrderAddOn::from(addon))
            })
            .collect()
    }

    /// Customers see their own orders, providers the ones assigned to them.
    pub async fn get_order(&self, actor: Actor, order_id: Uuid) -> CoreResult<Order> {
        let order = self.load(order_id).await?;
        let visible = match actor.role {
            ActorRole::Admin | ActorRole::System => true,
            ActorRole::Customer => actor.id == Some(order.customer_id),
            ActorRole::Provider => actor.id.is_some() && order.provider_id == actor.id,
        };
        if !visible {
            return Err(CoreError::forbidden("You do not have access to this order"));
        }
        Ok(order)
    }

    pub async fn cancellation_preview(&self, customer_id: Uuid, order_id: Uuid) -> CoreResult<CancellationPreview> {
        let order = self.load_owned(customer_id, order_id).await?;
        if !can_transition(order.status, OrderStatus::Cancelled) {
            return Err(CoreError::validation(format!(
                "Order cannot be cancelled in '{}' status",
                order.status
            )));
        }
        let quote = self.pricing.compute_cancellation_fee(order.status, order.total)?;
        let fee_percentage = (quote.fee_rate * Decimal::ONE_HUNDRED).normalize();

        let mut message = format!("Cancellation fee of {}% will be applied.", fee_percentage.round());
        if quote.refund > Decimal::ZERO {
            message.push_str(&format!(" You will receive a refund of ${:.2}.", quote.refund));
        }

        Ok(CancellationPreview {
            order_id: order.id,
            order_code: order.code,
            current_status: order.status,
            total: order.total,
            cancellation_fee: quote.fee,
            refund_amount: quote.refund,
            fee_percentage,
            message,
        })
    }

    /// Customer cancellation at the standard fee for the order's stage.
    pub async fn cancel_order(&self, customer_id: Uuid, order_id: Uuid, reason: Option<String>) -> CoreResult<Order> {
        let order = self.load_owned(customer_id, order_id).await?;
        if order.status == OrderStatus::Completed {
            return Err(CoreError::validation("Cannot cancel a completed order. Use refund instead."));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(CoreError::validation("Order is already cancelled"));
        }
        let quote = self.pricing.compute_cancellation_fee(order.status, order.total)?;
        self.cancel_with(order, Actor::customer(customer_id), reason, quote.fee, quote.refund, TX_CANCELLATION_FEE)
            .await
    }

    /// Persist the cancellation first, then settle the hold. A lost race
    /// therefore never moves money.
    pub(crate) async fn cancel_with(
        &self,
        order: Order,
        actor: Actor,
        reason: Option<String>,
        fee: Decimal,
        refund: Decimal,
        fee_transaction_type: &str,
    ) -> CoreResult<Order> {
        let from = order.status;
        let metadata = serde_json::json!({
            "cancellation_fee": fee.to_string(),
            "refund_amount": refund.to_string(),
        });
        let transition = Transition::new(StatusChange::new(from, OrderStatus::Cancelled), actor)
            .maybe_reason(reason)
            .metadata(metadata)
            .cancellation(fee, refund);
        let (order, entry) = self.commit(order, transition).await?;

        if let Some(hold_id) = &order.wallet_hold_id {
            if let Err(e) = self.wallet.release_hold(hold_id).await {
                tracing::error!(order_id = %order.id, hold_id = %hold_id, error = %e, "wallet.release_hold failed during cancellation");
            }
            if fee > Decimal::ZERO {
                let description = format!("Cancellation fee for order {}", order.code);
                if let Err(e) = self
                    .wallet
                    .debit(order.customer_id, fee, fee_transaction_type, &order.id.to_string(), &description)
                    .await
                {
                    tracing::error!(order_id = %order.id, fee = %fee, error = %e, "wallet.debit failed for cancellation fee");
                }
            }
        }

        match (order.provider_id, from) {
            (Some(provider_id), OrderStatus::Assigned | OrderStatus::Accepted) => {
                self.release_provider(provider_id).await;
            }
            (_, OrderStatus::Pending | OrderStatus::SearchingProvider) => {
                self.withdraw_offers(order.id).await;
            }
            _ => {}
        }

        tracing::info!(order_id = %order.id, cancelled_by = %actor.role, fee = %fee, refund = %refund, "Order cancelled");
        self.publish(&order, &entry);
        Ok(order)
    }

    // --- Provider ---

    /// Take the live offer, or an order an admin assigned to this provider.
    ///
    /// The offer key is consumed atomically first, so a second accept (or a
    /// racing reject/timeout) finds nothing to consume.
    pub async fn accept_order(&self, provider_id: Uuid, order_id: Uuid) -> CoreResult<Order> {
        self.providers
            .get_provider(provider_id)
            .await
            .map_err(CoreError::dependency("providers.get_provider"))?
            .ok_or_else(|| CoreError::not_found("Provider"))?;
        let active = self
            .repo
            .count_active_for_provider(provider_id)
            .await
            .map_err(CoreError::dependency("orders.count_active_for_provider"))?;

        let consumed = self
            .ledger
            .consume_offer(provider_id, order_id)
            .await
            .map_err(CoreError::dependency("ledger.consume_offer"))?;
        if !consumed {
            return self.accept_assignment(provider_id, order_id).await;
        }

        if active >= self.settings.max_active_orders_per_provider {
            // The offer is spent; pass the order on as if declined.
            tracing::info!(order_id = %order_id, provider_id = %provider_id, active, "Provider at active order limit, offer passed on");
            self.pass_on(provider_id, order_id).await;
            return Err(CoreError::validation(
                "You have too many active orders. Complete some orders before accepting new ones.",
            ));
        }

        let order = self.load(order_id).await?;
        let now = Utc::now();
        let actor = Actor::provider(provider_id);
        let mut next = order.clone();
        let assigned = apply_transition(
            &mut next,
            Transition::new(
                StatusChange::new(OrderStatus::SearchingProvider, OrderStatus::Assigned),
                actor,
            )
            .assign(provider_id)
            .reason("Provider accepted the offer"),
            now,
        )?;
        let accepted = apply_transition(
            &mut next,
            Transition::new(StatusChange::new(OrderStatus::Assigned, OrderStatus::Accepted), actor),
            now,
        )?;

        let history = [assigned, accepted];
        match self
            .repo
            .save_transition(&next, OrderStatus::SearchingProvider, &history)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(Self::lost_race(order_id)),
            Err(e) => {
                // The offer is gone; hand the order back to dispatch.
                self.schedule(DispatchTask::new(order_id, DispatchReason::AcceptFailed { provider_id }));
                return Err(CoreError::dependency("orders.save_transition")(e));
            }
        }

        self.mark_busy(provider_id).await;

        tracing::info!(order_id = %order_id, provider_id = %provider_id, "Order accepted");
        for entry in &history {
            self.publish(&next, entry);
        }
        Ok(next)
    }

    /// `assigned` to `accepted` for the provider an admin put on the order.
    /// Anything else has no live offer to take.
    async fn accept_assignment(&self, provider_id: Uuid, order_id: Uuid) -> CoreResult<Order> {
        let order = match self
            .repo
            .get(order_id)
            .await
            .map_err(CoreError::dependency("orders.get"))?
        {
            Some(order) if order.status == OrderStatus::Assigned && order.is_assigned_to(provider_id) => order,
            _ => return Err(CoreError::StaleOfferError),
        };

        let transition = Transition::new(
            StatusChange::new(OrderStatus::Assigned, OrderStatus::Accepted),
            Actor::provider(provider_id),
        )
        .reason("Provider accepted the assignment");
        let (order, entry) = self.commit(order, transition).await?;

        self.mark_busy(provider_id).await;
        tracing::info!(order_id = %order_id, provider_id = %provider_id, "Assignment accepted");
        self.publish(&order, &entry);
        Ok(order)
    }

    pub async fn reject_order(&self, provider_id: Uuid, order_id: Uuid, reason: Option<String>) -> CoreResult<()> {
        let consumed = self
            .ledger
            .consume_offer(provider_id, order_id)
            .await
            .map_err(CoreError::dependency("ledger.consume_offer"))?;
        if !consumed {
            return Err(CoreError::StaleOfferError);
        }

        tracing::info!(
            order_id = %order_id,
            provider_id = %provider_id,
            reason = reason.as_deref().unwrap_or(""),
            "Offer rejected"
        );
        self.pass_on(provider_id, order_id).await;
        Ok(())
    }

    /// Exclude the provider whose offer was just consumed and redispatch.
    async fn pass_on(&self, provider_id: Uuid, order_id: Uuid) {
        if let Err(e) = self
            .ledger
            .mark_tried(order_id, provider_id, self.settings.exclusion_ttl)
            .await
        {
            tracing::error!(order_id = %order_id, provider_id = %provider_id, error = %e, "ledger.mark_tried failed on reject");
        }
        self.schedule(DispatchTask::new(order_id, DispatchReason::Rejected { provider_id }));
    }

    pub async fn start_order(&self, provider_id: Uuid, order_id: Uuid) -> CoreResult<Order> {
        let order = self.load_assigned(provider_id, order_id).await?;
        let transition = Transition::new(
            StatusChange::new(order.status, OrderStatus::InProgress),
            Actor::provider(provider_id),
        );
        let (order, entry) = self.commit(order, transition).await?;
        tracing::info!(order_id = %order_id, provider_id = %provider_id, "Work started");
        self.publish(&order, &entry);
        Ok(order)
    }

    pub async fn complete_order(&self, provider_id: Uuid, order_id: Uuid) -> CoreResult<Order> {
        let order = self.load_assigned(provider_id, order_id).await?;
        self.finish(order, Actor::provider(provider_id), None).await
    }

    /// Capture, then pay the provider, then mark completed. A failed capture
    /// leaves the order untouched; a failed payout is logged for manual
    /// reconciliation and the order still completes.
    pub(crate) async fn finish(&self, order: Order, actor: Actor, reason: Option<String>) -> CoreResult<Order> {
        if !can_transition(order.status, OrderStatus::Completed) {
            return Err(CoreError::validation(format!(
                "Invalid status transition from {} to {}",
                order.status,
                OrderStatus::Completed
            )));
        }
        let provider_id = order
            .provider_id
            .ok_or_else(|| CoreError::validation("Order has no assigned provider"))?;

        let capture_id = match &order.wallet_hold_id {
            Some(hold_id) => Some(
                self.wallet
                    .capture_hold(hold_id, &format!("Payment for order {}", order.code))
                    .await
                    .map_err(CoreError::dependency("wallet.capture_hold"))?,
            ),
            None => None,
        };

        let commission = self.pricing.compute_platform_commission(order.total);
        let payout = self.pricing.compute_provider_payout(order.total);
        let mut payout_settled = false;
        match self.providers.get_provider(provider_id).await {
            Ok(Some(profile)) => {
                let description = format!("Payout for order {}", order.code);
                match self
                    .wallet
                    .transfer_funds(order.customer_id, profile.user_id, payout, &description)
                    .await
                {
                    Ok(()) => payout_settled = true,
                    Err(e) => tracing::error!(
                        order_id = %order.id,
                        provider_id = %provider_id,
                        payout = %payout,
                        error = %e,
                        "wallet.transfer_funds failed, payout needs manual reconciliation"
                    ),
                }
            }
            Ok(None) => tracing::error!(order_id = %order.id, provider_id = %provider_id, "Provider missing at payout, needs manual reconciliation"),
            Err(e) => tracing::error!(order_id = %order.id, provider_id = %provider_id, error = %e, "Provider lookup failed at payout, needs manual reconciliation"),
        }

        let metadata = serde_json::json!({
            "capture_id": capture_id,
            "platform_commission": commission.to_string(),
            "provider_payout": payout.to_string(),
            "payout_settled": payout_settled,
        });
        let transition = Transition::new(StatusChange::new(order.status, OrderStatus::Completed), actor)
            .maybe_reason(reason)
            .metadata(metadata);
        let (order, entry) = self.commit(order, transition).await?;

        self.release_provider(provider_id).await;
        tracing::info!(order_id = %order.id, provider_id = %provider_id, payout = %payout, "Order completed");
        self.publish(&order, &entry);
        Ok(order)
    }

    // --- Dispatch hooks ---

    /// Terminal failure when dispatch runs out of candidates. Releases the
    /// hold only when this call made the change. Returns whether it did.
    pub async fn mark_no_provider_available(&self, order_id: Uuid) -> CoreResult<bool> {
        let order = self.load(order_id).await?;
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::SearchingProvider) {
            return Ok(false);
        }
        let transition = Transition::new(
            StatusChange::new(order.status, OrderStatus::NoProviderAvailable),
            Actor::system(),
        )
        .rule(TransitionRule::DispatchExhausted)
        .reason("No qualified provider accepted the order");

        let (order, entry) = match self.commit(order, transition).await {
            Ok(done) => done,
            Err(CoreError::ConflictError(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        self.release_hold_logged(&order, "dispatch exhausted").await;
        tracing::warn!(order_id = %order_id, "No provider available");
        self.publish(&order, &entry);
        Ok(true)
    }

    // --- Internals ---

    pub(crate) async fn load(&self, order_id: Uuid) -> CoreResult<Order> {
        self.repo
            .get(order_id)
            .await
            .map_err(CoreError::dependency("orders.get"))?
            .ok_or_else(|| CoreError::not_found("Order"))
    }

    pub(crate) async fn load_owned(&self, customer_id: Uuid, order_id: Uuid) -> CoreResult<Order> {
        let order = self.load(order_id).await?;
        if order.customer_id != customer_id {
            return Err(CoreError::forbidden("You do not have access to this order"));
        }
        Ok(order)
    }

    pub(crate) async fn load_assigned(&self, provider_id: Uuid, order_id: Uuid) -> CoreResult<Order> {
        let order = self.load(order_id).await?;
        if !order.is_assigned_to(provider_id) {
            return Err(CoreError::forbidden("Order is not assigned to you"));
        }
        Ok(order)
    }

    /// Validate and apply on a copy, then persist against the status it was
    /// read with.
    pub(crate) async fn commit(
        &self,
        order: Order,
        transition: Transition,
    ) -> CoreResult<(Order, StatusHistoryEntry)> {
        let expected = order.status;
        let mut next = order;
        let entry = apply_transition(&mut next, transition, Utc::now())?;
        let saved = self
            .repo
            .save_transition(&next, expected, std::slice::from_ref(&entry))
            .await
            .map_err(CoreError::dependency("orders.save_transition"))?;
        if !saved {
            return Err(Self::lost_race(next.id));
        }
        Ok((next, entry))
    }

    fn lost_race(order_id: Uuid) -> CoreError {
        CoreError::ConflictError(format!("Order {} was modified concurrently", order_id))
    }

    pub(crate) async fn release_hold_logged(&self, order: &Order, context: &str) {
        if let Some(hold_id) = &order.wallet_hold_id {
            if let Err(e) = self.wallet.release_hold(hold_id).await {
                tracing::error!(order_id = %order.id, hold_id = %hold_id, error = %e, context, "wallet.release_hold failed");
            }
        }
    }

    /// Back to `available` unless the provider still has active jobs.
    pub(crate) async fn release_provider(&self, provider_id: Uuid) {
        match self.repo.count_active_for_provider(provider_id).await {
            Ok(0) => {}
            Ok(active) => {
                tracing::debug!(provider_id = %provider_id, active, "Provider still has active orders, staying busy");
                return;
            }
            Err(e) => tracing::error!(provider_id = %provider_id, error = %e, "orders.count_active_for_provider failed, releasing anyway"),
        }
        if let Err(e) = self.providers.set_status(provider_id, ProviderStatus::Available).await {
            tracing::error!(provider_id = %provider_id, error = %e, "Failed to mark provider available");
        }
    }

    pub(crate) async fn mark_busy(&self, provider_id: Uuid) {
        if let Err(e) = self.providers.set_status(provider_id, ProviderStatus::Busy).await {
            tracing::error!(provider_id = %provider_id, error = %e, "Failed to mark provider busy");
        }
    }

    /// Drop any live offer for an order that no longer needs a provider, so
    /// the provider holding it can be offered other work. Holders are found
    /// through the order's exclusion set, which dispatch writes on every
    /// offer. The pending timeout then finds nothing to consume.
    pub async fn withdraw_offers(&self, order_id: Uuid) {
        let tried = match self.ledger.tried_providers(order_id).await {
            Ok(tried) => tried,
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "ledger.tried_providers failed, offers left to expire");
                return;
            }
        };
        for provider_id in tried {
            match self.ledger.consume_offer(provider_id, order_id).await {
                Ok(true) => tracing::debug!(order_id = %order_id, provider_id = %provider_id, "Offer withdrawn"),
                Ok(false) => {}
                Err(e) => tracing::error!(order_id = %order_id, provider_id = %provider_id, error = %e, "ledger.consume_offer failed on withdraw"),
            }
        }
    }

    pub(crate) fn schedule(&self, task: DispatchTask) {
        if let Err(e) = self.scheduler.schedule(task) {
            tracing::error!(order_id = %task.order_id, error = %e, "Failed to schedule dispatch");
        }
    }

    pub(crate) fn publish(&self, order: &Order, entry: &StatusHistoryEntry) {
        // No subscribers is fine.
        let _ = self.events.send(OrderEvent {
            order_id: order.id,
            order_code: order.code.clone(),
            from_status: entry.from_status.map(|s| s.as_str().to_string()),
            to_status: entry.to_status.as_str().to_string(),
            actor_role: entry.changed_by_role.as_str().to_string(),
            provider_id: order.provider_id,
            timestamp: entry.created_at.timestamp(),
        });
    }
}
