use chrono::{DateTime, Utc};
use hearth_core::{Actor, OrderStatus, PaymentStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CancellationInfo, Order, StatusHistoryEntry};

/// Statuses a transition into `to` may start from. Empty for statuses that
/// are not reachable through the table.
pub fn allowed_from(to: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match to {
        SearchingProvider => &[Pending],
        Assigned => &[SearchingProvider],
        Accepted => &[Assigned],
        InProgress => &[Accepted],
        Completed => &[InProgress],
        Cancelled => &[Pending, SearchingProvider, Assigned, Accepted],
        Expired => &[Pending, SearchingProvider],
        Pending | NoProviderAvailable => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_from(to).contains(&from)
}

/// A requested status change. `from` is `None` when the caller does not know
/// the prior status; the history then records no prior status either.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChange {
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
}

impl StatusChange {
    pub fn new(from: OrderStatus, to: OrderStatus) -> Self {
        Self { from: Some(from), to }
    }

    pub fn blind(to: OrderStatus) -> Self {
        Self { from: None, to }
    }
}

/// Which rule admits the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRule {
    /// The happy-path table in [`allowed_from`].
    Table,
    /// Dispatch exhausted its candidates: pending/searching to `no_provider_available`.
    DispatchExhausted,
    /// Admin swaps the provider: assigned/accepted back to `assigned`.
    Reassignment,
}

impl TransitionRule {
    fn admits(&self, from: OrderStatus, to: OrderStatus) -> bool {
        match self {
            TransitionRule::Table => can_transition(from, to),
            TransitionRule::DispatchExhausted => {
                to == OrderStatus::NoProviderAvailable
                    && matches!(from, OrderStatus::Pending | OrderStatus::SearchingProvider)
            }
            TransitionRule::Reassignment => {
                to == OrderStatus::Assigned
                    && matches!(from, OrderStatus::Assigned | OrderStatus::Accepted)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationTerms {
    pub fee: Decimal,
    pub refund: Decimal,
}

/// Everything needed to apply one status change to an order.
#[derive(Debug, Clone)]
pub struct Transition {
    pub change: StatusChange,
    pub actor: Actor,
    pub rule: TransitionRule,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    /// Provider to place on the order together with the change.
    pub provider_id: Option<Uuid>,
    /// Required when `to` is `cancelled`.
    pub cancellation: Option<CancellationTerms>,
}

impl Transition {
    pub fn new(change: StatusChange, actor: Actor) -> Self {
        Self {
            change,
            actor,
            rule: TransitionRule::Table,
            reason: None,
            metadata: serde_json::Value::Null,
            provider_id: None,
            cancellation: None,
        }
    }

    pub fn rule(mut self, rule: TransitionRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn maybe_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn assign(mut self, provider_id: Uuid) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn cancellation(mut self, fee: Decimal, refund: Decimal) -> Self {
        self.cancellation = Some(CancellationTerms { fee, refund });
        self
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order status changed: expected {expected}, found {actual}")]
    StatusMismatch { expected: OrderStatus, actual: OrderStatus },

    #[error("Cancellation requires fee and refund amounts")]
    MissingCancellationTerms,
}

impl From<TransitionError> for hearth_core::CoreError {
    fn from(err: TransitionError) -> Self {
        hearth_core::CoreError::ValidationError(err.to_string())
    }
}

/// The only place an order's status is changed.
///
/// Validates first and mutates nothing on error. On success stamps the
/// status-specific fields and returns the history entry to persist with it.
pub fn apply_transition(
    order: &mut Order,
    transition: Transition,
    now: DateTime<Utc>,
) -> Result<StatusHistoryEntry, TransitionError> {
    let current = order.status;
    let to = transition.change.to;

    if let Some(expected) = transition.change.from {
        if expected != current {
            return Err(TransitionError::StatusMismatch { expected, actual: current });
        }
    }
    if !transition.rule.admits(current, to) {
        return Err(TransitionError::InvalidTransition { from: current, to });
    }
    if to == OrderStatus::Cancelled && transition.cancellation.is_none() {
        return Err(TransitionError::MissingCancellationTerms);
    }

    if let Some(provider_id) = transition.provider_id {
        order.provider_id = Some(provider_id);
    }
    if transition.rule == TransitionRule::Reassignment {
        order.provider_accepted_at = None;
    }

    match to {
        OrderStatus::Accepted => {
            if order.provider_accepted_at.is_none() {
                order.provider_accepted_at = Some(now);
            }
        }
        OrderStatus::InProgress => {
            order.provider_started_at = Some(now);
        }
        OrderStatus::Completed => {
            order.completed_at = Some(now);
            order.provider_completed_at = Some(now);
            order.payment_status = PaymentStatus::Completed;
        }
        OrderStatus::Cancelled => {
            if let Some(terms) = transition.cancellation {
                order.cancellation = Some(CancellationInfo {
                    cancelled_by: transition.actor.role,
                    cancelled_by_id: transition.actor.id,
                    cancelled_at: now,
                    reason: transition.reason.clone(),
                    cancellation_fee: terms.fee,
                    refund_amount: terms.refund,
                });
                order.payment_status = if terms.refund > Decimal::ZERO {
                    PaymentStatus::Refunded
                } else {
                    PaymentStatus::Completed
                };
            }
        }
        _ => {}
    }

    order.status = to;
    order.updated_at = now;

    Ok(StatusHistoryEntry {
        id: Uuid::new_v4(),
        order_id: order.id,
        from_status: transition.change.from,
        to_status: to,
        changed_by: transition.actor.id,
        changed_by_role: transition.actor.role,
        reason: transition.reason,
        metadata: transition.metadata,
        created_at: now,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::OrderItem;
    use hearth_core::{ActorRole, GeoPoint, PaymentMethod};
    use hearth_shared::Masked;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    pub(crate) fn sample_order(status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            code: "HS-2026-000042".to_string(),
            customer_id: Uuid::new_v4(),
            provider_id: None,
            category_slug: "cleaning".to_string(),
            address: Masked::new("12 Elm Street".to_string()),
            location: GeoPoint::new(31.52, 74.35),
            service_date: now + chrono::Duration::days(1),
            frequency: "once".to_string(),
            notes: None,
            items: vec![OrderItem {
                id: Uuid::new_v4(),
                service_id: Uuid::new_v4(),
                service_name: "Deep Cleaning".to_string(),
                base_price: dec!(40),
                calculated_price: dec!(40),
                duration_minutes: 120,
                selected_options: BTreeMap::new(),
            }],
            add_ons: vec![],
            subtotal: dec!(45),
            surge_fee: dec!(0),
            platform_commission: dec!(5),
            discount: dec!(0),
            total: dec!(50),
            status,
            wallet_hold_id: Some("hold_test".to_string()),
            payment_method: PaymentMethod::Wallet,
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
            expires_at: Some(now + chrono::Duration::minutes(30)),
        }
    }

    #[test]
    fn test_can_transition_matches_table_exactly() {
        let table: &[(OrderStatus, &[OrderStatus])] = &[
            (OrderStatus::SearchingProvider, &[OrderStatus::Pending]),
            (OrderStatus::Assigned, &[OrderStatus::SearchingProvider]),
            (OrderStatus::Accepted, &[OrderStatus::Assigned]),
            (OrderStatus::InProgress, &[OrderStatus::Accepted]),
            (OrderStatus::Completed, &[OrderStatus::InProgress]),
            (
                OrderStatus::Cancelled,
                &[
                    OrderStatus::Pending,
                    OrderStatus::SearchingProvider,
                    OrderStatus::Assigned,
                    OrderStatus::Accepted,
                ],
            ),
            (OrderStatus::Expired, &[OrderStatus::Pending, OrderStatus::SearchingProvider]),
        ];

        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                let expected = table
                    .iter()
                    .find(|(target, _)| *target == to)
                    .is_some_and(|(_, sources)| sources.contains(&from));
                assert_eq!(can_transition(from, to), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_no_provider_available_is_outside_the_table() {
        for from in OrderStatus::ALL {
            assert!(!can_transition(from, OrderStatus::NoProviderAvailable));
        }
        let mut order = sample_order(OrderStatus::SearchingProvider);
        let t = Transition::new(
            StatusChange::new(OrderStatus::SearchingProvider, OrderStatus::NoProviderAvailable),
            Actor::system(),
        );
        assert!(apply_transition(&mut order, t.clone(), Utc::now()).is_err());
        let entry = apply_transition(&mut order, t.rule(TransitionRule::DispatchExhausted), Utc::now())
            .unwrap();
        assert_eq!(entry.changed_by_role, ActorRole::System);
        assert_eq!(order.status, OrderStatus::NoProviderAvailable);
    }

    #[test]
    fn test_rejected_transition_mutates_nothing() {
        let mut order = sample_order(OrderStatus::Completed);
        let before = serde_json::to_value(&order).unwrap();

        let err = apply_transition(
            &mut order,
            Transition::new(
                StatusChange::new(OrderStatus::Completed, OrderStatus::Pending),
                Actor::admin(Uuid::new_v4()),
            ),
            Utc::now(),
        )
        .unwrap_err();

        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(serde_json::to_value(&order).unwrap(), before);
    }

    #[test]
    fn test_stale_from_is_rejected() {
        let mut order = sample_order(OrderStatus::Assigned);
        let err = apply_transition(
            &mut order,
            Transition::new(
                StatusChange::new(OrderStatus::SearchingProvider, OrderStatus::Assigned),
                Actor::system(),
            ),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::StatusMismatch { .. }));
    }

    #[test]
    fn test_accepted_at_is_stamped_once() {
        let mut order = sample_order(OrderStatus::Assigned);
        let first = Utc::now() - chrono::Duration::hours(1);
        order.provider_accepted_at = Some(first);

        apply_transition(
            &mut order,
            Transition::new(
                StatusChange::new(OrderStatus::Assigned, OrderStatus::Accepted),
                Actor::provider(Uuid::new_v4()),
            ),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(order.provider_accepted_at, Some(first));
    }

    #[test]
    fn test_completion_and_cancellation_side_effects() {
        let now = Utc::now();
        let mut order = sample_order(OrderStatus::InProgress);
        apply_transition(
            &mut order,
            Transition::new(
                StatusChange::new(OrderStatus::InProgress, OrderStatus::Completed),
                Actor::provider(Uuid::new_v4()),
            ),
            now,
        )
        .unwrap();
        assert_eq!(order.completed_at, Some(now));
        assert_eq!(order.payment_status, PaymentStatus::Completed);

        let customer = Actor::customer(Uuid::new_v4());
        let mut order = sample_order(OrderStatus::Assigned);
        let missing = apply_transition(
            &mut order,
            Transition::new(StatusChange::new(OrderStatus::Assigned, OrderStatus::Cancelled), customer),
            now,
        );
        assert_eq!(missing.unwrap_err(), TransitionError::MissingCancellationTerms);

        let entry = apply_transition(
            &mut order,
            Transition::new(StatusChange::new(OrderStatus::Assigned, OrderStatus::Cancelled), customer)
                .reason("changed plans")
                .cancellation(dec!(25), dec!(25)),
            now,
        )
        .unwrap();
        let info = order.cancellation.as_ref().unwrap();
        assert_eq!(info.cancelled_by, ActorRole::Customer);
        assert_eq!(info.refund_amount, dec!(25));
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert_eq!(entry.reason.as_deref(), Some("changed plans"));
    }

    #[test]
    fn test_reassignment_resets_acceptance() {
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let mut order = sample_order(OrderStatus::Accepted);
        order.provider_id = Some(old);
        order.provider_accepted_at = Some(Utc::now());

        let plain = Transition::new(
            StatusChange::new(OrderStatus::Accepted, OrderStatus::Assigned),
            Actor::admin(Uuid::new_v4()),
        )
        .assign(new);
        assert!(apply_transition(&mut order, plain.clone(), Utc::now()).is_err());

        apply_transition(&mut order, plain.rule(TransitionRule::Reassignment), Utc::now()).unwrap();
        assert_eq!(order.provider_id, Some(new));
        assert_eq!(order.provider_accepted_at, None);
        assert_eq!(order.status, OrderStatus::Assigned);
    }

    #[test]
    fn test_blind_change_records_no_from() {
        let mut order = sample_order(OrderStatus::SearchingProvider);
        let entry = apply_transition(
            &mut order,
            Transition::new(StatusChange::blind(OrderStatus::Expired), Actor::admin(Uuid::new_v4())),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(entry.from_status, None);
        assert_eq!(entry.to_status, OrderStatus::Expired);
    }
}
