use chrono::{DateTime, Datelike, Utc};
use hearth_catalog::{AddOn, ItemQuote, PriceBreakdown, ServiceDefinition};
use hearth_core::{ActorRole, GeoPoint, OrderStatus, PaymentMethod, PaymentStatus};
use hearth_shared::Masked;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A booked home-service job, the single source of truth for its lifecycle.
///
/// Money fields are stored already rounded to cents. Status and its dependent
/// fields change only through [`crate::state_machine::apply_transition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub code: String,
    pub customer_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub category_slug: String,

    pub address: Masked<String>,
    pub location: GeoPoint,
    pub service_date: DateTime<Utc>,
    pub frequency: String,
    pub notes: Option<String>,

    pub items: Vec<OrderItem>,
    pub add_ons: Vec<OrderAddOn>,

    pub subtotal: Decimal,
    pub surge_fee: Decimal,
    pub platform_commission: Decimal,
    pub discount: Decimal,
    pub total: Decimal,

    pub status: OrderStatus,
    pub wallet_hold_id: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub cancellation: Option<CancellationInfo>,

    /// The customer's rating of the provider.
    pub customer_rating: Option<Rating>,
    /// The provider's rating of the customer.
    pub provider_rating: Option<Rating>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub provider_accepted_at: Option<DateTime<Utc>>,
    pub provider_started_at: Option<DateTime<Utc>>,
    pub provider_completed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Distinct service ids across the line items, in booking order.
    pub fn service_ids(&self) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(self.items.len());
        for item in &self.items {
            if !ids.contains(&item.service_id) {
                ids.push(item.service_id);
            }
        }
        ids
    }

    pub fn total_duration_minutes(&self) -> i32 {
        self.items.iter().map(|i| i.duration_minutes).sum::<i32>()
            + self.add_ons.iter().map(|a| a.duration_minutes).sum::<i32>()
    }

    pub fn breakdown(&self) -> PriceBreakdown {
        PriceBreakdown {
            subtotal: self.subtotal,
            surge_fee: self.surge_fee,
            platform_commission: self.platform_commission,
            discount: self.discount,
            total: self.total,
        }
    }

    pub fn is_assigned_to(&self, provider_id: Uuid) -> bool {
        self.provider_id == Some(provider_id)
    }

    pub fn rating_by(&self, party: RatingParty) -> Option<&Rating> {
        match party {
            RatingParty::Customer => self.customer_rating.as_ref(),
            RatingParty::Provider => self.provider_rating.as_ref(),
        }
    }

    /// Each side rates a completed order once.
    pub fn can_be_rated_by(&self, party: RatingParty) -> bool {
        self.status == OrderStatus::Completed && self.rating_by(party).is_none()
    }

    /// Still waiting for a provider after its booking window closed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::SearchingProvider)
            && self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Immutable snapshot of one booked service. Never repriced after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub id: Uuid,
    pub service_id: Uuid,
    pub service_name: String,
    pub base_price: Decimal,
    pub calculated_price: Decimal,
    pub duration_minutes: i32,
    pub selected_options: BTreeMap<String, serde_json::Value>,
}

impl OrderItem {
    pub fn from_quote(service: &ServiceDefinition, quote: ItemQuote) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id: service.id,
            service_name: service.title.clone(),
            base_price: service.base_price,
            calculated_price: quote.price,
            duration_minutes: quote.duration_minutes,
            selected_options: quote.options,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderAddOn {
    pub add_on_id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub duration_minutes: i32,
}

impl From<&AddOn> for OrderAddOn {
    fn from(addon: &AddOn) -> Self {
        Self {
            add_on_id: addon.id,
            title: addon.title.clone(),
            price: addon.price,
            duration_minutes: addon.duration_minutes,
        }
    }
}

/// Written exactly once, when the order enters `cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationInfo {
    pub cancelled_by: ActorRole,
    pub cancelled_by_id: Option<Uuid>,
    pub cancelled_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub cancellation_fee: Decimal,
    pub refund_amount: Decimal,
}

/// Which side of the job gives a rating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RatingParty {
    Customer,
    Provider,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    /// 1 to 5.
    pub score: u8,
    pub review: Option<String>,
    pub rated_at: DateTime<Utc>,
}

/// Append-only audit record of a status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    /// `None` when the caller did not know the prior status (bulk updates).
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub changed_by: Option<Uuid>,
    pub changed_by_role: ActorRole,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// `HS-<year>-<6 digits>`.
pub fn generate_order_code(now: DateTime<Utc>) -> String {
    let serial: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("HS-{}-{:06}", now.year(), serial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_order_code_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let code = generate_order_code(now);
        assert!(code.starts_with("HS-2026-"));
        assert_eq!(code.len(), "HS-2026-000000".len());
        assert!(code[8..].chars().all(|c| c.is_ascii_digit()));
    }
}
