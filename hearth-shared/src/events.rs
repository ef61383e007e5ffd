use uuid::Uuid;

/// Published after every applied order status change.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub order_code: String,
    /// `None` when the prior status is unknown (bulk updates).
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor_role: String,
    pub provider_id: Option<Uuid>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OfferExtendedEvent {
    pub order_id: Uuid,
    pub provider_id: Uuid,
    pub expires_in_seconds: u64,
    pub timestamp: i64,
}
