use chrono::Utc;
use hearth_core::{CoreError, CoreResult, OrderStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Order, Rating, RatingParty};
use crate::service::OrderService;

const MAX_REVIEW_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRequest {
    pub rating: u8,
    #[serde(default)]
    pub review: Option<String>,
}

impl RateRequest {
    fn validate(&self) -> CoreResult<()> {
        if !(1..=5).contains(&self.rating) {
            return Err(CoreError::validation("Rating must be between 1 and 5"));
        }
        if self.review.as_ref().is_some_and(|r| r.chars().count() > MAX_REVIEW_CHARS) {
            return Err(CoreError::validation(format!(
                "Review must be at most {} characters",
                MAX_REVIEW_CHARS
            )));
        }
        Ok(())
    }
}

impl OrderService {
    /// The customer rates the provider of a completed order, once.
    pub async fn rate_order(&self, customer_id: Uuid, order_id: Uuid, req: RateRequest) -> CoreResult<Order> {
        req.validate()?;
        let order = self.load_owned(customer_id, order_id).await?;
        self.rate(order, RatingParty::Customer, req).await
    }

    /// The assigned provider rates the customer of a completed order, once.
    pub async fn rate_customer(&self, provider_id: Uuid, order_id: Uuid, req: RateRequest) -> CoreResult<Order> {
        req.validate()?;
        let order = self.load_assigned(provider_id, order_id).await?;
        self.rate(order, RatingParty::Provider, req).await
    }

    async fn rate(&self, mut order: Order, party: RatingParty, req: RateRequest) -> CoreResult<Order> {
        if order.status != OrderStatus::Completed {
            return Err(CoreError::validation("Only completed orders can be rated"));
        }
        if !order.can_be_rated_by(party) {
            return Err(CoreError::validation("You have already rated this order"));
        }

        let rating = Rating {
            score: req.rating,
            review: req.review.filter(|r| !r.trim().is_empty()),
            rated_at: Utc::now(),
        };
        let saved = self
            .repo
            .save_rating(order.id, party, &rating)
            .await
            .map_err(CoreError::dependency("orders.save_rating"))?;
        if !saved {
            return Err(CoreError::validation("You have already rated this order"));
        }

        tracing::info!(order_id = %order.id, rated_by = ?party, score = rating.score, "Order rated");
        match party {
            RatingParty::Customer => order.customer_rating = Some(rating),
            RatingParty::Provider => order.provider_rating = Some(rating),
        }
        Ok(order)
    }
}
