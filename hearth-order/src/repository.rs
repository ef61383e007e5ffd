use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_core::{BoxError, OrderStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{Order, Rating, RatingParty, StatusHistoryEntry};

/// Order and status-history persistence.
///
/// Writes after creation go through [`OrderRepository::save_transition`],
/// which compares the stored status first. Two actors racing on one order
/// therefore serialize: the loser sees `false` and nothing is written.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a new order with the history of how it was opened.
    async fn create(&self, order: &Order, history: &[StatusHistoryEntry]) -> Result<(), BoxError>;

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, BoxError>;

    /// Store `order` and append `history` in one unit, only if the stored
    /// status still equals `expected`.
    async fn save_transition(
        &self,
        order: &Order,
        expected: OrderStatus,
        history: &[StatusHistoryEntry],
    ) -> Result<bool, BoxError>;

    /// Oldest first.
    async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, BoxError>;

    /// Store a rating only if the order is completed and `party` has not
    /// rated it yet. Returns whether it was written.
    async fn save_rating(
        &self,
        order_id: Uuid,
        party: RatingParty,
        rating: &Rating,
    ) -> Result<bool, BoxError>;

    async fn count_active_for_customer(&self, customer_id: Uuid) -> Result<usize, BoxError>;

    /// Non-terminal orders currently carrying `provider_id`.
    async fn count_active_for_provider(&self, provider_id: Uuid) -> Result<usize, BoxError>;

    /// Pending or searching orders whose `expires_at` is at or before `now`.
    async fn find_overdue(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>, BoxError>;

    /// Pending or searching orders, oldest first.
    async fn find_awaiting_provider(&self, limit: usize) -> Result<Vec<Order>, BoxError>;
}

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    history: HashMap<Uuid, Vec<StatusHistoryEntry>>,
}

/// HashMap-backed repository for tests and the `memory` storage profile.
#[derive(Debug, Default)]
pub struct MemoryOrderRepository {
    tables: Mutex<Tables>,
    fail_creates: AtomicBool,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail until switched off again.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn create(&self, order: &Order, history: &[StatusHistoryEntry]) -> Result<(), BoxError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err("simulated order store failure".into());
        }
        let mut tables = self.lock();
        if tables.orders.contains_key(&order.id) {
            return Err(format!("order {} already exists", order.id).into());
        }
        if tables.orders.values().any(|o| o.code == order.code) {
            return Err(format!("order code {} already exists", order.code).into());
        }
        tables.orders.insert(order.id, order.clone());
        tables.history.insert(order.id, history.to_vec());
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, BoxError> {
        Ok(self.lock().orders.get(&order_id).cloned())
    }

    async fn save_transition(
        &self,
        order: &Order,
        expected: OrderStatus,
        history: &[StatusHistoryEntry],
    ) -> Result<bool, BoxError> {
        let mut tables = self.lock();
        match tables.orders.get_mut(&order.id) {
            Some(stored) if stored.status == expected => *stored = order.clone(),
            Some(_) => return Ok(false),
            None => return Err(format!("order {} not found", order.id).into()),
        }
        tables
            .history
            .entry(order.id)
            .or_default()
            .extend(history.iter().cloned());
        Ok(true)
    }

    async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, BoxError> {
        Ok(self.lock().history.get(&order_id).cloned().unwrap_or_default())
    }

    async fn save_rating(
        &self,
        order_id: Uuid,
        party: RatingParty,
        rating: &Rating,
    ) -> Result<bool, BoxError> {
        let mut tables = self.lock();
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| format!("order {} not found", order_id))?;
        if !order.can_be_rated_by(party) {
            return Ok(false);
        }
        match party {
            RatingParty::Customer => order.customer_rating = Some(rating.clone()),
            RatingParty::Provider => order.provider_rating = Some(rating.clone()),
        }
        Ok(true)
    }

    async fn count_active_for_customer(&self, customer_id: Uuid) -> Result<usize, BoxError> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|o| o.customer_id == customer_id && o.status.is_active())
            .count())
    }

    async fn count_active_for_provider(&self, provider_id: Uuid) -> Result<usize, BoxError> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|o| o.is_assigned_to(provider_id) && o.status.is_active())
            .count())
    }

    async fn find_overdue(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>, BoxError> {
        let tables = self.lock();
        let mut overdue: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|o| o.expires_at);
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn find_awaiting_provider(&self, limit: usize) -> Result<Vec<Order>, BoxError> {
        let tables = self.lock();
        let mut waiting: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| matches!(o.status, OrderStatus::Pending | OrderStatus::SearchingProvider))
            .cloned()
            .collect();
        waiting.sort_by_key(|o| o.created_at);
        waiting.truncate(limit);
        Ok(waiting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::tests::sample_order;

    #[tokio::test]
    async fn test_save_transition_compares_status() {
        let repo = MemoryOrderRepository::new();
        let order = sample_order(OrderStatus::SearchingProvider);
        repo.create(&order, &[]).await.unwrap();

        let mut moved = order.clone();
        moved.status = OrderStatus::Assigned;
        assert!(repo
            .save_transition(&moved, OrderStatus::SearchingProvider, &[])
            .await
            .unwrap());

        let mut late = order.clone();
        late.status = OrderStatus::Cancelled;
        assert!(!repo
            .save_transition(&late, OrderStatus::SearchingProvider, &[])
            .await
            .unwrap());
        assert_eq!(
            repo.get(order.id).await.unwrap().unwrap().status,
            OrderStatus::Assigned
        );
    }

    #[tokio::test]
    async fn test_overdue_and_active_counts() {
        let repo = MemoryOrderRepository::new();
        let mut late = sample_order(OrderStatus::SearchingProvider);
        late.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        let mut done = sample_order(OrderStatus::Completed);
        done.customer_id = late.customer_id;
        done.code = "HS-2026-000043".to_string();
        done.expires_at = late.expires_at;
        repo.create(&late, &[]).await.unwrap();
        repo.create(&done, &[]).await.unwrap();

        let overdue = repo.find_overdue(Utc::now(), 10).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, late.id);
        assert_eq!(repo.count_active_for_customer(late.customer_id).await.unwrap(), 1);

        let waiting = repo.find_awaiting_provider(10).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id, late.id);
    }

    #[tokio::test]
    async fn test_rating_is_written_once_per_party() {
        let repo = MemoryOrderRepository::new();
        let open = sample_order(OrderStatus::InProgress);
        let mut done = sample_order(OrderStatus::Completed);
        done.code = "HS-2026-000043".to_string();
        repo.create(&open, &[]).await.unwrap();
        repo.create(&done, &[]).await.unwrap();

        let rating = Rating { score: 4, review: None, rated_at: Utc::now() };
        assert!(!repo.save_rating(open.id, RatingParty::Customer, &rating).await.unwrap());
        assert!(repo.save_rating(done.id, RatingParty::Customer, &rating).await.unwrap());
        assert!(!repo.save_rating(done.id, RatingParty::Customer, &rating).await.unwrap());
        assert!(repo.save_rating(done.id, RatingParty::Provider, &rating).await.unwrap());

        let stored = repo.get(done.id).await.unwrap().unwrap();
        assert_eq!(stored.customer_rating.map(|r| r.score), Some(4));
        assert!(stored.provider_rating.is_some());
    }
}
