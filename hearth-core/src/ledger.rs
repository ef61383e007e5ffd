use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::BoxError;

/// `offer:<providerId>` holds the id of the order the provider may accept.
pub fn offer_key(provider_id: Uuid) -> String {
    format!("offer:{}", provider_id)
}

/// `tried:<orderId>` is the set of providers already offered the order.
pub fn tried_key(order_id: Uuid) -> String {
    format!("tried:{}", order_id)
}

/// Shared key/value state coordinating the single in-flight offer per order.
///
/// Every consuming operation is atomic at the store: an offer is consumed by
/// exactly one of accept, reject or timeout.
#[async_trait]
pub trait OfferLedger: Send + Sync {
    /// Write `offer:<provider> = order` with `ttl`, only if the provider holds
    /// no live offer. Returns `false` when the provider is already holding one.
    async fn claim_offer(
        &self,
        provider_id: Uuid,
        order_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, BoxError>;

    async fn current_offer(&self, provider_id: Uuid) -> Result<Option<Uuid>, BoxError>;

    /// Delete `offer:<provider>` if and only if it still points at `order_id`.
    /// Returns whether this call removed it.
    async fn consume_offer(&self, provider_id: Uuid, order_id: Uuid) -> Result<bool, BoxError>;

    /// Add the provider to the order's exclusion set and refresh its TTL.
    async fn mark_tried(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        ttl: Duration,
    ) -> Result<(), BoxError>;

    async fn tried_providers(&self, order_id: Uuid) -> Result<HashSet<Uuid>, BoxError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    offers: HashMap<Uuid, (Uuid, Instant)>,
    tried: HashMap<Uuid, (HashSet<Uuid>, Instant)>,
}

/// In-process ledger with per-key expiry on the tokio clock, so tests can
/// drive offer timeouts with `tokio::time::pause`/`advance`.
#[derive(Debug, Default)]
pub struct MemoryOfferLedger {
    state: Mutex<LedgerState>,
}

impl MemoryOfferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live_offer(state: &mut LedgerState, provider_id: Uuid) -> Option<Uuid> {
        match state.offers.get(&provider_id) {
            Some((order_id, expires)) if *expires > Instant::now() => Some(*order_id),
            Some(_) => {
                state.offers.remove(&provider_id);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl OfferLedger for MemoryOfferLedger {
    async fn claim_offer(
        &self,
        provider_id: Uuid,
        order_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, BoxError> {
        let mut state = self.lock();
        if Self::live_offer(&mut state, provider_id).is_some() {
            return Ok(false);
        }
        state.offers.insert(provider_id, (order_id, Instant::now() + ttl));
        Ok(true)
    }

    async fn current_offer(&self, provider_id: Uuid) -> Result<Option<Uuid>, BoxError> {
        Ok(Self::live_offer(&mut self.lock(), provider_id))
    }

    async fn consume_offer(&self, provider_id: Uuid, order_id: Uuid) -> Result<bool, BoxError> {
        let mut state = self.lock();
        if Self::live_offer(&mut state, provider_id) == Some(order_id) {
            state.offers.remove(&provider_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn mark_tried(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        ttl: Duration,
    ) -> Result<(), BoxError> {
        let mut state = self.lock();
        let now = Instant::now();
        let entry = state
            .tried
            .entry(order_id)
            .or_insert_with(|| (HashSet::new(), now + ttl));
        if entry.1 <= now {
            entry.0.clear();
        }
        entry.0.insert(provider_id);
        entry.1 = now + ttl;
        Ok(())
    }

    async fn tried_providers(&self, order_id: Uuid) -> Result<HashSet<Uuid>, BoxError> {
        let state = self.lock();
        Ok(match state.tried.get(&order_id) {
            Some((set, expires)) if *expires > Instant::now() => set.clone(),
            _ => HashSet::new(),
        })
    }
}
