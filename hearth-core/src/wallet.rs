use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::BoxError;

pub const REFERENCE_SERVICE_ORDER: &str = "service_order";
pub const TX_CANCELLATION_FEE: &str = "cancellation_fee";
pub const TX_ADMIN_CANCELLATION_FEE: &str = "admin_cancellation_fee";

/// Contract against the external wallet ledger.
///
/// The order engine only calls these operations; it never implements ledger
/// accounting. Every call may block and may fail; retries are the caller's
/// decision.
#[async_trait]
pub trait WalletService: Send + Sync {
    /// Reserve funds against a customer balance. Returns the hold id.
    async fn hold_funds(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        reference_type: &str,
        reference_id: &str,
        duration_minutes: u32,
    ) -> Result<String, BoxError>;

    /// Return held funds to the available balance.
    async fn release_hold(&self, hold_id: &str) -> Result<(), BoxError>;

    /// Convert a hold into a charge. Returns the capture id.
    async fn capture_hold(&self, hold_id: &str, description: &str) -> Result<String, BoxError>;

    async fn transfer_funds(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<(), BoxError>;

    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        transaction_type: &str,
        reference_id: &str,
        description: &str,
    ) -> Result<(), BoxError>;

    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        transaction_type: &str,
        reference_id: &str,
        description: &str,
    ) -> Result<(), BoxError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletOpKind {
    Hold,
    Release,
    Capture,
    Transfer,
    Debit,
    Credit,
}

/// One recorded call against [`MemoryWallet`].
#[derive(Debug, Clone, PartialEq)]
pub struct WalletOp {
    pub kind: WalletOpKind,
    pub hold_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub counterparty_id: Option<Uuid>,
    pub amount: Option<Decimal>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldState {
    Active,
    Captured,
    Released,
}

#[derive(Debug, Default)]
struct WalletState {
    holds: HashMap<String, (Uuid, Decimal, HoldState)>,
    operations: Vec<WalletOp>,
    failing: HashSet<WalletOpKind>,
}

/// In-process wallet for tests and the `memory` storage profile.
///
/// Records every successful call and tracks hold state, so a hold can be
/// released or captured at most once. Individual operations can be made to
/// fail with [`MemoryWallet::fail`].
#[derive(Debug, Default)]
pub struct MemoryWallet {
    state: Mutex<WalletState>,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `kind` fail.
    pub fn fail(&self, kind: WalletOpKind) {
        self.lock().failing.insert(kind);
    }

    pub fn recover(&self, kind: WalletOpKind) {
        self.lock().failing.remove(&kind);
    }

    pub fn operations(&self) -> Vec<WalletOp> {
        self.lock().operations.clone()
    }

    pub fn count(&self, kind: WalletOpKind) -> usize {
        self.lock().operations.iter().filter(|op| op.kind == kind).count()
    }

    pub fn is_hold_active(&self, hold_id: &str) -> bool {
        matches!(self.lock().holds.get(hold_id), Some((_, _, HoldState::Active)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(state: &WalletState, kind: WalletOpKind) -> Result<(), BoxError> {
        if state.failing.contains(&kind) {
            return Err(format!("simulated wallet failure: {:?}", kind).into());
        }
        Ok(())
    }

    fn settle(&self, hold_id: &str, kind: WalletOpKind, next: HoldState) -> Result<(), BoxError> {
        let mut state = self.lock();
        Self::check(&state, kind)?;
        let (customer, amount) = match state.holds.get_mut(hold_id) {
            Some((customer, amount, hold_state)) if *hold_state == HoldState::Active => {
                *hold_state = next;
                (*customer, *amount)
            }
            Some(_) => return Err(format!("hold {} is no longer active", hold_id).into()),
            None => return Err(format!("hold {} not found", hold_id).into()),
        };
        state.operations.push(WalletOp {
            kind,
            hold_id: Some(hold_id.to_string()),
            user_id: Some(customer),
            counterparty_id: None,
            amount: Some(amount),
            reference: None,
        });
        Ok(())
    }

    fn record_movement(
        &self,
        kind: WalletOpKind,
        user_id: Uuid,
        counterparty_id: Option<Uuid>,
        amount: Decimal,
        reference: &str,
    ) -> Result<(), BoxError> {
        let mut state = self.lock();
        Self::check(&state, kind)?;
        state.operations.push(WalletOp {
            kind,
            hold_id: None,
            user_id: Some(user_id),
            counterparty_id,
            amount: Some(amount),
            reference: Some(reference.to_string()),
        });
        Ok(())
    }
}

#[async_trait]
impl WalletService for MemoryWallet {
    async fn hold_funds(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        reference_type: &str,
        reference_id: &str,
        _duration_minutes: u32,
    ) -> Result<String, BoxError> {
        let mut state = self.lock();
        Self::check(&state, WalletOpKind::Hold)?;
        let hold_id = format!("hold_{}", Uuid::new_v4().simple());
        state
            .holds
            .insert(hold_id.clone(), (customer_id, amount, HoldState::Active));
        state.operations.push(WalletOp {
            kind: WalletOpKind::Hold,
            hold_id: Some(hold_id.clone()),
            user_id: Some(customer_id),
            counterparty_id: None,
            amount: Some(amount),
            reference: Some(format!("{}:{}", reference_type, reference_id)),
        });
        Ok(hold_id)
    }

    async fn release_hold(&self, hold_id: &str) -> Result<(), BoxError> {
        self.settle(hold_id, WalletOpKind::Release, HoldState::Released)
    }

    async fn capture_hold(&self, hold_id: &str, _description: &str) -> Result<String, BoxError> {
        self.settle(hold_id, WalletOpKind::Capture, HoldState::Captured)?;
        Ok(format!("cap_{}", hold_id.trim_start_matches("hold_")))
    }

    async fn transfer_funds(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<(), BoxError> {
        self.record_movement(WalletOpKind::Transfer, from_user_id, Some(to_user_id), amount, description)
    }

    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        transaction_type: &str,
        reference_id: &str,
        _description: &str,
    ) -> Result<(), BoxError> {
        let reference = format!("{}:{}", transaction_type, reference_id);
        self.record_movement(WalletOpKind::Debit, user_id, None, amount, &reference)
    }

    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        transaction_type: &str,
        reference_id: &str,
        _description: &str,
    ) -> Result<(), BoxError> {
        let reference = format!("{}:{}", transaction_type, reference_id);
        self.record_movement(WalletOpKind::Credit, user_id, None, amount, &reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_hold_can_only_be_settled_once() {
        let wallet = MemoryWallet::new();
        let customer = Uuid::new_v4();
        let hold = wallet
            .hold_funds(customer, dec!(40.00), REFERENCE_SERVICE_ORDER, "HS-2026-000001", 1440)
            .await
            .unwrap();

        assert!(wallet.is_hold_active(&hold));
        wallet.release_hold(&hold).await.unwrap();
        assert!(!wallet.is_hold_active(&hold));

        assert!(wallet.release_hold(&hold).await.is_err());
        assert!(wallet.capture_hold(&hold, "late capture").await.is_err());
        assert_eq!(wallet.count(WalletOpKind::Release), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let wallet = MemoryWallet::new();
        wallet.fail(WalletOpKind::Hold);
        let result = wallet
            .hold_funds(Uuid::new_v4(), dec!(10), REFERENCE_SERVICE_ORDER, "x", 10)
            .await;
        assert!(result.is_err());
        assert!(wallet.operations().is_empty());

        wallet.recover(WalletOpKind::Hold);
        assert!(wallet
            .hold_funds(Uuid::new_v4(), dec!(10), REFERENCE_SERVICE_ORDER, "x", 10)
            .await
            .is_ok());
    }
}
