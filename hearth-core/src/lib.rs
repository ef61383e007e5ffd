pub mod dispatch;
pub mod identity;
pub mod ledger;
pub mod provider;
pub mod status;
pub mod wallet;

pub use dispatch::{DispatchReason, DispatchScheduler, DispatchTask};
pub use identity::{Actor, ActorRole};
pub use ledger::{MemoryOfferLedger, OfferLedger};
pub use provider::{
    GeoPoint, MemoryProviderDirectory, ProviderCandidate, ProviderDirectory, ProviderProfile,
    ProviderStatus,
};
pub use status::{OrderStatus, PaymentMethod, PaymentStatus};
pub use wallet::{MemoryWallet, WalletService};

/// Error type returned by collaborator adapters (wallet, ledger, directories, stores).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Forbidden: {0}")]
    ForbiddenError(String),
    #[error("Offer expired or invalid")]
    StaleOfferError,
    #[error("Conflict: {0}")]
    ConflictError(String),
    #[error("Dependency call failed ({operation}): {source}")]
    DependencyError {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    /// Adapter for `map_err` on collaborator results.
    pub fn dependency(operation: &'static str) -> impl FnOnce(BoxError) -> CoreError {
        move |source| CoreError::DependencyError { operation, source }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::ValidationError(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFoundError(what.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        CoreError::ForbiddenError(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_error_keeps_operation() {
        let source: BoxError = "connection refused".into();
        let err = CoreError::dependency("wallet.hold_funds")(source);
        assert_eq!(
            err.to_string(),
            "Dependency call failed (wallet.hold_funds): connection refused"
        );
    }

    #[test]
    fn test_stale_offer_message() {
        assert_eq!(CoreError::StaleOfferError.to_string(), "Offer expired or invalid");
    }
}
