pub mod admin;
pub mod expiry;
pub mod models;
pub mod rating;
pub mod repository;
pub mod service;
pub mod state_machine;

pub use admin::{BulkUpdateResult, OrderDetail};
pub use expiry::spawn_expiry_sweeper;
pub use models::{CancellationInfo, Order, OrderAddOn, OrderItem, Rating, RatingParty, StatusHistoryEntry};
pub use rating::RateRequest;
pub use repository::{MemoryOrderRepository, OrderRepository};
pub use service::{CancellationPreview, CreateOrderRequest, OrderItemRequest, OrderService, OrderSettings};
pub use state_machine::{apply_transition, can_transition, StatusChange, Transition, TransitionError, TransitionRule};
