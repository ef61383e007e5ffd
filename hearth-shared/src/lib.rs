pub mod events;
pub mod money;
pub mod pii;

pub use events::OrderEvent;
pub use money::{round2, Money};
pub use pii::Masked;
