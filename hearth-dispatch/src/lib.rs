pub mod engine;
pub mod queue;
pub mod timer;

pub use engine::{DispatchEngine, DispatchOutcome, DispatchSettings};
pub use queue::{start_dispatch_worker, DispatchQueue};
pub use timer::OfferTimers;
