pub mod catalog;
pub mod pricing;
pub mod service;

pub use catalog::{MemoryCatalog, ServiceCatalog};
pub use pricing::{CancellationQuote, ItemQuote, PriceBreakdown, PricingCalculator, PricingConfig, PricingError};
pub use service::{AddOn, OptionChoice, OptionKind, SelectedOption, ServiceDefinition, ServiceOption};
