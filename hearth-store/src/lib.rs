pub mod app_config;
pub mod catalog_repo;
pub mod database;
pub mod order_repo;
pub mod provider_repo;
pub mod redis_ledger;

pub use app_config::{Config, StorageBackend};
pub use catalog_repo::PgServiceCatalog;
pub use database::DbClient;
pub use order_repo::PgOrderRepository;
pub use provider_repo::PgProviderDirectory;
pub use redis_ledger::RedisOfferLedger;
