use anyhow::Context;
use hearth_catalog::{MemoryCatalog, PricingCalculator, PricingConfig, ServiceCatalog};
use hearth_core::{
    DispatchTask, MemoryOfferLedger, MemoryProviderDirectory, MemoryWallet, OfferLedger,
    ProviderDirectory, WalletService,
};
use hearth_dispatch::{start_dispatch_worker, DispatchEngine, DispatchQueue, DispatchSettings, OfferTimers};
use hearth_order::{MemoryOrderRepository, OrderRepository, OrderService, OrderSettings};
use hearth_store::{
    Config, DbClient, PgOrderRepository, PgProviderDirectory, PgServiceCatalog, RedisOfferLedger,
    StorageBackend,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything the order service and the dispatch engine talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderRepository>,
    pub catalog: Arc<dyn ServiceCatalog>,
    pub wallet: Arc<dyn WalletService>,
    pub ledger: Arc<dyn OfferLedger>,
    pub providers: Arc<dyn ProviderDirectory>,
}

impl Collaborators {
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(MemoryOrderRepository::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            wallet: Arc::new(MemoryWallet::new()),
            ledger: Arc::new(MemoryOfferLedger::new()),
            providers: Arc::new(MemoryProviderDirectory::new()),
        }
    }

    /// Postgres for orders, catalog and providers; Redis for the offer ledger.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let db = DbClient::new(&config.database)
            .await
            .context("Failed to connect to Postgres")?;
        db.migrate().await.context("Failed to run migrations")?;

        let ledger = RedisOfferLedger::new(&config.redis.url).context("Invalid Redis URL")?;
        ledger.ping().await.context("Failed to connect to Redis")?;

        // Wallet ledger is owned by the payments service; no remote client yet.
        tracing::warn!("Using in-process wallet");

        Ok(Self {
            orders: Arc::new(PgOrderRepository::new(db.pool.clone())),
            catalog: Arc::new(PgServiceCatalog::new(db.pool.clone())),
            wallet: Arc::new(MemoryWallet::new()),
            ledger: Arc::new(ledger),
            providers: Arc::new(PgProviderDirectory::new(db.pool)),
        })
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        match config.storage.backend {
            StorageBackend::Postgres => Self::connect(config).await,
            StorageBackend::Memory => {
                tracing::info!("Storage backend: memory");
                Ok(Self::in_memory())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub pricing: PricingConfig,
    pub orders: OrderSettings,
    pub dispatch: DispatchSettings,
    pub queue_capacity: usize,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            pricing: PricingConfig::default(),
            orders: OrderSettings::default(),
            dispatch: DispatchSettings::default(),
            queue_capacity: 1024,
        }
    }
}

impl From<&Config> for PlatformSettings {
    fn from(config: &Config) -> Self {
        Self {
            pricing: config.pricing.clone(),
            orders: config.orders.settings(&config.dispatch),
            dispatch: config.dispatch.settings(),
            queue_capacity: config.dispatch.queue_capacity,
        }
    }
}

/// The order service and dispatch engine wired over one task queue.
pub struct Platform {
    pub orders: Arc<OrderService>,
    pub engine: Arc<DispatchEngine>,
    dispatch_rx: mpsc::Receiver<DispatchTask>,
}

impl Platform {
    pub fn assemble(collaborators: Collaborators, settings: PlatformSettings) -> Self {
        let (queue, dispatch_rx) = DispatchQueue::new(settings.queue_capacity);
        let queue = Arc::new(queue);

        let orders = Arc::new(OrderService::new(
            collaborators.orders,
            collaborators.catalog,
            collaborators.wallet,
            collaborators.ledger.clone(),
            collaborators.providers.clone(),
            queue.clone(),
            PricingCalculator::new(settings.pricing),
            settings.orders,
        ));
        let engine = Arc::new(DispatchEngine::new(
            orders.clone(),
            collaborators.ledger,
            collaborators.providers,
            OfferTimers::new(queue),
            settings.dispatch,
        ));

        Self { orders, engine, dispatch_rx }
    }

    /// Start draining the dispatch queue.
    pub fn start_dispatch(self) -> (Arc<OrderService>, JoinHandle<()>) {
        let worker = start_dispatch_worker(self.dispatch_rx, self.engine);
        (self.orders, worker)
    }
}
