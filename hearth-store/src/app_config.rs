use hearth_catalog::PricingConfig;
use hearth_dispatch::DispatchSettings;
use hearth_order::OrderSettings;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub dispatch: DispatchConfig,
    pub pricing: PricingConfig,
    pub orders: OrdersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    /// In-process collaborators; no database or Redis needed.
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    pub offer_timeout_seconds: u64,
    pub tried_ttl_seconds: u64,
    pub search_radius_meters: u32,
    pub candidate_limit: usize,
    pub contention_retry_seconds: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrdersConfig {
    pub hold_duration_minutes: u32,
    pub expiration_minutes: i64,
    pub max_active_orders_per_customer: usize,
    pub max_active_orders_per_provider: usize,
    pub expiry_sweep_seconds: u64,
}

impl DispatchConfig {
    pub fn settings(&self) -> DispatchSettings {
        DispatchSettings {
            offer_timeout: Duration::from_secs(self.offer_timeout_seconds),
            tried_ttl: Duration::from_secs(self.tried_ttl_seconds),
            search_radius_meters: self.search_radius_meters,
            candidate_limit: self.candidate_limit,
            contention_retry: Duration::from_secs(self.contention_retry_seconds.max(1)),
        }
    }
}

impl OrdersConfig {
    /// Rejected providers stay excluded as long as offered ones do.
    pub fn settings(&self, dispatch: &DispatchConfig) -> OrderSettings {
        OrderSettings {
            hold_duration_minutes: self.hold_duration_minutes,
            expiration_minutes: self.expiration_minutes,
            max_active_orders_per_customer: self.max_active_orders_per_customer,
            max_active_orders_per_provider: self.max_active_orders_per_provider,
            exclusion_ttl: Duration::from_secs(dispatch.tried_ttl_seconds),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_seconds.max(1))
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `HEARTH_DISPATCH__OFFER_TIMEOUT_SECONDS=30`
            .add_source(config::Environment::with_prefix("HEARTH").separator("__"))
            .build()?;

        let config: Config = s.try_deserialize()?;
        config
            .pricing
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parse(extra: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::from_str(extra, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_file_matches_built_in_defaults() {
        let config = parse("");
        let pricing = config.pricing;
        let defaults = PricingConfig::default();
        assert_eq!(pricing.commission_rate, defaults.commission_rate);
        assert_eq!(pricing.surge_fee, dec!(5.00));
        assert_eq!(pricing.cancellation_fee_after_start, dec!(1.00));
        assert_eq!(config.storage.backend, StorageBackend::Postgres);

        let dispatch = config.dispatch.settings();
        assert_eq!(dispatch.offer_timeout, DispatchSettings::default().offer_timeout);
        assert_eq!(dispatch.candidate_limit, 10);
        assert_eq!(dispatch.contention_retry, DispatchSettings::default().contention_retry);

        let orders = config.orders.settings(&config.dispatch);
        assert_eq!(orders.hold_duration_minutes, OrderSettings::default().hold_duration_minutes);
        assert_eq!(orders.exclusion_ttl, Duration::from_secs(86_400));
        assert_eq!(
            orders.max_active_orders_per_provider,
            OrderSettings::default().max_active_orders_per_provider
        );
    }

    #[test]
    fn test_overrides_layer_on_top() {
        let config = parse("[storage]\nbackend = \"memory\"\n[dispatch]\noffer_timeout_seconds = 30\n");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.dispatch.settings().offer_timeout, Duration::from_secs(30));
        assert_eq!(config.dispatch.search_radius_meters, 15_000);
    }
}
