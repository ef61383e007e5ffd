use async_trait::async_trait;
use hearth_core::BoxError;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::service::{AddOn, ServiceDefinition};

/// Read-only view of the service catalog.
///
/// Lookups return only the ids that exist; callers compare lengths to detect
/// unknown ids.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn get_services(&self, ids: &[Uuid]) -> Result<Vec<ServiceDefinition>, BoxError>;
    async fn get_addons(&self, ids: &[Uuid]) -> Result<Vec<AddOn>, BoxError>;
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    services: RwLock<HashMap<Uuid, ServiceDefinition>>,
    addons: RwLock<HashMap<Uuid, AddOn>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(self, service: ServiceDefinition) -> Self {
        self.insert_service(service);
        self
    }

    pub fn with_addon(self, addon: AddOn) -> Self {
        self.insert_addon(addon);
        self
    }

    pub fn insert_service(&self, service: ServiceDefinition) {
        if let Ok(mut services) = self.services.write() {
            services.insert(service.id, service);
        }
    }

    pub fn insert_addon(&self, addon: AddOn) {
        if let Ok(mut addons) = self.addons.write() {
            addons.insert(addon.id, addon);
        }
    }
}

#[async_trait]
impl ServiceCatalog for MemoryCatalog {
    async fn get_services(&self, ids: &[Uuid]) -> Result<Vec<ServiceDefinition>, BoxError> {
        let services = self.services.read().map_err(|e| e.to_string())?;
        Ok(ids.iter().filter_map(|id| services.get(id).cloned()).collect())
    }

    async fn get_addons(&self, ids: &[Uuid]) -> Result<Vec<AddOn>, BoxError> {
        let addons = self.addons.read().map_err(|e| e.to_string())?;
        Ok(ids.iter().filter_map(|id| addons.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_lookup_skips_unknown_ids() {
        let addon = AddOn {
            id: Uuid::new_v4(),
            title: "Fridge interior".to_string(),
            category_slug: "cleaning".to_string(),
            price: dec!(12.00),
            duration_minutes: 20,
            is_active: true,
        };
        let catalog = MemoryCatalog::new().with_addon(addon.clone());

        let found = catalog.get_addons(&[addon.id, Uuid::new_v4()]).await.unwrap();
        assert_eq!(found, vec![addon]);
        assert!(catalog.get_services(&[Uuid::new_v4()]).await.unwrap().is_empty());
    }
}
