use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::BoxError;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance (haversine).
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_METERS * c
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Available,
    Busy,
    Offline,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Available => "available",
            ProviderStatus::Busy => "busy",
            ProviderStatus::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(ProviderStatus::Available),
            "busy" => Some(ProviderStatus::Busy),
            "offline" => Some(ProviderStatus::Offline),
            _ => None,
        }
    }
}

/// A provider returned by a nearest-qualified search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderCandidate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderProfile {
    pub id: Uuid,
    /// Wallet owner for payouts.
    pub user_id: Uuid,
    pub status: ProviderStatus,
    pub is_verified: bool,
}

/// Provider lookup capability. The geospatial index lives behind this trait.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Available, verified providers qualified for *every* service id, within
    /// `radius_meters` of `location`, nearest first, at most `limit`.
    async fn find_nearest_qualified(
        &self,
        service_ids: &[Uuid],
        location: GeoPoint,
        radius_meters: u32,
        limit: usize,
    ) -> Result<Vec<ProviderCandidate>, BoxError>;

    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<ProviderProfile>, BoxError>;

    async fn set_status(&self, provider_id: Uuid, status: ProviderStatus) -> Result<(), BoxError>;
}

#[derive(Debug, Clone)]
struct ListedProvider {
    profile: ProviderProfile,
    location: GeoPoint,
    services: HashSet<Uuid>,
}

/// Linear-scan directory for tests and the `memory` storage profile.
#[derive(Debug, Default)]
pub struct MemoryProviderDirectory {
    providers: Mutex<HashMap<Uuid, ListedProvider>>,
}

impl MemoryProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an available, verified provider qualified for `services`.
    pub fn add(&self, location: GeoPoint, services: &[Uuid]) -> ProviderProfile {
        let profile = ProviderProfile {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: ProviderStatus::Available,
            is_verified: true,
        };
        self.insert(profile.clone(), location, services);
        profile
    }

    pub fn insert(&self, profile: ProviderProfile, location: GeoPoint, services: &[Uuid]) {
        self.lock().insert(
            profile.id,
            ListedProvider { profile, location, services: services.iter().copied().collect() },
        );
    }

    pub fn status_of(&self, provider_id: Uuid) -> Option<ProviderStatus> {
        self.lock().get(&provider_id).map(|p| p.profile.status)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ListedProvider>> {
        self.providers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProviderDirectory for MemoryProviderDirectory {
    async fn find_nearest_qualified(
        &self,
        service_ids: &[Uuid],
        location: GeoPoint,
        radius_meters: u32,
        limit: usize,
    ) -> Result<Vec<ProviderCandidate>, BoxError> {
        let providers = self.lock();
        let mut candidates: Vec<ProviderCandidate> = providers
            .values()
            .filter(|p| p.profile.status == ProviderStatus::Available && p.profile.is_verified)
            .filter(|p| service_ids.iter().all(|id| p.services.contains(id)))
            .map(|p| ProviderCandidate {
                id: p.profile.id,
                user_id: p.profile.user_id,
                distance_meters: p.location.distance_meters(&location),
            })
            .filter(|c| c.distance_meters <= f64::from(radius_meters))
            .collect();
        candidates.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<ProviderProfile>, BoxError> {
        Ok(self.lock().get(&provider_id).map(|p| p.profile.clone()))
    }

    async fn set_status(&self, provider_id: Uuid, status: ProviderStatus) -> Result<(), BoxError> {
        match self.lock().get_mut(&provider_id) {
            Some(p) => {
                p.profile.status = status;
                Ok(())
            }
            None => Err(format!("provider {} not found", provider_id).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nearest_qualified_filters_and_orders() {
        let directory = MemoryProviderDirectory::new();
        let (cleaning, plumbing) = (Uuid::new_v4(), Uuid::new_v4());
        let home = GeoPoint::new(31.5204, 74.3587);

        let far = directory.add(GeoPoint::new(31.56, 74.36), &[cleaning, plumbing]);
        let near = directory.add(GeoPoint::new(31.521, 74.359), &[cleaning, plumbing]);
        directory.add(GeoPoint::new(31.5205, 74.3587), &[cleaning]);
        directory.add(GeoPoint::new(33.68, 73.04), &[cleaning, plumbing]);
        let busy = directory.add(GeoPoint::new(31.5204, 74.3588), &[cleaning, plumbing]);
        directory.set_status(busy.id, ProviderStatus::Busy).await.unwrap();

        let found = directory
            .find_nearest_qualified(&[cleaning, plumbing], home, 15_000, 10)
            .await
            .unwrap();
        let ids: Vec<Uuid> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![near.id, far.id]);
    }

    #[test]
    fn test_distance_is_symmetric_and_plausible() {
        // Lahore to Islamabad, roughly 270 km.
        let lahore = GeoPoint::new(31.5204, 74.3587);
        let islamabad = GeoPoint::new(33.6844, 73.0479);
        let d1 = lahore.distance_meters(&islamabad);
        let d2 = islamabad.distance_meters(&lahore);
        assert!((d1 - d2).abs() < 1e-6);
        assert!(d1 > 260_000.0 && d1 < 280_000.0);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(GeoPoint::new(45.0, 120.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -181.0).is_valid());
    }
}
