use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{haversine_m, validate_point};
use crate::models::provider::{GeoPoint, NearbyProvider, ProviderStatus};

/// Current provider positions, bucketed by region and availability.
///
/// Only the provider's own location stream writes here; dispatch reads.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    async fn update_location(
        &self,
        provider_id: Uuid,
        location: GeoPoint,
        region: &str,
        status: ProviderStatus,
    ) -> Result<(), AppError>;

    async fn move_status(
        &self,
        provider_id: Uuid,
        region: &str,
        from: ProviderStatus,
        to: ProviderStatus,
    ) -> Result<(), AppError>;

    async fn remove_all(&self, provider_id: Uuid, region: &str) -> Result<(), AppError>;

    /// Free providers within `radius_m` of `center`, nearest first.
    async fn nearby(
        &self,
        center: GeoPoint,
        radius_m: f64,
        limit: usize,
        region: &str,
    ) -> Result<Vec<NearbyProvider>, AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    region: String,
    status: ProviderStatus,
}

impl BucketKey {
    fn new(region: &str, status: ProviderStatus) -> Self {
        Self {
            region: region.to_string(),
            status,
        }
    }
}

/// Geo-set style index: each bucket maps a member string to its coordinate,
/// the way a geo-sorted-set backend stores members.
#[derive(Default)]
pub struct MemoryGeoIndex {
    buckets: DashMap<BucketKey, HashMap<String, GeoPoint>>,
}

impl MemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_len(&self, region: &str, status: ProviderStatus) -> usize {
        self.buckets
            .get(&BucketKey::new(region, status))
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    pub fn position(
        &self,
        provider_id: Uuid,
        region: &str,
        status: ProviderStatus,
    ) -> Option<GeoPoint> {
        self.buckets
            .get(&BucketKey::new(region, status))
            .and_then(|bucket| bucket.get(&provider_id.to_string()).copied())
    }

    #[cfg(test)]
    fn insert_raw(&self, region: &str, status: ProviderStatus, member: &str, point: GeoPoint) {
        self.buckets
            .entry(BucketKey::new(region, status))
            .or_default()
            .insert(member.to_string(), point);
    }
}

#[async_trait]
impl GeoIndex for MemoryGeoIndex {
    async fn update_location(
        &self,
        provider_id: Uuid,
        location: GeoPoint,
        region: &str,
        status: ProviderStatus,
    ) -> Result<(), AppError> {
        validate_point(&location)?;

        self.buckets
            .entry(BucketKey::new(region, status))
            .or_default()
            .insert(provider_id.to_string(), location);

        debug!(provider_id = %provider_id, region, status = ?status, "provider location updated");
        Ok(())
    }

    async fn move_status(
        &self,
        provider_id: Uuid,
        region: &str,
        from: ProviderStatus,
        to: ProviderStatus,
    ) -> Result<(), AppError> {
        if from == to {
            return Ok(());
        }

        let member = provider_id.to_string();
        let location = self
            .buckets
            .get_mut(&BucketKey::new(region, from))
            .and_then(|mut bucket| bucket.remove(&member))
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "provider {provider_id} has no position in {from:?} bucket of {region}"
                ))
            })?;

        self.buckets
            .entry(BucketKey::new(region, to))
            .or_default()
            .insert(member, location);

        debug!(provider_id = %provider_id, region, from = ?from, to = ?to, "provider status moved");
        Ok(())
    }

    async fn remove_all(&self, provider_id: Uuid, region: &str) -> Result<(), AppError> {
        let member = provider_id.to_string();
        for status in [ProviderStatus::Free, ProviderStatus::Busy] {
            if let Some(mut bucket) = self.buckets.get_mut(&BucketKey::new(region, status)) {
                bucket.remove(&member);
            }
        }
        Ok(())
    }

    async fn nearby(
        &self,
        center: GeoPoint,
        radius_m: f64,
        limit: usize,
        region: &str,
    ) -> Result<Vec<NearbyProvider>, AppError> {
        let Some(bucket) = self.buckets.get(&BucketKey::new(region, ProviderStatus::Free)) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<NearbyProvider> = bucket
            .iter()
            .filter_map(|(member, location)| {
                let provider_id = match Uuid::parse_str(member) {
                    Ok(id) => id,
                    Err(err) => {
                        warn!(
                            member = %member,
                            region,
                            error = %err,
                            "skipping malformed geo member"
                        );
                        return None;
                    }
                };
                let distance_m = haversine_m(&center, location);
                (distance_m <= radius_m).then_some(NearbyProvider {
                    provider_id,
                    distance_m,
                    location: *location,
                })
            })
            .collect();

        found.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        found.truncate(limit);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: &str = "hamburg";

    fn center() -> GeoPoint {
        GeoPoint::new(53.5511, 9.9937)
    }

    #[tokio::test]
    async fn nearby_is_sorted_and_capped() {
        let index = MemoryGeoIndex::new();
        let far = Uuid::from_u128(1);
        let near = Uuid::from_u128(2);
        let mid = Uuid::from_u128(3);

        index
            .update_location(far, GeoPoint::new(53.5600, 9.9937), REGION, ProviderStatus::Free)
            .await
            .unwrap();
        index
            .update_location(near, GeoPoint::new(53.5512, 9.9937), REGION, ProviderStatus::Free)
            .await
            .unwrap();
        index
            .update_location(mid, GeoPoint::new(53.5540, 9.9937), REGION, ProviderStatus::Free)
            .await
            .unwrap();

        let all = index.nearby(center(), 5_000.0, 10, REGION).await.unwrap();
        let ids: Vec<Uuid> = all.iter().map(|p| p.provider_id).collect();
        assert_eq!(ids, vec![near, mid, far]);

        let capped = index.nearby(center(), 5_000.0, 2, REGION).await.unwrap();
        assert_eq!(capped.len(), 2);

        let tight = index.nearby(center(), 100.0, 10, REGION).await.unwrap();
        assert_eq!(tight.len(), 1);
        assert_eq!(tight[0].provider_id, near);
    }

    #[tokio::test]
    async fn missing_bucket_is_empty_not_error() {
        let index = MemoryGeoIndex::new();
        let result = index.nearby(center(), 1_000.0, 20, "nowhere").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn malformed_members_are_skipped() {
        let index = MemoryGeoIndex::new();
        let good = Uuid::from_u128(7);
        index.insert_raw(REGION, ProviderStatus::Free, "not-a-uuid", center());
        index
            .update_location(good, center(), REGION, ProviderStatus::Free)
            .await
            .unwrap();

        let result = index.nearby(center(), 1_000.0, 20, REGION).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].provider_id, good);
    }

    #[tokio::test]
    async fn busy_providers_are_not_nearby() {
        let index = MemoryGeoIndex::new();
        let id = Uuid::from_u128(9);
        index
            .update_location(id, center(), REGION, ProviderStatus::Free)
            .await
            .unwrap();
        index
            .move_status(id, REGION, ProviderStatus::Free, ProviderStatus::Busy)
            .await
            .unwrap();

        assert!(index.nearby(center(), 1_000.0, 20, REGION).await.unwrap().is_empty());
        assert_eq!(index.position(id, REGION, ProviderStatus::Busy), Some(center()));
    }

    #[tokio::test]
    async fn move_without_position_fails_and_same_status_is_noop() {
        let index = MemoryGeoIndex::new();
        let id = Uuid::from_u128(11);

        let result = index
            .move_status(id, REGION, ProviderStatus::Free, ProviderStatus::Busy)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        index
            .move_status(id, REGION, ProviderStatus::Busy, ProviderStatus::Busy)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_all_clears_every_bucket() {
        let index = MemoryGeoIndex::new();
        let id = Uuid::from_u128(12);
        index
            .update_location(id, center(), REGION, ProviderStatus::Free)
            .await
            .unwrap();
        index
            .update_location(id, center(), REGION, ProviderStatus::Busy)
            .await
            .unwrap();

        index.remove_all(id, REGION).await.unwrap();

        assert_eq!(index.bucket_len(REGION, ProviderStatus::Free), 0);
        assert_eq!(index.bucket_len(REGION, ProviderStatus::Busy), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_coordinates() {
        let index = MemoryGeoIndex::new();
        let result = index
            .update_location(
                Uuid::from_u128(1),
                GeoPoint::new(0.0, 0.0),
                REGION,
                ProviderStatus::Free,
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}
