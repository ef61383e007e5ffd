use async_trait::async_trait;
use hearth_core::{
    BoxError, GeoPoint, ProviderCandidate, ProviderDirectory, ProviderProfile, ProviderStatus,
};
use sqlx::PgPool;
use uuid::Uuid;

/// PostGIS-backed provider lookup.
pub struct PgProviderDirectory {
    pool: PgPool,
}

impl PgProviderDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: Uuid,
    user_id: Uuid,
    distance_meters: f64,
}

#[derive(sqlx::FromRow)]
struct ProviderRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    is_verified: bool,
}

#[async_trait]
impl ProviderDirectory for PgProviderDirectory {
    async fn find_nearest_qualified(
        &self,
        service_ids: &[Uuid],
        location: GeoPoint,
        radius_meters: u32,
        limit: usize,
    ) -> Result<Vec<ProviderCandidate>, BoxError> {
        // A provider qualifies only when it offers every requested service.
        let rows: Vec<CandidateRow> = sqlx::query_as(
            r#"
            WITH origin AS (
                SELECT ST_SetSRID(ST_MakePoint($2, $3), 4326)::geography AS point
            )
            SELECT p.id, p.user_id, ST_Distance(p.location, origin.point) AS distance_meters
            FROM providers p, origin
            WHERE p.status = 'available'
              AND p.is_verified
              AND p.location IS NOT NULL
              AND ST_DWithin(p.location, origin.point, $4)
              AND (
                  SELECT COUNT(DISTINCT ps.service_id)
                  FROM provider_services ps
                  WHERE ps.provider_id = p.id AND ps.service_id = ANY($1)
              ) = $5
            ORDER BY distance_meters
            LIMIT $6
            "#,
        )
        .bind(service_ids)
        .bind(location.longitude)
        .bind(location.latitude)
        .bind(f64::from(radius_meters))
        .bind(service_ids.len() as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ProviderCandidate {
                id: row.id,
                user_id: row.user_id,
                distance_meters: row.distance_meters,
            })
            .collect())
    }

    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<ProviderProfile>, BoxError> {
        let row: Option<ProviderRow> =
            sqlx::query_as("SELECT id, user_id, status, is_verified FROM providers WHERE id = $1")
                .bind(provider_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => {
                let status = ProviderStatus::parse(&row.status)
                    .ok_or_else(|| format!("unknown provider status {:?}", row.status))?;
                Ok(Some(ProviderProfile {
                    id: row.id,
                    user_id: row.user_id,
                    status,
                    is_verified: row.is_verified,
                }))
            }
            None => Ok(None),
        }
    }

    async fn set_status(&self, provider_id: Uuid, status: ProviderStatus) -> Result<(), BoxError> {
        let result = sqlx::query("UPDATE providers SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(provider_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(format!("provider {} not found", provider_id).into());
        }
        Ok(())
    }
}
