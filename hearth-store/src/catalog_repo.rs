use async_trait::async_trait;
use hearth_catalog::{AddOn, ServiceCatalog, ServiceDefinition, ServiceOption};
use hearth_core::BoxError;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Read side of the catalog tables. Unknown ids are simply absent from the
/// result; the order service decides what that means.
pub struct PgServiceCatalog {
    pool: PgPool,
}

impl PgServiceCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ServiceRow {
    id: Uuid,
    title: String,
    category_slug: String,
    base_price: Decimal,
    base_duration_minutes: i32,
    is_active: bool,
    options: Value,
}

#[derive(sqlx::FromRow)]
struct AddOnRow {
    id: Uuid,
    title: String,
    category_slug: String,
    price: Decimal,
    duration_minutes: i32,
    is_active: bool,
}

#[async_trait]
impl ServiceCatalog for PgServiceCatalog {
    async fn get_services(&self, ids: &[Uuid]) -> Result<Vec<ServiceDefinition>, BoxError> {
        let rows: Vec<ServiceRow> = sqlx::query_as(
            "SELECT id, title, category_slug, base_price, base_duration_minutes, is_active, options \
             FROM services WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut services = Vec::with_capacity(rows.len());
        for row in rows {
            let options: Vec<ServiceOption> = serde_json::from_value(row.options)?;
            services.push(ServiceDefinition {
                id: row.id,
                title: row.title,
                category_slug: row.category_slug,
                base_price: row.base_price,
                base_duration_minutes: row.base_duration_minutes,
                is_active: row.is_active,
                options,
            });
        }
        Ok(services)
    }

    async fn get_addons(&self, ids: &[Uuid]) -> Result<Vec<AddOn>, BoxError> {
        let rows: Vec<AddOnRow> = sqlx::query_as(
            "SELECT id, title, category_slug, price, duration_minutes, is_active \
             FROM add_ons WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AddOn {
                id: row.id,
                title: row.title,
                category_slug: row.category_slug,
                price: row.price,
                duration_minutes: row.duration_minutes,
                is_active: row.is_active,
            })
            .collect())
    }
}
