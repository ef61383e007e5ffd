use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_core::{ActorRole, BoxError, GeoPoint, OrderStatus, PaymentMethod, PaymentStatus};
use hearth_order::{
    CancellationInfo, Order, OrderAddOn, OrderItem, OrderRepository, Rating, RatingParty,
    StatusHistoryEntry,
};
use hearth_shared::Masked;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, code, customer_id, provider_id, category_slug, address, latitude, longitude, \
     service_date, frequency, notes, subtotal, surge_fee, platform_commission, discount, total, \
     status, wallet_hold_id, payment_method, payment_status, cancelled_by, cancelled_by_id, \
     cancelled_at, cancellation_reason, cancellation_fee, refund_amount, created_at, updated_at, \
     provider_accepted_at, provider_started_at, provider_completed_at, completed_at, expires_at, \
     customer_rating, customer_review, customer_rated_at, provider_rating, provider_review, provider_rated_at";

fn active_statuses() -> Vec<&'static str> {
    OrderStatus::ALL
        .iter()
        .filter(|s| s.is_active())
        .map(|s| s.as_str())
        .collect()
}

fn rating_parts(rating: Option<&Rating>) -> (Option<i16>, Option<String>, Option<DateTime<Utc>>) {
    match rating {
        Some(r) => (Some(i16::from(r.score)), r.review.clone(), Some(r.rated_at)),
        None => (None, None, None),
    }
}

fn rating_from_row(
    score: Option<i16>,
    review: Option<String>,
    rated_at: Option<DateTime<Utc>>,
) -> Result<Option<Rating>, BoxError> {
    match (score, rated_at) {
        (Some(score), Some(rated_at)) => Ok(Some(Rating {
            score: u8::try_from(score).map_err(|_| format!("rating {} out of range", score))?,
            review,
            rated_at,
        })),
        _ => Ok(None),
    }
}

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach item and add-on snapshots to a batch of order rows.
    async fn hydrate(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, BoxError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let item_rows: Vec<OrderItemRow> = sqlx::query_as(
            "SELECT id, order_id, service_id, service_name, base_price, calculated_price, duration_minutes, selected_options \
             FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let add_on_rows: Vec<OrderAddOnRow> = sqlx::query_as(
            "SELECT order_id, add_on_id, title, price, duration_minutes \
             FROM order_add_ons WHERE order_id = ANY($1) ORDER BY order_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            let order_id = row.order_id;
            items.entry(order_id).or_default().push(row.into_item()?);
        }
        let mut add_ons: HashMap<Uuid, Vec<OrderAddOn>> = HashMap::new();
        for row in add_on_rows {
            add_ons.entry(row.order_id).or_default().push(OrderAddOn {
                add_on_id: row.add_on_id,
                title: row.title,
                price: row.price,
                duration_minutes: row.duration_minutes,
            });
        }

        rows.into_iter()
            .map(|row| {
                let id = row.id;
                row.into_order(
                    items.remove(&id).unwrap_or_default(),
                    add_ons.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    history: &[StatusHistoryEntry],
) -> Result<(), sqlx::Error> {
    for entry in history {
        sqlx::query(
            r#"
            INSERT INTO order_status_history
                (id, order_id, from_status, to_status, changed_by, changed_by_role, reason, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.order_id)
        .bind(entry.from_status.map(|s| s.as_str()))
        .bind(entry.to_status.as_str())
        .bind(entry.changed_by)
        .bind(entry.changed_by_role.as_str())
        .bind(&entry.reason)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create(&self, order: &Order, history: &[StatusHistoryEntry]) -> Result<(), BoxError> {
        let customer_rating = rating_parts(order.customer_rating.as_ref());
        let provider_rating = rating_parts(order.provider_rating.as_ref());
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, \
              $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34, $35, $36, $37, $38, $39)"
        ))
        .bind(order.id)
        .bind(&order.code)
        .bind(order.customer_id)
        .bind(order.provider_id)
        .bind(&order.category_slug)
        .bind(order.address.expose())
        .bind(order.location.latitude)
        .bind(order.location.longitude)
        .bind(order.service_date)
        .bind(&order.frequency)
        .bind(&order.notes)
        .bind(order.subtotal)
        .bind(order.surge_fee)
        .bind(order.platform_commission)
        .bind(order.discount)
        .bind(order.total)
        .bind(order.status.as_str())
        .bind(&order.wallet_hold_id)
        .bind(order.payment_method.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.cancellation.as_ref().map(|c| c.cancelled_by.as_str()))
        .bind(order.cancellation.as_ref().and_then(|c| c.cancelled_by_id))
        .bind(order.cancellation.as_ref().map(|c| c.cancelled_at))
        .bind(order.cancellation.as_ref().and_then(|c| c.reason.clone()))
        .bind(order.cancellation.as_ref().map(|c| c.cancellation_fee))
        .bind(order.cancellation.as_ref().map(|c| c.refund_amount))
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.provider_accepted_at)
        .bind(order.provider_started_at)
        .bind(order.provider_completed_at)
        .bind(order.completed_at)
        .bind(order.expires_at)
        .bind(customer_rating.0)
        .bind(customer_rating.1)
        .bind(customer_rating.2)
        .bind(provider_rating.0)
        .bind(provider_rating.1)
        .bind(provider_rating.2)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items
                    (id, order_id, position, service_id, service_name, base_price, calculated_price, duration_minutes, selected_options)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.id)
            .bind(order.id)
            .bind(position as i32)
            .bind(item.service_id)
            .bind(&item.service_name)
            .bind(item.base_price)
            .bind(item.calculated_price)
            .bind(item.duration_minutes)
            .bind(serde_json::to_value(&item.selected_options)?)
            .execute(&mut *tx)
            .await?;
        }

        for (position, add_on) in order.add_ons.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_add_ons (order_id, position, add_on_id, title, price, duration_minutes)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id)
            .bind(position as i32)
            .bind(add_on.add_on_id)
            .bind(&add_on.title)
            .bind(add_on.price)
            .bind(add_on.duration_minutes)
            .execute(&mut *tx)
            .await?;
        }

        insert_history(&mut tx, history).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, BoxError> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn save_transition(
        &self,
        order: &Order,
        expected: OrderStatus,
        history: &[StatusHistoryEntry],
    ) -> Result<bool, BoxError> {
        let mut tx = self.pool.begin().await?;

        // Line items and money are immutable after creation.
        let updated = sqlx::query(
            r#"
            UPDATE orders SET
                provider_id = $3,
                status = $4,
                wallet_hold_id = $5,
                payment_status = $6,
                cancelled_by = $7,
                cancelled_by_id = $8,
                cancelled_at = $9,
                cancellation_reason = $10,
                cancellation_fee = $11,
                refund_amount = $12,
                updated_at = $13,
                provider_accepted_at = $14,
                provider_started_at = $15,
                provider_completed_at = $16,
                completed_at = $17,
                expires_at = $18
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order.id)
        .bind(expected.as_str())
        .bind(order.provider_id)
        .bind(order.status.as_str())
        .bind(&order.wallet_hold_id)
        .bind(order.payment_status.as_str())
        .bind(order.cancellation.as_ref().map(|c| c.cancelled_by.as_str()))
        .bind(order.cancellation.as_ref().and_then(|c| c.cancelled_by_id))
        .bind(order.cancellation.as_ref().map(|c| c.cancelled_at))
        .bind(order.cancellation.as_ref().and_then(|c| c.reason.clone()))
        .bind(order.cancellation.as_ref().map(|c| c.cancellation_fee))
        .bind(order.cancellation.as_ref().map(|c| c.refund_amount))
        .bind(order.updated_at)
        .bind(order.provider_accepted_at)
        .bind(order.provider_started_at)
        .bind(order.provider_completed_at)
        .bind(order.completed_at)
        .bind(order.expires_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_history(&mut tx, history).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, BoxError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT id, order_id, from_status, to_status, changed_by, changed_by_role, reason, metadata, created_at \
             FROM order_status_history WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    async fn save_rating(
        &self,
        order_id: Uuid,
        party: RatingParty,
        rating: &Rating,
    ) -> Result<bool, BoxError> {
        // Column names come from this match, never from input.
        let (score_col, review_col, rated_at_col) = match party {
            RatingParty::Customer => ("customer_rating", "customer_review", "customer_rated_at"),
            RatingParty::Provider => ("provider_rating", "provider_review", "provider_rated_at"),
        };
        let updated = sqlx::query(&format!(
            "UPDATE orders SET {score_col} = $2, {review_col} = $3, {rated_at_col} = $4 \
             WHERE id = $1 AND status = 'completed' AND {score_col} IS NULL"
        ))
        .bind(order_id)
        .bind(i16::from(rating.score))
        .bind(&rating.review)
        .bind(rating.rated_at)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn count_active_for_customer(&self, customer_id: Uuid) -> Result<usize, BoxError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM orders WHERE customer_id = $1 AND status = ANY($2)",
        )
        .bind(customer_id)
        .bind(active_statuses())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }

    async fn count_active_for_provider(&self, provider_id: Uuid) -> Result<usize, BoxError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM orders WHERE provider_id = $1 AND status = ANY($2)",
        )
        .bind(provider_id)
        .bind(active_statuses())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }

    async fn find_overdue(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>, BoxError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status IN ('pending', 'searching_provider') AND expires_at <= $1 \
             ORDER BY expires_at LIMIT $2"
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn find_awaiting_provider(&self, limit: usize) -> Result<Vec<Order>, BoxError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status IN ('pending', 'searching_provider') \
             ORDER BY created_at LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    code: String,
    customer_id: Uuid,
    provider_id: Option<Uuid>,
    category_slug: String,
    address: String,
    latitude: f64,
    longitude: f64,
    service_date: DateTime<Utc>,
    frequency: String,
    notes: Option<String>,
    subtotal: Decimal,
    surge_fee: Decimal,
    platform_commission: Decimal,
    discount: Decimal,
    total: Decimal,
    status: String,
    wallet_hold_id: Option<String>,
    payment_method: String,
    payment_status: String,
    cancelled_by: Option<String>,
    cancelled_by_id: Option<Uuid>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    cancellation_fee: Option<Decimal>,
    refund_amount: Option<Decimal>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    provider_accepted_at: Option<DateTime<Utc>>,
    provider_started_at: Option<DateTime<Utc>>,
    provider_completed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    customer_rating: Option<i16>,
    customer_review: Option<String>,
    customer_rated_at: Option<DateTime<Utc>>,
    provider_rating: Option<i16>,
    provider_review: Option<String>,
    provider_rated_at: Option<DateTime<Utc>>,
}

fn parse_role(raw: &str) -> Result<ActorRole, BoxError> {
    ActorRole::parse(raw).ok_or_else(|| format!("unknown actor role {:?}", raw).into())
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>, add_ons: Vec<OrderAddOn>) -> Result<Order, BoxError> {
        let cancellation = match (self.cancelled_by, self.cancelled_at) {
            (Some(role), Some(cancelled_at)) => Some(CancellationInfo {
                cancelled_by: parse_role(&role)?,
                cancelled_by_id: self.cancelled_by_id,
                cancelled_at,
                reason: self.cancellation_reason,
                cancellation_fee: self.cancellation_fee.unwrap_or_default(),
                refund_amount: self.refund_amount.unwrap_or_default(),
            }),
            _ => None,
        };
        let customer_rating =
            rating_from_row(self.customer_rating, self.customer_review, self.customer_rated_at)?;
        let provider_rating =
            rating_from_row(self.provider_rating, self.provider_review, self.provider_rated_at)?;

        Ok(Order {
            id: self.id,
            code: self.code,
            customer_id: self.customer_id,
            provider_id: self.provider_id,
            category_slug: self.category_slug,
            address: Masked::new(self.address),
            location: GeoPoint::new(self.latitude, self.longitude),
            service_date: self.service_date,
            frequency: self.frequency,
            notes: self.notes,
            items,
            add_ons,
            subtotal: self.subtotal,
            surge_fee: self.surge_fee,
            platform_commission: self.platform_commission,
            discount: self.discount,
            total: self.total,
            status: self.status.parse::<OrderStatus>()?,
            wallet_hold_id: self.wallet_hold_id,
            payment_method: self.payment_method.parse::<PaymentMethod>()?,
            payment_status: self.payment_status.parse::<PaymentStatus>()?,
            cancellation,
            customer_rating,
            provider_rating,
            created_at: self.created_at,
            updated_at: self.updated_at,
            provider_accepted_at: self.provider_accepted_at,
            provider_started_at: self.provider_started_at,
            provider_completed_at: self.provider_completed_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    service_id: Uuid,
    service_name: String,
    base_price: Decimal,
    calculated_price: Decimal,
    duration_minutes: i32,
    selected_options: Value,
}

impl OrderItemRow {
    fn into_item(self) -> Result<OrderItem, BoxError> {
        let selected_options: BTreeMap<String, Value> = serde_json::from_value(self.selected_options)?;
        Ok(OrderItem {
            id: self.id,
            service_id: self.service_id,
            service_name: self.service_name,
            base_price: self.base_price,
            calculated_price: self.calculated_price,
            duration_minutes: self.duration_minutes,
            selected_options,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderAddOnRow {
    order_id: Uuid,
    add_on_id: Uuid,
    title: String,
    price: Decimal,
    duration_minutes: i32,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    order_id: Uuid,
    from_status: Option<String>,
    to_status: String,
    changed_by: Option<Uuid>,
    changed_by_role: String,
    reason: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_entry(self) -> Result<StatusHistoryEntry, BoxError> {
        Ok(StatusHistoryEntry {
            id: self.id,
            order_id: self.order_id,
            from_status: self.from_status.map(|s| s.parse::<OrderStatus>()).transpose()?,
            to_status: self.to_status.parse::<OrderStatus>()?,
            changed_by: self.changed_by,
            changed_by_role: parse_role(&self.changed_by_role)?,
            reason: self.reason,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_columns_round_trip() {
        let rating = Rating { score: 5, review: Some("On time".to_string()), rated_at: Utc::now() };
        let (score, review, rated_at) = rating_parts(Some(&rating));
        assert_eq!(score, Some(5));
        assert_eq!(rating_from_row(score, review, rated_at).unwrap(), Some(rating));

        assert_eq!(rating_parts(None), (None, None, None));
        assert_eq!(rating_from_row(None, None, None).unwrap(), None);
        assert!(rating_from_row(Some(-1), None, Some(Utc::now())).is_err());
    }
}
