use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use hearth_core::{ActorRole, OrderStatus};
use hearth_order::{BulkUpdateResult, OrderDetail};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::CurrentActor;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    pub provider_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminCancelRequest {
    pub reason: Option<String>,
    /// Explicit refund; the fee becomes `total - refund_amount`.
    pub refund_amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusRequest {
    pub order_ids: Vec<Uuid>,
    pub status: String,
    pub reason: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/orders/bulk-status", post(bulk_update_status))
        .route("/v1/admin/orders/{id}", get(get_order_detail))
        .route("/v1/admin/orders/{id}/status", put(update_status))
        .route("/v1/admin/orders/{id}/reassign", post(reassign_order))
        .route("/v1/admin/orders/{id}/cancel", post(cancel_order))
}

/// GET /v1/admin/orders/{id}
pub async fn get_order_detail(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderDetail>, AppError> {
    actor.require(ActorRole::Admin)?;
    Ok(Json(state.orders.get_order_detail(order_id).await?))
}

/// PUT /v1/admin/orders/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderDetail>, AppError> {
    let admin_id = actor.require(ActorRole::Admin)?;
    let to: OrderStatus = req
        .status
        .parse()
        .map_err(|e: hearth_core::status::UnknownStatus| AppError::ValidationError(e.to_string()))?;
    let detail = state
        .orders
        .update_status(admin_id, order_id, to, req.reason, req.notes)
        .await?;
    Ok(Json(detail))
}

/// POST /v1/admin/orders/{id}/reassign
pub async fn reassign_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ReassignRequest>,
) -> Result<Json<OrderDetail>, AppError> {
    let admin_id = actor.require(ActorRole::Admin)?;
    let detail = state
        .orders
        .reassign_order(admin_id, order_id, req.provider_id, req.reason)
        .await?;
    Ok(Json(detail))
}

/// POST /v1/admin/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
    body: Option<Json<AdminCancelRequest>>,
) -> Result<Json<OrderDetail>, AppError> {
    let admin_id = actor.require(ActorRole::Admin)?;
    let Json(req) = body.unwrap_or_default();
    let detail = state
        .orders
        .admin_cancel(admin_id, order_id, req.reason, req.refund_amount)
        .await?;
    Ok(Json(detail))
}

/// POST /v1/admin/orders/bulk-status
pub async fn bulk_update_status(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(req): Json<BulkStatusRequest>,
) -> Result<Json<BulkUpdateResult>, AppError> {
    let admin_id = actor.require(ActorRole::Admin)?;
    let result = state
        .orders
        .bulk_update_status(admin_id, &req.order_ids, &req.status, req.reason)
        .await?;
    Ok(Json(result))
}
