use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use hearth_core::ActorRole;
use hearth_order::{CancellationPreview, CreateOrderRequest, Order, RateRequest};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::CurrentActor;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/cancellation-preview", get(cancellation_preview))
        .route("/v1/orders/{id}/cancel", post(cancel_order))
        .route("/v1/orders/{id}/rating", post(rate_order))
}

/// POST /v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let customer_id = actor.require(ActorRole::Customer)?;
    let order = state.orders.create_order(customer_id, req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/orders/{id}
/// Customers see their own orders, providers the ones assigned to them.
pub async fn get_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get_order(actor.0, order_id).await?))
}

/// GET /v1/orders/{id}/cancellation-preview
pub async fn cancellation_preview(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<CancellationPreview>, AppError> {
    let customer_id = actor.require(ActorRole::Customer)?;
    Ok(Json(state.orders.cancellation_preview(customer_id, order_id).await?))
}

/// POST /v1/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
    body: Option<Json<CancelOrderRequest>>,
) -> Result<Json<Order>, AppError> {
    let customer_id = actor.require(ActorRole::Customer)?;
    let Json(body) = body.unwrap_or_default();
    Ok(Json(state.orders.cancel_order(customer_id, order_id, body.reason).await?))
}

/// POST /v1/orders/{id}/rating
/// Completed orders only, once per order.
pub async fn rate_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
    Json(req): Json<RateRequest>,
) -> Result<Json<Order>, AppError> {
    let customer_id = actor.require(ActorRole::Customer)?;
    Ok(Json(state.orders.rate_order(customer_id, order_id, req).await?))
}
