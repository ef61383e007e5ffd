use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use hearth_core::ActorRole;
use hearth_order::{Order, RateRequest};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::CurrentActor;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RejectOfferRequest {
    pub reason: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/provider/orders/{id}/accept", post(accept_order))
        .route("/v1/provider/orders/{id}/reject", post(reject_order))
        .route("/v1/provider/orders/{id}/start", post(start_order))
        .route("/v1/provider/orders/{id}/complete", post(complete_order))
        .route("/v1/provider/orders/{id}/rate-customer", post(rate_customer))
}

/// POST /v1/provider/orders/{id}/accept
/// Takes the live offer, or an order an admin assigned to the caller.
/// 409 when the offer expired or was already answered.
pub async fn accept_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let provider_id = actor.require(ActorRole::Provider)?;
    Ok(Json(state.orders.accept_order(provider_id, order_id).await?))
}

/// POST /v1/provider/orders/{id}/reject
pub async fn reject_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
    body: Option<Json<RejectOfferRequest>>,
) -> Result<StatusCode, AppError> {
    let provider_id = actor.require(ActorRole::Provider)?;
    let Json(body) = body.unwrap_or_default();
    state.orders.reject_order(provider_id, order_id, body.reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/provider/orders/{id}/start
pub async fn start_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let provider_id = actor.require(ActorRole::Provider)?;
    Ok(Json(state.orders.start_order(provider_id, order_id).await?))
}

/// POST /v1/provider/orders/{id}/complete
pub async fn complete_order(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let provider_id = actor.require(ActorRole::Provider)?;
    Ok(Json(state.orders.complete_order(provider_id, order_id).await?))
}

/// POST /v1/provider/orders/{id}/rate-customer
pub async fn rate_customer(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(order_id): Path<Uuid>,
    Json(req): Json<RateRequest>,
) -> Result<Json<Order>, AppError> {
    let provider_id = actor.require(ActorRole::Provider)?;
    Ok(Json(state.orders.rate_customer(provider_id, order_id, req).await?))
}
