use axum::{http::Method, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod auth;
pub mod error;
pub mod jobs;
pub mod orders;
pub mod state;
pub mod wiring;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(auth::ACTOR_ID_HEADER),
            axum::http::HeaderName::from_static(auth::ACTOR_ROLE_HEADER),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(orders::routes())
        .merge(jobs::routes())
        .merge(admin::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
