use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use hearth_api::wiring::{Collaborators, Platform, PlatformSettings};
use hearth_api::{app, AppState};
use hearth_catalog::{MemoryCatalog, ServiceDefinition};
use hearth_core::{GeoPoint, MemoryProviderDirectory, ProviderProfile};
use hearth_shared::events::OfferExtendedEvent;
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;
use uuid::Uuid;

/// One qualified provider is listed, so new orders sit in
/// `searching_provider` with a live offer instead of failing dispatch.
struct TestApp {
    router: Router,
    provider: ProviderProfile,
    offers: broadcast::Receiver<OfferExtendedEvent>,
    service_id: Uuid,
}

impl TestApp {
    fn start() -> Self {
        let service = ServiceDefinition {
            id: Uuid::new_v4(),
            title: "Deep Cleaning".to_string(),
            category_slug: "cleaning".to_string(),
            base_price: dec!(45.00),
            base_duration_minutes: 120,
            is_active: true,
            options: vec![],
        };
        let providers = Arc::new(MemoryProviderDirectory::new());
        let collaborators = Collaborators {
            catalog: Arc::new(MemoryCatalog::new().with_service(service.clone())),
            providers: providers.clone(),
            ..Collaborators::in_memory()
        };

        let platform = Platform::assemble(collaborators, PlatformSettings::default());
        let offers = platform.engine.subscribe_offers();
        let (orders, _worker) = platform.start_dispatch();

        Self {
            router: app(AppState::new(orders)),
            provider: providers.add(GeoPoint::new(31.521, 74.359), &[service.id]),
            offers,
            service_id: service.id,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        actor: Option<(Uuid, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = actor {
            req = req.header("x-actor-id", id.to_string()).header("x-actor-role", role);
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn place_order(&self, customer: Uuid) -> Value {
        let service_date = (Utc::now() + ChronoDuration::days(3))
            .date_naive()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            .and_utc()
            .to_rfc3339();
        let (status, body) = self
            .call(
                Method::POST,
                "/v1/orders",
                Some((customer, "customer")),
                Some(json!({
                    "address": "221B Baker Street",
                    "latitude": 31.5204,
                    "longitude": 74.3587,
                    "service_date": service_date,
                    "items": [{ "service_id": self.service_id }],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body
    }

    async fn next_offer(&mut self) -> OfferExtendedEvent {
        tokio::time::timeout(Duration::from_secs(5), self.offers.recv())
            .await
            .expect("no offer extended")
            .unwrap()
    }
}

fn id_of(order: &Value) -> String {
    order["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_requests_without_actor_are_unauthorized() {
    let app = TestApp::start();
    let (status, body) = app
        .call(Method::GET, &format!("/v1/orders/{}", Uuid::new_v4()), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_order_lifecycle_over_http() {
    let mut app = TestApp::start();
    let provider = app.provider.clone();
    let customer = Uuid::new_v4();
    let admin = Uuid::new_v4();

    let order = app.place_order(customer).await;
    assert_eq!(order["status"], "searching_provider");
    assert!(order["code"].as_str().unwrap().starts_with("HS-"));
    let id = id_of(&order);

    let offer = app.next_offer().await;
    assert_eq!(offer.provider_id, provider.id);

    let as_provider = Some((provider.id, "provider"));
    let (status, accepted) = app
        .call(Method::POST, &format!("/v1/provider/orders/{}/accept", id), as_provider, None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", accepted);
    assert_eq!(accepted["status"], "accepted");

    let (status, again) = app
        .call(Method::POST, &format!("/v1/provider/orders/{}/accept", id), as_provider, None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", again);

    let (status, started) = app
        .call(Method::POST, &format!("/v1/provider/orders/{}/start", id), as_provider, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "in_progress");

    let (status, completed) = app
        .call(Method::POST, &format!("/v1/provider/orders/{}/complete", id), as_provider, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["status"], "completed");
    assert_eq!(completed["payment_status"], "completed");

    let (status, detail) = app
        .call(Method::GET, &format!("/v1/admin/orders/{}", id), Some((admin, "admin")), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let to: Vec<&str> = detail["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["to_status"].as_str().unwrap())
        .collect();
    assert_eq!(
        to,
        ["searching_provider", "assigned", "accepted", "in_progress", "completed"]
    );

    let as_customer = Some((customer, "customer"));
    let rating = json!({ "rating": 5, "review": "Spotless kitchen" });
    let (status, rated) = app
        .call(Method::POST, &format!("/v1/orders/{}/rating", id), as_customer, Some(rating.clone()))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", rated);
    assert_eq!(rated["customer_rating"]["score"], 5);

    let (status, _) = app
        .call(Method::POST, &format!("/v1/orders/{}/rating", id), as_customer, Some(rating))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, rated) = app
        .call(
            Method::POST,
            &format!("/v1/provider/orders/{}/rate-customer", id),
            as_provider,
            Some(json!({ "rating": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", rated);
    assert_eq!(rated["provider_rating"]["score"], 4);
}

#[tokio::test]
async fn test_customer_cannot_read_someone_elses_order() {
    let app = TestApp::start();
    let order = app.place_order(Uuid::new_v4()).await;

    let (status, _) = app
        .call(
            Method::GET,
            &format!("/v1/orders/{}", id_of(&order)),
            Some((Uuid::new_v4(), "customer")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_customer_cancels_with_preview_fee() {
    let app = TestApp::start();
    let customer = Uuid::new_v4();
    let order = app.place_order(customer).await;
    let id = id_of(&order);

    let (status, preview) = app
        .call(
            Method::GET,
            &format!("/v1/orders/{}/cancellation-preview", id),
            Some((customer, "customer")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, cancelled) = app
        .call(
            Method::POST,
            &format!("/v1/orders/{}/cancel", id),
            Some((customer, "customer")),
            Some(json!({ "reason": "plans changed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", cancelled);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(
        cancelled["cancellation"]["cancellation_fee"],
        preview["cancellation_fee"]
    );
    assert_eq!(cancelled["cancellation"]["cancelled_by"], "customer");
}

#[tokio::test]
async fn test_admin_endpoints_validate_and_authorize() {
    let app = TestApp::start();
    let customer = Uuid::new_v4();
    let admin = Some((Uuid::new_v4(), "admin"));
    let order = app.place_order(customer).await;
    let id = id_of(&order);

    let (status, _) = app
        .call(Method::GET, &format!("/v1/admin/orders/{}", id), Some((customer, "customer")), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            Method::POST,
            "/v1/admin/orders/bulk-status",
            admin,
            Some(json!({ "order_ids": [id], "status": "teleported" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/v1/admin/orders/{}/status", id),
            admin,
            Some(json!({ "status": "in_progress" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, detail) = app
        .call(
            Method::POST,
            &format!("/v1/admin/orders/{}/cancel", id),
            admin,
            Some(json!({ "reason": "duplicate booking", "refund_amount": "0" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", detail);
    assert_eq!(detail["order"]["status"], "cancelled");
    assert_eq!(detail["order"]["cancellation"]["cancelled_by"], "admin");
    assert_eq!(
        detail["order"]["cancellation"]["cancellation_fee"],
        detail["order"]["total"]
    );

    let (status, _) = app
        .call(Method::POST, &format!("/v1/admin/orders/{}/cancel", id), admin, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_customer_cannot_use_provider_routes() {
    let app = TestApp::start();
    let customer = Uuid::new_v4();
    let order = app.place_order(customer).await;

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/v1/provider/orders/{}/accept", id_of(&order)),
            Some((customer, "customer")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
