use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};

use crate::{subscriptions::api, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/billing/plans", get(api::list_plans))
        .route("/api/billing/customers", post(api::ensure_customer))
        .route(
            "/api/billing/checkout-sessions",
            post(api::create_checkout_session),
        )
        .route(
            "/api/billing/checkout-sessions/:id",
            get(api::get_checkout_session),
        )
        .route(
            "/api/billing/portal-sessions",
            post(api::create_portal_session),
        )
        .route(
            "/api/billing/subscription",
            get(api::get_subscription).patch(api::change_plan),
        )
        .route(
            "/api/billing/subscription/reconcile",
            post(api::reconcile_subscription),
        )
        .route(
            "/api/billing/subscription/cancel",
            post(api::cancel_subscription),
        )
        .route(
            "/api/billing/entitlements/check",
            post(api::check_entitlement),
        )
        .route("/api/billing/webhook", post(webhooks::provider_webhook))
        .layer(middleware::from_fn(cors))
}

/// Echoes the request origin with credentials allowed, the contract the SPA
/// front-end relies on. Preflights short-circuit before any handler runs.
async fn cors(req: Request<Body>, next: Next<Body>) -> Response {
    let origin = req.headers().get(header::ORIGIN).cloned();
    let is_preflight = req.method() == Method::OPTIONS;

    let mut response = if is_preflight {
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Default::default())
            .expect("static preflight response")
    } else {
        next.run(req).await
    };

    if let Some(origin) = origin {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PATCH, DELETE, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization, Stripe-Signature"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    response
}
