use billing_backend::catalog::{BillingCycle, PlanId};
use billing_backend::error::AppError;
use billing_backend::extractor::AuthUser;
use billing_backend::stripe::types::{LineItem, LineItems, Price};
use billing_backend::stripe::{ProviderSubscription, StripeClient, SubscriptionStatus, WebhookEvent};
use billing_backend::subscriptions::{Reconciler, SubscriptionService};
use httpmock::prelude::*;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn auth_user() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        email: "billing@example.com".to_string(),
    }
}

fn provider_sub(id: &str, status: SubscriptionStatus, price: &str) -> ProviderSubscription {
    ProviderSubscription {
        id: id.to_string(),
        customer: "cus_42".to_string(),
        status,
        current_period_start: 1_699_000_000,
        current_period_end: 1_701_592_000,
        start_date: 1_699_000_000,
        canceled_at: None,
        cancel_at_period_end: false,
        items: LineItems {
            data: vec![LineItem {
                id: "si_1".to_string(),
                price: Price {
                    id: price.to_string(),
                    product: Some("prod_1".to_string()),
                },
            }],
        },
    }
}

fn subscription_json(id: &str, status: &str, price: &str) -> serde_json::Value {
    json!({
        "id": id,
        "customer": "cus_42",
        "status": status,
        "current_period_start": 1_699_000_000_i64,
        "current_period_end": 1_701_592_000_i64,
        "start_date": 1_699_000_000_i64,
        "cancel_at_period_end": false,
        "items": {
            "data": [
                { "id": "si_1", "price": { "id": price, "product": "prod_1" } }
            ]
        }
    })
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn first_checkout_creates_the_customer_exactly_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let server = MockServer::start_async().await;
    let customers = server.mock(|when, then| {
        when.method(POST).path("/v1/customers");
        then.status(200).json_body(json!({
            "id": "cus_42",
            "email": "billing@example.com",
            "name": "billing"
        }));
    });
    let sessions = server.mock(|when, then| {
        when.method(POST).path("/v1/checkout/sessions");
        then.status(200).json_body(json!({
            "id": "cs_1",
            "url": "https://checkout.example/cs_1"
        }));
    });

    let reconciler = Reconciler::new(StripeClient::new(server.base_url(), "sk_test"), pool.clone());
    let user = auth_user();

    let first = reconciler
        .start_checkout(
            &user,
            PlanId::Starter,
            BillingCycle::Monthly,
            "https://app.example/success",
            "https://app.example/pricing",
        )
        .await
        .unwrap();
    assert!(first.url.is_some());

    // Abandoning checkout and starting over must reuse the same customer.
    let second = reconciler
        .start_checkout(
            &user,
            PlanId::Starter,
            BillingCycle::Monthly,
            "https://app.example/success",
            "https://app.example/pricing",
        )
        .await
        .unwrap();
    assert!(second.url.is_some());

    customers.assert_hits(1);
    sessions.assert_hits(2);

    let stored: Option<String> =
        sqlx::query_scalar("SELECT stripe_customer_id FROM profiles WHERE user_id = $1")
            .bind(user.user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stored.as_deref(), Some("cus_42"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn checkout_for_the_free_tier_is_an_invalid_plan(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let reconciler = Reconciler::new(StripeClient::new("http://127.0.0.1:9", "sk_test"), pool);
    let err = reconciler
        .start_checkout(
            &auth_user(),
            PlanId::Free,
            BillingCycle::Monthly,
            "https://app.example/success",
            "https://app.example/pricing",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidPlan(_)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn reconcile_converges_on_unchanged_provider_state(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/v1/subscriptions");
        then.status(200).json_body(json!({
            "data": [
                subscription_json("sub_stale", "past_due", "price_starter_monthly"),
                subscription_json("sub_live", "active", "price_pro_monthly")
            ]
        }));
    });

    let reconciler = Reconciler::new(StripeClient::new(server.base_url(), "sk_test"), pool.clone());
    let user = auth_user();
    let service = SubscriptionService::new(pool.clone());
    service
        .claim_customer_id(user.user_id, &user.email, "billing", "cus_42")
        .await
        .unwrap();

    let first = reconciler.reconcile(user.user_id).await.unwrap();
    assert_eq!(first.plan(), PlanId::Pro);
    assert_eq!(first.status, "active");
    assert_eq!(first.provider_subscription_id.as_deref(), Some("sub_live"));

    let second = reconciler.reconcile(user.user_id).await.unwrap();
    assert_eq!(second.id, first.id, "upsert must reuse the same row");
    assert_eq!(second.plan(), first.plan());
    assert_eq!(second.status, first.status);
    assert!(second.updated_at >= first.updated_at);

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM subscriptions WHERE user_id = $1 AND provider_subscription_id IS NOT NULL",
    )
    .bind(user.user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(rows, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn reconcile_cancels_a_subscription_the_provider_no_longer_reports(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/v1/subscriptions");
        then.status(200).json_body(json!({ "data": [] }));
    });

    let reconciler = Reconciler::new(StripeClient::new(server.base_url(), "sk_test"), pool.clone());
    let user = auth_user();
    let service = SubscriptionService::new(pool.clone());
    service
        .claim_customer_id(user.user_id, &user.email, "billing", "cus_42")
        .await
        .unwrap();
    service
        .upsert_from_provider(
            user.user_id,
            PlanId::Pro,
            &provider_sub("sub_gone", SubscriptionStatus::Active, "price_pro_monthly"),
        )
        .await
        .unwrap();

    let record = reconciler.reconcile(user.user_id).await.unwrap();
    // The user falls back to the synthesized free default.
    assert_eq!(record.plan(), PlanId::Free);
    assert!(record.provider_subscription_id.is_none());

    let (status, end_date): (String, Option<chrono::DateTime<chrono::Utc>>) = sqlx::query_as(
        "SELECT status, end_date FROM subscriptions WHERE provider_subscription_id = 'sub_gone'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "canceled");
    assert!(end_date.is_some(), "canceled record keeps its end date");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn repeated_reconcile_keeps_the_original_cancellation_date(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/v1/subscriptions");
        then.status(200).json_body(json!({ "data": [] }));
    });

    let reconciler = Reconciler::new(StripeClient::new(server.base_url(), "sk_test"), pool.clone());
    let user = auth_user();
    let service = SubscriptionService::new(pool.clone());
    service
        .claim_customer_id(user.user_id, &user.email, "billing", "cus_42")
        .await
        .unwrap();
    service
        .upsert_from_provider(
            user.user_id,
            PlanId::Pro,
            &provider_sub("sub_gone", SubscriptionStatus::Active, "price_pro_monthly"),
        )
        .await
        .unwrap();

    reconciler.reconcile(user.user_id).await.unwrap();
    let first: Option<chrono::DateTime<chrono::Utc>> = sqlx::query_scalar(
        "SELECT end_date FROM subscriptions WHERE provider_subscription_id = 'sub_gone'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    reconciler.reconcile(user.user_id).await.unwrap();
    let second: Option<chrono::DateTime<chrono::Utc>> = sqlx::query_scalar(
        "SELECT end_date FROM subscriptions WHERE provider_subscription_id = 'sub_gone'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert!(first.is_some());
    assert_eq!(second, first, "end_date must not move on later passes");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn webhook_redelivery_is_idempotent(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let reconciler = Reconciler::new(StripeClient::new("http://127.0.0.1:9", "sk_test"), pool.clone());
    let user = auth_user();
    let service = SubscriptionService::new(pool.clone());
    service
        .claim_customer_id(user.user_id, &user.email, "billing", "cus_42")
        .await
        .unwrap();

    let payload = provider_sub("sub_live", SubscriptionStatus::Active, "price_starter_monthly");
    reconciler
        .apply_event(WebhookEvent::SubscriptionUpdated(payload.clone()))
        .await
        .unwrap();
    let first: (Uuid, String, String) = sqlx::query_as(
        "SELECT id, plan_id, status FROM subscriptions WHERE provider_subscription_id = 'sub_live'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    reconciler
        .apply_event(WebhookEvent::SubscriptionUpdated(payload))
        .await
        .unwrap();
    let rows: Vec<(Uuid, String, String)> = sqlx::query_as(
        "SELECT id, plan_id, status FROM subscriptions WHERE provider_subscription_id = 'sub_live'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(rows.len(), 1, "re-delivery must not create a second row");
    assert_eq!(rows[0], first);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn deletion_event_for_unknown_subscription_is_a_noop(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let reconciler = Reconciler::new(StripeClient::new("http://127.0.0.1:9", "sk_test"), pool.clone());
    reconciler
        .apply_event(WebhookEvent::SubscriptionDeleted(provider_sub(
            "sub_never_seen",
            SubscriptionStatus::Canceled,
            "price_pro_monthly",
        )))
        .await
        .unwrap();

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn failed_payment_moves_a_known_subscription_to_past_due(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let reconciler = Reconciler::new(StripeClient::new("http://127.0.0.1:9", "sk_test"), pool.clone());
    let user = auth_user();
    let service = SubscriptionService::new(pool.clone());
    service
        .claim_customer_id(user.user_id, &user.email, "billing", "cus_42")
        .await
        .unwrap();
    service
        .upsert_from_provider(
            user.user_id,
            PlanId::Pro,
            &provider_sub("sub_live", SubscriptionStatus::Active, "price_pro_monthly"),
        )
        .await
        .unwrap();

    reconciler
        .apply_event(WebhookEvent::InvoicePaymentFailed(
            billing_backend::stripe::Invoice {
                id: "in_1".to_string(),
                customer: Some("cus_42".to_string()),
                subscription: Some("sub_live".to_string()),
            },
        ))
        .await
        .unwrap();

    let status: String = sqlx::query_scalar(
        "SELECT status FROM subscriptions WHERE provider_subscription_id = 'sub_live'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "past_due");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cancel_flags_period_end_without_forcing_canceled_status(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/subscriptions/sub_live")
            .body_contains("cancel_at_period_end=true");
        then.status(200).json_body({
            let mut body = subscription_json("sub_live", "active", "price_pro_monthly");
            body["cancel_at_period_end"] = json!(true);
            body
        });
    });

    let reconciler = Reconciler::new(StripeClient::new(server.base_url(), "sk_test"), pool.clone());
    let user = auth_user();
    let service = SubscriptionService::new(pool.clone());
    service
        .claim_customer_id(user.user_id, &user.email, "billing", "cus_42")
        .await
        .unwrap();
    service
        .upsert_from_provider(
            user.user_id,
            PlanId::Pro,
            &provider_sub("sub_live", SubscriptionStatus::Active, "price_pro_monthly"),
        )
        .await
        .unwrap();

    let record = reconciler.cancel(user.user_id).await.unwrap();
    assert!(record.cancel_at_period_end);
    // Provider still reports active until the period actually ends.
    assert_eq!(record.status, "active");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cancel_without_a_provider_subscription_fails(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let reconciler = Reconciler::new(StripeClient::new("http://127.0.0.1:9", "sk_test"), pool);
    let err = reconciler.cancel(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NoActiveSubscription));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn portal_without_a_customer_is_a_bad_request(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let reconciler = Reconciler::new(StripeClient::new("http://127.0.0.1:9", "sk_test"), pool);
    let err = reconciler
        .portal_session(&auth_user(), "https://app.example/account")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn free_default_record_is_created_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let service = SubscriptionService::new(pool.clone());
    let user_id = Uuid::new_v4();

    let first = service.current_or_default(user_id).await.unwrap();
    assert_eq!(first.plan(), PlanId::Free);
    assert!(first.provider_subscription_id.is_none());

    let second = service.current_or_default(user_id).await.unwrap();
    assert_eq!(second.id, first.id);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}
