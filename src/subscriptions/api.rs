use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::catalog::{BillingCycle, PlanId, CATALOG};
use crate::entitlements;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::models::SubscriptionRecord;
use super::reconciler::Reconciler;
use super::service::SubscriptionService;

#[derive(Debug, Serialize)]
pub struct PlanEntry {
    pub id: PlanId,
    pub name: &'static str,
    pub description: &'static str,
    pub price_monthly_cents: i64,
    pub price_yearly_cents: i64,
    pub api_calls_per_day: Option<i64>,
    pub storage: Option<String>,
}

/// Public catalog listing; the storefront renders straight from this.
pub async fn list_plans() -> Json<Vec<PlanEntry>> {
    let plans = CATALOG
        .plans()
        .iter()
        .map(|plan| PlanEntry {
            id: plan.id,
            name: plan.name,
            description: plan.description,
            price_monthly_cents: plan.price_monthly_cents,
            price_yearly_cents: plan.price_yearly_cents,
            api_calls_per_day: plan.api_calls_per_day,
            storage: plan
                .storage_limit_bytes
                .map(entitlements::format_storage_size),
        })
        .collect();
    Json(plans)
}

#[derive(Debug, Serialize)]
pub struct CustomerResponse {
    pub customer_id: String,
}

pub async fn ensure_customer(
    Extension(reconciler): Extension<Arc<Reconciler>>,
    user: AuthUser,
) -> AppResult<Json<CustomerResponse>> {
    let customer_id = reconciler.ensure_customer(&user).await?;
    Ok(Json(CustomerResponse { customer_id }))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan_id: PlanId,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

pub async fn create_checkout_session(
    Extension(reconciler): Extension<Arc<Reconciler>>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<CheckoutResponse>> {
    let session = reconciler
        .start_checkout(
            &user,
            payload.plan_id,
            payload.billing_cycle,
            &payload.success_url,
            &payload.cancel_url,
        )
        .await?;
    let url = session
        .url
        .ok_or_else(|| AppError::ProviderError("checkout session without url".into()))?;
    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url,
    }))
}

#[derive(Debug, Serialize)]
pub struct CheckoutStatusResponse {
    pub session_id: String,
    pub status: Option<String>,
    pub subscription_id: Option<String>,
}

pub async fn get_checkout_session(
    Extension(reconciler): Extension<Arc<Reconciler>>,
    _user: AuthUser,
    Path(session_id): Path<String>,
) -> AppResult<Json<CheckoutStatusResponse>> {
    let session = reconciler.client().get_checkout_session(&session_id).await?;
    Ok(Json(CheckoutStatusResponse {
        session_id: session.id,
        status: session.status,
        subscription_id: session.subscription,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PortalRequest {
    pub return_url: String,
}

#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub url: String,
}

pub async fn create_portal_session(
    Extension(reconciler): Extension<Arc<Reconciler>>,
    user: AuthUser,
    Json(payload): Json<PortalRequest>,
) -> AppResult<Json<PortalResponse>> {
    let session = reconciler.portal_session(&user, &payload.return_url).await?;
    Ok(Json(PortalResponse { url: session.url }))
}

pub async fn get_subscription(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<SubscriptionRecord>> {
    let service = SubscriptionService::new(pool);
    let record = service.current_or_default(user.user_id).await?;
    Ok(Json(record))
}

pub async fn reconcile_subscription(
    Extension(reconciler): Extension<Arc<Reconciler>>,
    user: AuthUser,
) -> AppResult<Json<SubscriptionRecord>> {
    let record = reconciler.reconcile(user.user_id).await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_id: PlanId,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
}

pub async fn change_plan(
    Extension(reconciler): Extension<Arc<Reconciler>>,
    user: AuthUser,
    Json(payload): Json<ChangePlanRequest>,
) -> AppResult<Json<SubscriptionRecord>> {
    let record = reconciler
        .change_plan(user.user_id, payload.plan_id, payload.billing_cycle)
        .await?;
    Ok(Json(record))
}

pub async fn cancel_subscription(
    Extension(reconciler): Extension<Arc<Reconciler>>,
    user: AuthUser,
) -> AppResult<Json<SubscriptionRecord>> {
    let record = reconciler.cancel(user.user_id).await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct EntitlementCheckRequest {
    #[serde(default)]
    pub required_plan: Option<PlanId>,
    #[serde(default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EntitlementCheckResponse {
    pub allowed: bool,
    pub current_plan: Option<PlanId>,
}

/// Evaluates either a plan-tier requirement or a model-access requirement
/// against the caller's current subscription.
pub async fn check_entitlement(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<EntitlementCheckRequest>,
) -> AppResult<Json<EntitlementCheckResponse>> {
    let service = SubscriptionService::new(pool);
    let current = service
        .current_subscription(user.user_id)
        .await?
        .map(|record| record.plan());

    let allowed = match (payload.required_plan, payload.model_id) {
        (Some(required), None) => entitlements::has_access(current, required),
        (None, Some(model_id)) => entitlements::has_model_access(current, &model_id),
        _ => {
            return Err(AppError::BadRequest(
                "provide exactly one of required_plan or model_id".into(),
            ))
        }
    };

    Ok(Json(EntitlementCheckResponse {
        allowed,
        current_plan: current,
    }))
}
