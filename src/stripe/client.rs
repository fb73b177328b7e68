use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config;
use crate::error::{AppError, AppResult};

use super::types::{
    CheckoutSession, PortalSession, ProviderSubscription, StripeCustomer, SubscriptionList,
};

/// Thin wrapper over the Stripe REST API. Constructed explicitly and passed
/// to whoever needs it; there is no process-global client.
pub struct StripeClient {
    base: String,
    secret_key: String,
    http: Client,
}

impl StripeClient {
    pub fn from_env() -> Self {
        Self::new(
            config::STRIPE_API_BASE.as_str(),
            config::STRIPE_SECRET_KEY.as_str(),
        )
    }

    pub fn new(base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            http: Client::builder()
                .timeout(Duration::from_secs(*config::PROVIDER_TIMEOUT_SECS))
                .build()
                .expect("client build"),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> AppResult<T> {
        let url = format!("{}/v1/{}", self.base, path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .query(query)
            .send()
            .await
            .map_err(AppError::from_provider_transport)?;
        Self::decode(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &[(String, String)]) -> AppResult<T> {
        let url = format!("{}/v1/{}", self.base, path);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(AppError::from_provider_transport)?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> AppResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "provider API call failed");
            return Err(AppError::ProviderError(format!("{status}: {body}")));
        }
        resp.json::<T>()
            .await
            .map_err(|err| AppError::ProviderError(format!("malformed response: {err}")))
    }

    /// Creates a provider-side customer record. There is no idempotency key
    /// here; callers must check for an already-persisted customer id first.
    pub async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &str,
    ) -> AppResult<StripeCustomer> {
        self.post(
            "customers",
            &[
                ("email".into(), email.to_string()),
                ("name".into(), name.to_string()),
                ("metadata[user_id]".into(), user_id.to_string()),
            ],
        )
        .await
    }

    pub async fn get_customer(&self, customer_id: &str) -> AppResult<StripeCustomer> {
        self.get(&format!("customers/{customer_id}"), &[]).await
    }

    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> AppResult<CheckoutSession> {
        self.post(
            "checkout/sessions",
            &[
                ("customer".into(), customer_id.to_string()),
                ("mode".into(), "subscription".to_string()),
                ("payment_method_types[0]".into(), "card".to_string()),
                ("line_items[0][price]".into(), price_id.to_string()),
                ("line_items[0][quantity]".into(), "1".to_string()),
                ("success_url".into(), success_url.to_string()),
                ("cancel_url".into(), cancel_url.to_string()),
            ],
        )
        .await
    }

    pub async fn get_checkout_session(&self, session_id: &str) -> AppResult<CheckoutSession> {
        self.get(&format!("checkout/sessions/{session_id}"), &[])
            .await
    }

    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> AppResult<PortalSession> {
        self.post(
            "billing_portal/sessions",
            &[
                ("customer".into(), customer_id.to_string()),
                ("return_url".into(), return_url.to_string()),
            ],
        )
        .await
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> AppResult<ProviderSubscription> {
        self.get(&format!("subscriptions/{subscription_id}"), &[])
            .await
    }

    pub async fn list_customer_subscriptions(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<ProviderSubscription>> {
        let list: SubscriptionList = self
            .get(
                "subscriptions",
                &[("customer", customer_id), ("status", "all")],
            )
            .await?;
        Ok(list.data)
    }

    /// Replaces the subscription's single line-item price. Prorations are
    /// created, and an update that needs further payment action comes back as
    /// an incomplete-payment subscription rather than failing silently.
    pub async fn update_subscription(
        &self,
        subscription_id: &str,
        new_price_id: &str,
    ) -> AppResult<ProviderSubscription> {
        let current = self.get_subscription(subscription_id).await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.clone())
            .ok_or_else(|| {
                AppError::ProviderError(format!("subscription {subscription_id} has no line items"))
            })?;

        self.post(
            &format!("subscriptions/{subscription_id}"),
            &[
                ("items[0][id]".into(), item_id),
                ("items[0][price]".into(), new_price_id.to_string()),
                ("proration_behavior".into(), "create_prorations".to_string()),
                ("payment_behavior".into(), "pending_if_incomplete".to_string()),
            ],
        )
        .await
    }

    /// Flags the subscription to end at the period boundary. The subscription
    /// stays active until the current billing period runs out.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> AppResult<ProviderSubscription> {
        self.post(
            &format!("subscriptions/{subscription_id}"),
            &[("cancel_at_period_end".into(), "true".to_string())],
        )
        .await
    }
}
