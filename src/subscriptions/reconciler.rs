use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::catalog::{BillingCycle, PlanId, CATALOG};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::stripe::{
    CheckoutSession, PortalSession, ProviderSubscription, StripeClient, WebhookEvent,
};

use super::models::SubscriptionRecord;
use super::service::SubscriptionService;

/// Orchestrates customer provisioning, checkout, and the merge of provider
/// subscription state into the local projection. Stateless per user beyond
/// the per-user mutex map guarding customer creation.
pub struct Reconciler {
    client: StripeClient,
    service: SubscriptionService,
    customer_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Reconciler {
    pub fn new(client: StripeClient, pool: PgPool) -> Self {
        Self {
            client,
            service: SubscriptionService::new(pool),
            customer_locks: DashMap::new(),
        }
    }

    pub fn client(&self) -> &StripeClient {
        &self.client
    }

    pub fn service(&self) -> &SubscriptionService {
        &self.service
    }

    fn lock_for(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.customer_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns the persisted provider customer id, creating one on first
    /// need. Serialized per user in-process; the unique constraint on
    /// `profiles.user_id` covers concurrent processes, with the loser
    /// adopting the winner's id.
    pub async fn ensure_customer(&self, user: &AuthUser) -> AppResult<String> {
        let lock = self.lock_for(user.user_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.service.customer_id(user.user_id).await? {
            return Ok(existing);
        }

        let display_name = user.display_name();
        let created = self
            .client
            .create_customer(&user.email, &display_name, &user.user_id.to_string())
            .await?;
        let winner = self
            .service
            .claim_customer_id(user.user_id, &user.email, &display_name, &created.id)
            .await?;
        if winner != created.id {
            // Lost a cross-process race; the freshly created provider
            // customer is orphaned and the winner's id is used instead.
            tracing::warn!(
                user_id = %user.user_id,
                orphaned = %created.id,
                kept = %winner,
                "duplicate customer creation resolved by uniqueness constraint"
            );
        }
        Ok(winner)
    }

    /// Resolves the plan price, ensures a customer exists, and opens a
    /// provider checkout session. Completion is observed later through the
    /// webhook or a reconcile pass, never synchronously here.
    pub async fn start_checkout(
        &self,
        user: &AuthUser,
        plan: PlanId,
        cycle: BillingCycle,
        success_url: &str,
        cancel_url: &str,
    ) -> AppResult<CheckoutSession> {
        let price_id = CATALOG
            .price_id_for_plan(plan, cycle)
            .ok_or_else(|| AppError::InvalidPlan(plan.as_str().to_string()))?
            .to_string();

        let customer_id = self.ensure_customer(user).await?;
        let session = self
            .client
            .create_checkout_session(&customer_id, &price_id, success_url, cancel_url)
            .await?;
        if session.url.is_none() {
            return Err(AppError::ProviderError(
                "checkout session created without redirect url".into(),
            ));
        }
        Ok(session)
    }

    /// A portal session needs a billing customer, not a subscription; a user
    /// who never reached checkout has nothing to manage yet.
    pub async fn portal_session(&self, user: &AuthUser, return_url: &str) -> AppResult<PortalSession> {
        let customer_id = self
            .service
            .customer_id(user.user_id)
            .await?
            .ok_or_else(|| AppError::BadRequest("no billing customer for this user".into()))?;
        self.client.create_portal_session(&customer_id, return_url).await
    }

    /// Among provider-returned subscriptions, picks the current one with a
    /// deterministic tie-break instead of trusting provider order: status
    /// priority (active > trialing > past_due), then most recent period
    /// start, then id.
    fn pick_active(subscriptions: &[ProviderSubscription]) -> Option<&ProviderSubscription> {
        subscriptions
            .iter()
            .filter(|sub| sub.status.is_active_equivalent())
            .max_by_key(|sub| {
                (
                    sub.status.selection_priority(),
                    sub.current_period_start,
                    std::cmp::Reverse(sub.id.clone()),
                )
            })
    }

    /// Pulls authoritative state from the provider and merges it into the
    /// local record. Invoking this repeatedly with unchanged provider state
    /// converges: same plan, same status, only `updated_at` moves.
    pub async fn reconcile(&self, user_id: Uuid) -> AppResult<SubscriptionRecord> {
        let Some(customer_id) = self.service.customer_id(user_id).await? else {
            // Never checked out; the free default is the whole truth.
            return self.service.current_or_default(user_id).await;
        };

        let subscriptions = self.client.list_customer_subscriptions(&customer_id).await?;

        if let Some(active) = Self::pick_active(&subscriptions) {
            let plan = CATALOG.plan_for_price(active.price_id().unwrap_or_default());
            let record = self.service.upsert_from_provider(user_id, plan, active).await?;
            tracing::info!(
                %user_id,
                plan = plan.as_str(),
                status = %record.status,
                subscription = %active.id,
                "reconciled subscription from provider"
            );
            return Ok(record);
        }

        if let Some(stale) = self.service.latest_provider_record(user_id).await? {
            if let Some(provider_id) = stale.provider_subscription_id.as_deref() {
                let touched = self.service.mark_canceled(provider_id, Utc::now()).await?;
                if touched > 0 {
                    tracing::info!(
                        %user_id,
                        subscription = provider_id,
                        "provider no longer reports subscription; marked canceled"
                    );
                }
            }
        }

        self.service.current_or_default(user_id).await
    }

    /// Moves the current provider subscription onto a different plan's price.
    /// An update needing extra payment action surfaces as an incomplete
    /// status on the returned record, not a silent failure.
    pub async fn change_plan(
        &self,
        user_id: Uuid,
        plan: PlanId,
        cycle: BillingCycle,
    ) -> AppResult<SubscriptionRecord> {
        let price_id = CATALOG
            .price_id_for_plan(plan, cycle)
            .ok_or_else(|| AppError::InvalidPlan(plan.as_str().to_string()))?
            .to_string();

        let current = self
            .service
            .current_subscription(user_id)
            .await?
            .and_then(|record| record.provider_subscription_id)
            .ok_or(AppError::NoActiveSubscription)?;

        let updated = self.client.update_subscription(&current, &price_id).await?;
        let plan = CATALOG.plan_for_price(updated.price_id().unwrap_or_default());
        self.service.upsert_from_provider(user_id, plan, &updated).await
    }

    /// Cancels at period end. The local record mirrors whatever the provider
    /// reports back, typically still active with `cancel_at_period_end` set.
    pub async fn cancel(&self, user_id: Uuid) -> AppResult<SubscriptionRecord> {
        let current = self
            .service
            .current_subscription(user_id)
            .await?
            .and_then(|record| record.provider_subscription_id)
            .ok_or(AppError::NoActiveSubscription)?;

        let canceled = self.client.cancel_subscription(&current).await?;
        let plan = CATALOG.plan_for_price(canceled.price_id().unwrap_or_default());
        let record = self.service.upsert_from_provider(user_id, plan, &canceled).await?;
        tracing::info!(
            %user_id,
            subscription = %canceled.id,
            "subscription flagged to cancel at period end"
        );
        Ok(record)
    }

    /// Applies a verified webhook event. A missing local counterpart is a
    /// logged no-op, never an error; the provider expects acknowledgement.
    pub async fn apply_event(&self, event: WebhookEvent) -> AppResult<()> {
        match event {
            WebhookEvent::CheckoutSessionCompleted(session) => {
                let Some(subscription_id) = session.subscription else {
                    tracing::debug!(session = %session.id, "completed session without subscription");
                    return Ok(());
                };
                let subscription = self.client.get_subscription(&subscription_id).await?;
                self.upsert_for_customer(&subscription).await
            }
            WebhookEvent::SubscriptionCreated(subscription)
            | WebhookEvent::SubscriptionUpdated(subscription) => {
                self.upsert_for_customer(&subscription).await
            }
            WebhookEvent::SubscriptionDeleted(subscription) => {
                let touched = self.service.mark_canceled(&subscription.id, Utc::now()).await?;
                if touched == 0 {
                    tracing::debug!(
                        subscription = %subscription.id,
                        "deletion event for unknown subscription ignored"
                    );
                }
                Ok(())
            }
            WebhookEvent::InvoicePaymentSucceeded(invoice) => {
                let Some(subscription_id) = invoice.subscription else {
                    return Ok(());
                };
                let subscription = self.client.get_subscription(&subscription_id).await?;
                self.upsert_for_customer(&subscription).await
            }
            WebhookEvent::InvoicePaymentFailed(invoice) => {
                if let Some(subscription_id) = invoice.subscription {
                    let touched = self.service.mark_past_due(&subscription_id).await?;
                    if touched == 0 {
                        tracing::debug!(
                            subscription = %subscription_id,
                            "payment failure for unknown subscription ignored"
                        );
                    }
                }
                Ok(())
            }
            WebhookEvent::Unrecognized(event_type) => {
                tracing::debug!(%event_type, "unrecognized webhook event acknowledged");
                Ok(())
            }
        }
    }

    async fn upsert_for_customer(&self, subscription: &ProviderSubscription) -> AppResult<()> {
        let Some(user_id) = self.service.user_for_customer(&subscription.customer).await? else {
            tracing::warn!(
                customer = %subscription.customer,
                subscription = %subscription.id,
                "webhook for customer with no local profile ignored"
            );
            return Ok(());
        };
        let plan = CATALOG.plan_for_price(subscription.price_id().unwrap_or_default());
        self.service
            .upsert_from_provider(user_id, plan, subscription)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stripe::types::{LineItems, SubscriptionStatus};

    fn sub(id: &str, status: SubscriptionStatus, period_start: i64) -> ProviderSubscription {
        ProviderSubscription {
            id: id.to_string(),
            customer: "cus_test".to_string(),
            status,
            current_period_start: period_start,
            current_period_end: period_start + 2_592_000,
            start_date: period_start,
            canceled_at: None,
            cancel_at_period_end: false,
            items: LineItems::default(),
        }
    }

    #[test]
    fn active_wins_over_past_due_regardless_of_order() {
        let subs = vec![
            sub("sub_past_due", SubscriptionStatus::PastDue, 2_000),
            sub("sub_active", SubscriptionStatus::Active, 1_000),
        ];
        let picked = Reconciler::pick_active(&subs).unwrap();
        assert_eq!(picked.id, "sub_active");
    }

    #[test]
    fn newer_period_start_breaks_status_ties() {
        let subs = vec![
            sub("sub_old", SubscriptionStatus::Active, 1_000),
            sub("sub_new", SubscriptionStatus::Active, 5_000),
        ];
        let picked = Reconciler::pick_active(&subs).unwrap();
        assert_eq!(picked.id, "sub_new");
    }

    #[test]
    fn terminal_statuses_are_never_selected() {
        let subs = vec![
            sub("sub_canceled", SubscriptionStatus::Canceled, 9_000),
            sub("sub_unpaid", SubscriptionStatus::Unpaid, 9_500),
            sub("sub_incomplete", SubscriptionStatus::Incomplete, 9_900),
        ];
        assert!(Reconciler::pick_active(&subs).is_none());
    }
}
