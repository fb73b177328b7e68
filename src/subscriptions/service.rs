use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::PlanId;
use crate::error::AppResult;
use crate::stripe::ProviderSubscription;

use super::models::SubscriptionRecord;

/// Persistence collaborator for subscription state. Every provider-driven
/// write path funnels through `upsert_from_provider`, keyed on the provider
/// subscription id, so webhook and interactive reconciliation converge no
/// matter which lands first.
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recently created record whose status still counts as current.
    pub async fn current_subscription(
        &self,
        user_id: Uuid,
    ) -> AppResult<Option<SubscriptionRecord>> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND status IN ('active', 'trialing', 'past_due')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Current record, creating the free-tier default when the user has no
    /// active-equivalent subscription at all.
    pub async fn current_or_default(&self, user_id: Uuid) -> AppResult<SubscriptionRecord> {
        if let Some(record) = self.current_subscription(user_id).await? {
            return Ok(record);
        }

        // Single-statement guard so two concurrent first reads insert at most
        // one default row under normal visibility.
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, user_id, plan_id, status, start_date)
            SELECT $1, $2, $3, 'active', NOW()
            WHERE NOT EXISTS (
                SELECT 1 FROM subscriptions
                WHERE user_id = $2 AND status IN ('active', 'trialing', 'past_due')
            )
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(PlanId::Free.as_str())
        .execute(&self.pool)
        .await?;

        let record = self
            .current_subscription(user_id)
            .await?
            .ok_or(crate::error::AppError::NotFound)?;
        Ok(record)
    }

    /// Most recent record that carries a provider subscription id, regardless
    /// of status. Used to detect subscriptions that vanished provider-side.
    pub async fn latest_provider_record(
        &self,
        user_id: Uuid,
    ) -> AppResult<Option<SubscriptionRecord>> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND provider_subscription_id IS NOT NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Idempotent merge of provider-reported state. Applying the same
    /// provider payload twice changes nothing but `updated_at`.
    pub async fn upsert_from_provider(
        &self,
        user_id: Uuid,
        plan: PlanId,
        subscription: &ProviderSubscription,
    ) -> AppResult<SubscriptionRecord> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            INSERT INTO subscriptions (
                id,
                user_id,
                plan_id,
                status,
                start_date,
                current_period_start,
                current_period_end,
                cancel_at_period_end,
                canceled_at,
                provider_subscription_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_subscription_id) WHERE provider_subscription_id IS NOT NULL
            DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                status = EXCLUDED.status,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                canceled_at = EXCLUDED.canceled_at,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(plan.as_str())
        .bind(subscription.status.as_str())
        .bind(epoch_to_datetime(subscription.start_date))
        .bind(epoch_to_datetime(subscription.current_period_start))
        .bind(epoch_to_datetime(subscription.current_period_end))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.canceled_at.map(epoch_to_datetime))
        .bind(&subscription.id)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    /// Marks a provider-keyed record canceled. Already-canceled rows are left
    /// alone so `end_date` records the first cancellation and repeated
    /// reconcile passes converge. Returns the number of rows touched; 0 means
    /// nothing to cancel, which callers treat as a no-op rather than an error.
    pub async fn mark_canceled(
        &self,
        provider_subscription_id: &str,
        end_date: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', end_date = $2, updated_at = NOW()
            WHERE provider_subscription_id = $1
              AND status != 'canceled'
            "#,
        )
        .bind(provider_subscription_id)
        .bind(end_date)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Moves a provider-keyed record to past_due after a failed payment.
    /// The next provider event or reconcile pass is still authoritative.
    pub async fn mark_past_due(&self, provider_subscription_id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'past_due', updated_at = NOW()
            WHERE provider_subscription_id = $1
              AND status IN ('active', 'trialing', 'past_due')
            "#,
        )
        .bind(provider_subscription_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn customer_id(&self, user_id: Uuid) -> AppResult<Option<String>> {
        let id: Option<Option<String>> =
            sqlx::query_scalar("SELECT stripe_customer_id FROM profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.flatten())
    }

    /// Claims a freshly created provider customer id for the user. The unique
    /// constraint on `profiles.user_id` plus COALESCE means a concurrent
    /// loser keeps the winner's id; the returned value is always the id that
    /// actually stuck.
    pub async fn claim_customer_id(
        &self,
        user_id: Uuid,
        email: &str,
        display_name: &str,
        customer_id: &str,
    ) -> AppResult<String> {
        let winner: String = sqlx::query_scalar(
            r#"
            INSERT INTO profiles (user_id, email, display_name, stripe_customer_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id)
            DO UPDATE SET
                stripe_customer_id = COALESCE(profiles.stripe_customer_id, EXCLUDED.stripe_customer_id),
                updated_at = NOW()
            RETURNING stripe_customer_id
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(display_name)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(winner)
    }

    /// Maps a provider customer id back to the owning user, for webhook
    /// payloads that only carry the customer.
    pub async fn user_for_customer(&self, customer_id: &str) -> AppResult<Option<Uuid>> {
        let user_id: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM profiles WHERE stripe_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user_id)
    }
}

fn epoch_to_datetime(epoch_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch_secs, 0)
        .single()
        .unwrap_or_else(Utc::now)
}
