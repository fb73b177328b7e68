use serde::{Deserialize, Serialize};

/// Provider-reported subscription lifecycle states. The set is closed; the
/// provider is authoritative and this service never invents a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Unpaid,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Unpaid => "unpaid",
        }
    }

    /// Statuses that keep a subscription selectable as the user's current one.
    pub fn is_active_equivalent(self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
    }

    /// Selection priority when a customer holds several subscriptions:
    /// active beats trialing beats past_due; everything else is unselectable.
    pub fn selection_priority(self) -> u8 {
        match self {
            SubscriptionStatus::Active => 3,
            SubscriptionStatus::Trialing => 2,
            SubscriptionStatus::PastDue => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
    pub product: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub price: Price,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItems {
    #[serde(default)]
    pub data: Vec<LineItem>,
}

/// The slice of a provider subscription object this service consumes.
/// Timestamps are provider epoch seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: String,
    pub status: SubscriptionStatus,
    pub current_period_start: i64,
    pub current_period_end: i64,
    pub start_date: i64,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub items: LineItems,
}

impl ProviderSubscription {
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionList {
    #[serde(default)]
    pub data: Vec<ProviderSubscription>,
}

/// Checkout sessions are ephemeral; only the redirect handle is interesting.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
}
