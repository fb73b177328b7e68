use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::read_optional_env;

/// Closed set of subscription tiers. `tier_rank` ordering is what every
/// upgrade/downgrade and entitlement comparison runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl PlanId {
    pub const ALL: [PlanId; 4] = [PlanId::Free, PlanId::Starter, PlanId::Pro, PlanId::Enterprise];

    pub fn tier_rank(self) -> u8 {
        match self {
            PlanId::Free => 0,
            PlanId::Starter => 1,
            PlanId::Pro => 2,
            PlanId::Enterprise => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Starter => "starter",
            PlanId::Pro => "pro",
            PlanId::Enterprise => "enterprise",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PlanId::Free => "Free",
            PlanId::Starter => "Starter",
            PlanId::Pro => "Professional",
            PlanId::Enterprise => "Enterprise",
        }
    }

    /// Next tier up, or `None` at the top.
    pub fn next_plan(self) -> Option<PlanId> {
        match self {
            PlanId::Free => Some(PlanId::Starter),
            PlanId::Starter => Some(PlanId::Pro),
            PlanId::Pro => Some(PlanId::Enterprise),
            PlanId::Enterprise => None,
        }
    }

    /// Parse a stored plan identifier. Unknown identifiers resolve to the
    /// free tier so stale rows never break an entitlement check.
    pub fn from_str_lenient(raw: &str) -> PlanId {
        match raw {
            "starter" => PlanId::Starter,
            "pro" => PlanId::Pro,
            "enterprise" => PlanId::Enterprise,
            _ => PlanId::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl Default for BillingCycle {
    fn default() -> Self {
        BillingCycle::Monthly
    }
}

/// One catalog entry. Prices are integer cents; `None` limits are unlimited.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: &'static str,
    pub description: &'static str,
    pub price_monthly_cents: i64,
    pub price_yearly_cents: i64,
    pub api_calls_per_day: Option<i64>,
    pub storage_limit_bytes: Option<i64>,
}

#[derive(Debug)]
pub struct Catalog {
    plans: Vec<Plan>,
    // (plan, cycle, provider price id); the free tier has no provider price.
    prices: Vec<(PlanId, BillingCycle, String)>,
}

const GIB: i64 = 1024 * 1024 * 1024;

fn price_env(key: &str, default: &str) -> String {
    read_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Static plan catalog, loaded once at process start. Price identifiers come
/// from the Stripe dashboard and are injected through the environment.
pub static CATALOG: Lazy<Catalog> = Lazy::new(|| Catalog {
    plans: vec![
        Plan {
            id: PlanId::Free,
            name: PlanId::Free.name(),
            description: "Basic features for personal use",
            price_monthly_cents: 0,
            price_yearly_cents: 0,
            api_calls_per_day: Some(5),
            storage_limit_bytes: Some(GIB),
        },
        Plan {
            id: PlanId::Starter,
            name: PlanId::Starter.name(),
            description: "Enhanced features for small teams",
            price_monthly_cents: 999,
            price_yearly_cents: 9999,
            api_calls_per_day: Some(25),
            storage_limit_bytes: Some(10 * GIB),
        },
        Plan {
            id: PlanId::Pro,
            name: PlanId::Pro.name(),
            description: "Advanced features for businesses",
            price_monthly_cents: 1999,
            price_yearly_cents: 19999,
            api_calls_per_day: Some(100),
            storage_limit_bytes: Some(100 * GIB),
        },
        Plan {
            id: PlanId::Enterprise,
            name: PlanId::Enterprise.name(),
            description: "Complete access for large organizations",
            price_monthly_cents: 9999,
            price_yearly_cents: 99999,
            api_calls_per_day: None,
            storage_limit_bytes: None,
        },
    ],
    prices: vec![
        (
            PlanId::Starter,
            BillingCycle::Monthly,
            price_env("STRIPE_PRICE_STARTER", "price_starter_monthly"),
        ),
        (
            PlanId::Starter,
            BillingCycle::Yearly,
            price_env("STRIPE_PRICE_STARTER_YEARLY", "price_starter_yearly"),
        ),
        (
            PlanId::Pro,
            BillingCycle::Monthly,
            price_env("STRIPE_PRICE_PRO", "price_pro_monthly"),
        ),
        (
            PlanId::Pro,
            BillingCycle::Yearly,
            price_env("STRIPE_PRICE_PRO_YEARLY", "price_pro_yearly"),
        ),
        (
            PlanId::Enterprise,
            BillingCycle::Monthly,
            price_env("STRIPE_PRICE_ENTERPRISE", "price_enterprise_monthly"),
        ),
        (
            PlanId::Enterprise,
            BillingCycle::Yearly,
            price_env("STRIPE_PRICE_ENTERPRISE_YEARLY", "price_enterprise_yearly"),
        ),
    ],
});

impl Catalog {
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn plan(&self, id: PlanId) -> &Plan {
        self.plans
            .iter()
            .find(|plan| plan.id == id)
            .expect("catalog covers every PlanId")
    }

    /// Provider price id for a paid plan. The free tier carries no provider
    /// price, so asking for one is a plan error, not a lookup miss.
    pub fn price_id_for_plan(&self, plan: PlanId, cycle: BillingCycle) -> Option<&str> {
        self.prices
            .iter()
            .find(|(p, c, _)| *p == plan && *c == cycle)
            .map(|(_, _, price)| price.as_str())
    }

    /// Reverse lookup from a provider price id. Unrecognized prices fall back
    /// to the free tier; an unknown price must never break an entitlement
    /// check.
    pub fn plan_for_price(&self, price_id: &str) -> PlanId {
        self.prices
            .iter()
            .find(|(_, _, price)| price == price_id)
            .map(|(plan, _, _)| *plan)
            .unwrap_or(PlanId::Free)
    }

    /// Minimum plan required to use a given inference model.
    pub fn min_plan_for_model(&self, model_id: &str) -> Option<PlanId> {
        match model_id {
            "deepseek" => Some(PlanId::Free),
            "llama" | "stable-diffusion" => Some(PlanId::Starter),
            "whisper" | "gpt4" | "claude" => Some(PlanId::Pro),
            "dalle3" => Some(PlanId::Enterprise),
            _ => None,
        }
    }
}
