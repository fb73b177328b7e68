//! Pure entitlement checks over the plan catalog. These functions take the
//! caller's current plan as data; they never touch the database or the
//! provider.

use crate::catalog::{PlanId, CATALOG};

/// `current` is `None` when the user has no subscription record at all, in
/// which case only free-tier features are granted.
pub fn has_access(current: Option<PlanId>, required: PlanId) -> bool {
    match current {
        Some(plan) => plan.tier_rank() >= required.tier_rank(),
        None => required == PlanId::Free,
    }
}

/// Model access requires at least a subscription record, even a free one.
pub fn has_model_access(current: Option<PlanId>, model_id: &str) -> bool {
    let Some(plan) = current else {
        return false;
    };
    match CATALOG.min_plan_for_model(model_id) {
        Some(required) => has_access(Some(plan), required),
        None => false,
    }
}

/// Daily API-call allowance for a plan; `None` is unlimited.
pub fn api_call_limit(plan: PlanId) -> Option<i64> {
    CATALOG.plan(plan).api_calls_per_day
}

/// Storage allowance in bytes; `None` is unlimited.
pub fn storage_limit(plan: PlanId) -> Option<i64> {
    CATALOG.plan(plan).storage_limit_bytes
}

/// Human-readable storage size, used by the plans listing.
pub fn format_storage_size(bytes: i64) -> String {
    const KIB: f64 = 1024.0;
    let bytes = bytes as f64;
    if bytes >= KIB * KIB * KIB {
        format!("{:.0} GB", bytes / (KIB * KIB * KIB))
    } else if bytes >= KIB * KIB {
        format!("{:.0} MB", bytes / (KIB * KIB))
    } else if bytes >= KIB {
        format!("{:.0} KB", bytes / KIB)
    } else {
        format!("{bytes:.0} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_is_reflexive() {
        for plan in PlanId::ALL {
            assert!(has_access(Some(plan), plan));
        }
    }

    #[test]
    fn access_is_monotonic_in_tier_rank() {
        for a in PlanId::ALL {
            for b in PlanId::ALL {
                if a.tier_rank() >= b.tier_rank() {
                    assert!(has_access(Some(a), b), "{a:?} should grant {b:?}");
                } else {
                    assert!(!has_access(Some(a), b), "{a:?} must not grant {b:?}");
                }
            }
        }
    }

    #[test]
    fn no_subscription_grants_only_free() {
        assert!(has_access(None, PlanId::Free));
        assert!(!has_access(None, PlanId::Starter));
        assert!(!has_access(None, PlanId::Enterprise));
    }

    #[test]
    fn model_access_requires_a_record() {
        assert!(!has_model_access(None, "deepseek"));
        assert!(has_model_access(Some(PlanId::Free), "deepseek"));
        assert!(!has_model_access(Some(PlanId::Free), "gpt4"));
        assert!(has_model_access(Some(PlanId::Pro), "gpt4"));
        assert!(has_model_access(Some(PlanId::Enterprise), "dalle3"));
    }

    #[test]
    fn unknown_model_is_denied() {
        assert!(!has_model_access(Some(PlanId::Enterprise), "gpt7"));
    }

    #[test]
    fn storage_sizes_render_in_sensible_units() {
        assert_eq!(format_storage_size(512), "512 B");
        assert_eq!(format_storage_size(10 * 1024 * 1024), "10 MB");
        assert_eq!(format_storage_size(1024 * 1024 * 1024), "1 GB");
    }
}
