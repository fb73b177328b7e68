use once_cell::sync::Lazy;

/// Secret used to verify JWTs issued by the hosted auth service. Must be set
/// via the `SUPABASE_JWT_SECRET` env variable.
pub static SUPABASE_JWT_SECRET: Lazy<String> = Lazy::new(|| {
    std::env::var("SUPABASE_JWT_SECRET").expect("SUPABASE_JWT_SECRET must be set")
});

/// Stripe secret API key. Must be set via `STRIPE_SECRET_KEY`.
pub static STRIPE_SECRET_KEY: Lazy<String> =
    Lazy::new(|| std::env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set"));

/// Stripe webhook signing secret. Must be set via `STRIPE_WEBHOOK_SECRET`.
pub static STRIPE_WEBHOOK_SECRET: Lazy<String> = Lazy::new(|| {
    std::env::var("STRIPE_WEBHOOK_SECRET").expect("STRIPE_WEBHOOK_SECRET must be set")
});

/// Base URL for the Stripe REST API. Overridable so tests can point the
/// client at a local mock server.
pub static STRIPE_API_BASE: Lazy<String> = Lazy::new(|| {
    std::env::var("STRIPE_API_BASE")
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "https://api.stripe.com".to_string())
});

/// Per-call timeout for provider requests, in seconds. Defaults to `10`.
pub static PROVIDER_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PROVIDER_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10)
});

/// Maximum age (seconds) accepted for a webhook signature timestamp.
pub static WEBHOOK_TOLERANCE_SECS: Lazy<i64> = Lazy::new(|| {
    std::env::var("WEBHOOK_TOLERANCE_SECS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(300)
});

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even
/// if database migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

pub(crate) fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
