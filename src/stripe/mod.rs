pub mod client;
pub mod types;
pub mod webhook;

pub use client::StripeClient;
pub use types::{
    CheckoutSession, Invoice, PortalSession, ProviderSubscription, StripeCustomer,
    SubscriptionStatus,
};
pub use webhook::{sign_payload, verify_event, WebhookEvent};
