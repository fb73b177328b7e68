pub mod catalog;
pub mod config;
pub mod entitlements;
pub mod error;
pub mod extractor;
pub mod routes;
pub mod stripe;
pub mod subscriptions;
pub mod webhooks;
