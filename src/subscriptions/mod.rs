pub mod api;
pub mod models;
pub mod reconciler;
pub mod service;

pub use models::{Profile, SubscriptionRecord};
pub use reconciler::Reconciler;
pub use service::SubscriptionService;
