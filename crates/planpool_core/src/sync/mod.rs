//! Live change propagation between services and UI hosts.

pub mod plan_feed;

pub use plan_feed::{PlanChange, PlanFeed, Subscription};
