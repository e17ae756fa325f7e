#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! streampass shared types
//!
//! Domain enums and database plumbing used by the billing engine,
//! the API server, and the background worker.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{CustomerStatus, DiscountType, PaymentStatus, SubscriptionStatus, Tier};
