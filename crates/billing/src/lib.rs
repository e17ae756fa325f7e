#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Billing and subscription lifecycle engine
//!
//! Manual bank-transfer billing for a VND-priced subscription catalog:
//! payment code allocation, the payment state machine, coupon validation
//! and redemption, proration for plan switches, entitlement lifecycle,
//! gateway webhooks, and the reconciliation and invariant audits that
//! keep the ledger honest.

pub mod codes;
pub mod email;
pub mod error;
pub mod events;
pub mod invariants;
pub mod payments;
pub mod promotions;
pub mod proration;
pub mod reconciliation;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

pub use codes::PaymentCodeAllocator;
pub use email::BillingEmailService;
pub use error::{BillingError, BillingResult};
pub use events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
pub use invariants::{InvariantChecker, InvariantReport};
pub use payments::{
    ApprovedPayment, CreatedPayment, PaymentLedger, PaymentView, PlanSwitchOutcome, PurchaseIntent,
};
pub use promotions::{PromotionOutcome, PromotionQuote, PromotionRejection, PromotionValidator};
pub use proration::{plan_switch_quote, remaining_value, PlanSwitchQuote};
pub use reconciliation::{ReconciliationSummary, ReconciliationSweep};
pub use subscriptions::{
    CancelMode, CancellationOutcome, CurrentEntitlement, ExpirySweepSummary,
    SubscriptionLifecycleManager,
};
pub use webhooks::{GatewayEvent, WebhookHandler};

use sqlx::PgPool;

/// Aggregate handle wiring every billing service to one pool and one
/// email client. The API and worker construct this once at startup.
pub struct BillingService {
    pub payments: PaymentLedger,
    pub subscriptions: SubscriptionLifecycleManager,
    pub promotions: PromotionValidator,
    pub reconciliation: ReconciliationSweep,
    pub invariants: InvariantChecker,
    pub webhooks: WebhookHandler,
    pub email: BillingEmailService,
}

impl BillingService {
    pub fn new(pool: PgPool, webhook_secret: String) -> Self {
        let email = BillingEmailService::from_env();
        Self {
            payments: PaymentLedger::new(pool.clone(), email.clone()),
            subscriptions: SubscriptionLifecycleManager::new(pool.clone(), email.clone()),
            promotions: PromotionValidator::new(pool.clone()),
            reconciliation: ReconciliationSweep::new(pool.clone(), email.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            webhooks: WebhookHandler::new(pool, webhook_secret, email.clone()),
            email,
        }
    }
}
