//! Billing error taxonomy
//!
//! Validation / NotFound / Conflict / state errors are returned to the
//! caller with enough detail for a user-facing message. External failures
//! (email, gateway) are logged and never unwind the surrounding billing
//! state. Reconciliation failures are escalated, never retried inline.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed input, rejected before touching the store.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown customer/plan/payment/subscription/promotion.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation conflicts with existing state (coupon already redeemed,
    /// plan already active, duplicate code).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Payment was already approved, rejected, or cancelled. Approving
    /// twice is an error, not a second grant.
    #[error("already processed: {0}")]
    AlreadyProcessed(String),

    /// Operation is not legal in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The allocator exhausted its retry budget without finding a free
    /// payment code. The surrounding operation must abort: the code is the
    /// only reconciliation key for manual bank transfers.
    #[error("payment code allocation exhausted after {attempts} attempts")]
    CodeAllocationExhausted { attempts: u32 },

    /// Gateway or notification collaborator failure. Logged, not fatal to
    /// the primary state transition.
    #[error("external service error: {0}")]
    External(String),

    /// A succeeded payment has no matching entitlement. Surfaced to an
    /// operations alert rather than silently swallowed.
    #[error("reconciliation required: {0}")]
    Reconciliation(String),

    /// Webhook payload failed signature verification.
    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BillingError {
    /// Whether this error should be shown to the end user as-is.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            BillingError::Validation(_)
                | BillingError::NotFound(_)
                | BillingError::Conflict(_)
                | BillingError::AlreadyProcessed(_)
                | BillingError::InvalidState(_)
                | BillingError::CodeAllocationExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_exhaustion_is_reported_to_the_caller() {
        // Allocation exhaustion is a conflict the customer can act on by
        // retrying, not an opaque internal failure.
        let err = BillingError::CodeAllocationExhausted { attempts: 5 };
        assert!(err.is_user_facing());
        assert!(err.to_string().contains("5 attempts"));
    }

    #[test]
    fn infrastructure_errors_stay_internal() {
        assert!(!BillingError::Database(sqlx::Error::RowNotFound).is_user_facing());
        assert!(!BillingError::WebhookSignatureInvalid.is_user_facing());
        assert!(!BillingError::Reconciliation("orphaned payment".into()).is_user_facing());
    }
}
