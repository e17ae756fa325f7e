//! Domain enums shared across crates
//!
//! All enums are stored as lowercase strings in Postgres and converted at
//! the query boundary with `as_str` / `FromStr`. Keep the string forms in
//! sync with the CHECK constraints in `migrations/0001_init.sql`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Service level granted by a valid subscription.
///
/// `Customer.tier` is a denormalized cache of the best active entitlement.
/// Only the subscription lifecycle manager may write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Plus,
    Pro,
    Max,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Plus => "plus",
            Tier::Pro => "pro",
            Tier::Max => "max",
        }
    }

    /// Ordering used to decide whether a plan switch is an upgrade.
    pub fn rank(&self) -> u8 {
        match self {
            Tier::Free => 0,
            Tier::Basic => 1,
            Tier::Plus => 2,
            Tier::Pro => 3,
            Tier::Max => 4,
        }
    }
}

impl FromStr for Tier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "plus" => Ok(Tier::Plus),
            "pro" => Ok(Tier::Pro),
            "max" => Ok(Tier::Max),
            other => Err(UnknownVariant::new("tier", other)),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment lifecycle states.
///
/// `Succeeded` is the only state allowed to trigger subscription creation,
/// and must do so at most once per payment. `Refunded` is reachable only
/// from `Succeeded`, by a manual admin action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Whether the payment can still be acted on by approval/rejection.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending)
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription lifecycle states.
///
/// `Cancelled` and `Expired` are terminal for a row; a renewal creates a
/// new row. `Expired` is only ever set by the daily sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// States that count toward the customer's entitlement.
    pub fn counts_as_entitled(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }
}

impl FromStr for SubscriptionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(UnknownVariant::new("subscription status", other)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Customer account states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
    Inactive,
    Suspended,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
            CustomerStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for CustomerStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CustomerStatus::Active),
            "inactive" => Ok(CustomerStatus::Inactive),
            "suspended" => Ok(CustomerStatus::Suspended),
            other => Err(UnknownVariant::new("customer status", other)),
        }
    }
}

/// Coupon discount kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percent,
    FixedAmount,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percent => "percent",
            DiscountType::FixedAmount => "fixed_amount",
        }
    }
}

impl FromStr for DiscountType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percent" => Ok(DiscountType::Percent),
            "fixed_amount" => Ok(DiscountType::FixedAmount),
            other => Err(UnknownVariant::new("discount type", other)),
        }
    }
}

/// Error for an unrecognized enum string coming out of the store.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_rank_ordering() {
        assert!(Tier::Free.rank() < Tier::Basic.rank());
        assert!(Tier::Basic.rank() < Tier::Plus.rank());
        assert!(Tier::Plus.rank() < Tier::Pro.rank());
        assert!(Tier::Pro.rank() < Tier::Max.rank());
    }

    #[test]
    fn tier_round_trips_through_str() {
        for tier in [Tier::Free, Tier::Basic, Tier::Plus, Tier::Pro, Tier::Max] {
            assert_eq!(tier.as_str().parse::<Tier>().ok(), Some(tier));
        }
    }

    #[test]
    fn payment_status_open_only_when_pending() {
        assert!(PaymentStatus::Pending.is_open());
        assert!(!PaymentStatus::Succeeded.is_open());
        assert!(!PaymentStatus::Cancelled.is_open());
        assert!(!PaymentStatus::Refunded.is_open());
    }

    #[test]
    fn entitled_states() {
        assert!(SubscriptionStatus::Active.counts_as_entitled());
        assert!(SubscriptionStatus::PastDue.counts_as_entitled());
        assert!(!SubscriptionStatus::Cancelled.counts_as_entitled());
        assert!(!SubscriptionStatus::Expired.counts_as_entitled());
    }

    #[test]
    fn unknown_variant_is_rejected() {
        assert!("platinum".parse::<Tier>().is_err());
        assert!("completed".parse::<PaymentStatus>().is_err());
    }
}
