//! Cross-module edge case tests
//!
//! Pure-logic scenarios spanning more than one module. Database-backed
//! behavior (state machine claims, redemption races, webhook replay) is
//! covered by the per-module tests plus the unique constraints in the
//! schema; these tests pin down the arithmetic and classification rules
//! the services compose.

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::payments::PurchaseIntent;
use crate::promotions::compute_discount;
use crate::proration::{plan_switch_quote, remaining_value};
use crate::subscriptions::add_months;
use streampass_shared::{DiscountType, Tier};

fn dt(epoch_days: i64) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::days(epoch_days)
}

// --- coupon pricing composed with payment creation ---

#[test]
fn full_discount_coupon_produces_zero_payable() {
    // 100% off is a legal payment of 0 VND, not an error
    let discount = compute_discount(DiscountType::Percent, 100, 299_000);
    assert_eq!(299_000 - discount, 0);
}

#[test]
fn fixed_coupon_larger_than_price_clamps_to_free() {
    let discount = compute_discount(DiscountType::FixedAmount, 1_000_000, 149_000);
    assert_eq!(149_000 - discount, 0);
}

#[test]
fn discount_applies_to_catalog_price_not_prorated_credit() {
    // A coupon on a fresh purchase discounts the catalog price. Upgrade
    // quotes subtract credit from the catalog price separately; the two
    // never stack in one payment.
    let price = 300_000;
    let discounted = price - compute_discount(DiscountType::Percent, 20, price);
    assert_eq!(discounted, 240_000);

    let quote = plan_switch_quote(Some((dt(0), dt(30), 300_000)), price, dt(10));
    assert_eq!(quote.amount_to_pay_vnd, 100_000);
}

// --- plan switch classification ---

#[test]
fn equal_value_switch_is_a_downgrade() {
    // amount_to_pay == 0 must route to the refund queue, not create a
    // zero-amount payment
    let quote = plan_switch_quote(Some((dt(0), dt(30), 200_000)), 200_000, dt(0));
    assert_eq!(quote.amount_to_pay_vnd, 0);
    assert!(!quote.is_upgrade);
}

#[test]
fn switch_on_last_day_pays_nearly_full_price() {
    let quote = plan_switch_quote(Some((dt(0), dt(30), 300_000)), 500_000, dt(29));
    assert_eq!(quote.remaining_value_vnd, 10_000);
    assert_eq!(quote.amount_to_pay_vnd, 490_000);
    assert!(quote.is_upgrade);
}

#[test]
fn switch_after_expiry_gets_no_credit() {
    let quote = plan_switch_quote(Some((dt(0), dt(30), 300_000)), 150_000, dt(31));
    assert_eq!(quote.remaining_value_vnd, 0);
    assert_eq!(quote.amount_to_pay_vnd, 150_000);
    assert!(quote.is_upgrade);
}

#[test]
fn cheaper_plan_early_in_period_is_always_a_downgrade() {
    for day in 0..15 {
        let quote = plan_switch_quote(Some((dt(0), dt(30), 300_000)), 100_000, dt(day));
        assert!(
            !quote.is_upgrade,
            "day {day}: {} should be a downgrade",
            quote.amount_to_pay_vnd
        );
    }
}

// --- tier ordering vs price ordering ---

#[test]
fn upgrade_classification_follows_price_not_tier_rank() {
    // A long-duration basic plan can cost more than a short pro plan.
    // The engine classifies by money owed, tier rank is display only.
    assert!(Tier::Basic.rank() < Tier::Pro.rank());

    let yearly_basic_remaining = remaining_value(dt(0), dt(365), 1_200_000, dt(10));
    let monthly_pro_price = 250_000;
    let quote = plan_switch_quote(
        Some((dt(0), dt(365), 1_200_000)),
        monthly_pro_price,
        dt(10),
    );
    assert!(yearly_basic_remaining > monthly_pro_price);
    assert!(!quote.is_upgrade);
}

// --- calendar arithmetic at period boundaries ---

#[test]
fn year_subscription_starting_feb_29_ends_feb_28() {
    let leap_start = time::macros::datetime!(2024-02-29 12:00 UTC);
    assert_eq!(
        add_months(leap_start, 12),
        time::macros::datetime!(2025-02-28 12:00 UTC)
    );
}

#[test]
fn month_end_clamp_does_not_drift_backwards_forever() {
    // Oct 31 -> Nov 30 -> Dec 30: the clamp applies per step against the
    // stored end date, it does not re-anchor to the original day 31.
    let oct31 = time::macros::datetime!(2025-10-31 00:00 UTC);
    let nov = add_months(oct31, 1);
    assert_eq!(nov, time::macros::datetime!(2025-11-30 00:00 UTC));
    assert_eq!(
        add_months(nov, 1),
        time::macros::datetime!(2025-12-30 00:00 UTC)
    );
}

// --- intent snapshots survive catalog drift ---

#[test]
fn approval_uses_intent_snapshot_fields() {
    // The intent carries everything approval needs; a repriced or
    // retiered catalog row cannot change what was bought.
    let plan_id = Uuid::new_v4();
    let json = serde_json::json!({
        "kind": "plan_purchase",
        "plan_id": plan_id,
        "tier": "plus",
        "duration_months": 6,
    });
    let intent: PurchaseIntent = serde_json::from_value(json).unwrap();
    assert_eq!(intent.plan_id(), plan_id);
    assert_eq!(intent.tier(), "plus");
    assert_eq!(intent.duration_months(), 6);
    assert!(intent.tier().parse::<Tier>().is_ok());
}

#[test]
fn intent_with_retired_tier_name_fails_typed_parse() {
    // Guards approval against intents written before a tier rename.
    let json = serde_json::json!({
        "kind": "plan_purchase",
        "plan_id": Uuid::nil(),
        "tier": "platinum",
        "duration_months": 1,
    });
    let intent: PurchaseIntent = serde_json::from_value(json).unwrap();
    assert!(intent.tier().parse::<Tier>().is_err());
}

// --- proration determinism ---

#[test]
fn quote_is_deterministic_for_fixed_inputs() {
    let a = plan_switch_quote(Some((dt(0), dt(30), 300_000)), 250_000, dt(10));
    let b = plan_switch_quote(Some((dt(0), dt(30), 300_000)), 250_000, dt(10));
    assert_eq!(a.remaining_value_vnd, b.remaining_value_vnd);
    assert_eq!(a.amount_to_pay_vnd, b.amount_to_pay_vnd);
}

#[test]
fn sub_day_precision_does_not_change_whole_day_credit() {
    // Credit is computed on whole days; hours within the same day give
    // the same quote.
    let morning = dt(10) + Duration::hours(3);
    let evening = dt(10) + Duration::hours(21);
    assert_eq!(
        remaining_value(dt(0), dt(30), 300_000, morning),
        remaining_value(dt(0), dt(30), 300_000, evening)
    );
}
