//! Proration arithmetic
//!
//! Pure, deterministic, no I/O. All amounts are whole VND; day counts are
//! whole-day differences and results round to the nearest dong.

use serde::Serialize;
use time::OffsetDateTime;

/// Quote for switching a customer from their current plan to a new one.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSwitchQuote {
    /// Unused value remaining in the current subscription period.
    pub remaining_value_vnd: i64,
    /// Catalog price of the target plan.
    pub new_plan_price_vnd: i64,
    /// `new_plan_price - remaining_value`. Positive = payable upgrade,
    /// non-positive = downgrade routed to the manual refund queue.
    pub amount_to_pay_vnd: i64,
    pub is_upgrade: bool,
    /// Whole days left in the current period, for display.
    pub days_remaining: i64,
}

/// Remaining value of a paid period at `now`.
///
/// Returns 0 once the period has ended, the full price before it starts,
/// and `round(price * days_remaining / days_total)` in between. A
/// zero-length period is worth 0.
pub fn remaining_value(
    start: OffsetDateTime,
    end: OffsetDateTime,
    original_price_vnd: i64,
    now: OffsetDateTime,
) -> i64 {
    if now >= end {
        return 0;
    }
    if now <= start {
        return original_price_vnd;
    }

    let days_total = (end - start).whole_days();
    if days_total <= 0 {
        return 0;
    }
    let days_remaining = (end - now).whole_days();

    // Round to nearest whole dong; i128 keeps the multiply overflow-free
    // for any realistic price.
    let scaled = original_price_vnd as i128 * days_remaining as i128;
    let half = days_total as i128 / 2;
    ((scaled + half) / days_total as i128) as i64
}

/// Quote a plan switch against the customer's current subscription.
///
/// With no active subscription the quote degenerates to full price.
pub fn plan_switch_quote(
    current: Option<(OffsetDateTime, OffsetDateTime, i64)>,
    new_plan_price_vnd: i64,
    now: OffsetDateTime,
) -> PlanSwitchQuote {
    let (remaining, days_remaining) = match current {
        Some((start, end, price)) => {
            let days = (end - now).whole_days().max(0);
            (remaining_value(start, end, price, now), days)
        }
        None => (0, 0),
    };

    let amount_to_pay = new_plan_price_vnd - remaining;

    PlanSwitchQuote {
        remaining_value_vnd: remaining,
        new_plan_price_vnd,
        amount_to_pay_vnd: amount_to_pay,
        is_upgrade: amount_to_pay > 0,
        days_remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn dt(epoch_days: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::days(epoch_days)
    }

    #[test]
    fn ten_days_into_thirty_day_period() {
        // 300,000 VND plan, 20 of 30 days remaining -> 200,000
        let value = remaining_value(dt(0), dt(30), 300_000, dt(10));
        assert_eq!(value, 200_000);
    }

    #[test]
    fn upgrade_quote_is_payable() {
        // Scenario: switch to a 250,000 plan with 200,000 remaining
        let quote = plan_switch_quote(Some((dt(0), dt(30), 300_000)), 250_000, dt(10));
        assert_eq!(quote.remaining_value_vnd, 200_000);
        assert_eq!(quote.amount_to_pay_vnd, 50_000);
        assert!(quote.is_upgrade);
        assert_eq!(quote.days_remaining, 20);
    }

    #[test]
    fn downgrade_quote_is_non_positive() {
        // Switching to a 150,000 plan with 200,000 remaining -> -50,000
        let quote = plan_switch_quote(Some((dt(0), dt(30), 300_000)), 150_000, dt(10));
        assert_eq!(quote.amount_to_pay_vnd, -50_000);
        assert!(!quote.is_upgrade);
    }

    #[test]
    fn ended_period_has_no_value() {
        assert_eq!(remaining_value(dt(0), dt(30), 300_000, dt(30)), 0);
        assert_eq!(remaining_value(dt(0), dt(30), 300_000, dt(45)), 0);
    }

    #[test]
    fn not_yet_started_is_full_price() {
        assert_eq!(remaining_value(dt(10), dt(40), 300_000, dt(10)), 300_000);
        assert_eq!(remaining_value(dt(10), dt(40), 300_000, dt(5)), 300_000);
    }

    #[test]
    fn zero_length_period_is_zero() {
        // start == end must not divide by zero
        assert_eq!(remaining_value(dt(10), dt(10), 300_000, dt(10)), 0);
    }

    #[test]
    fn value_is_bounded_and_non_increasing() {
        let price = 299_000;
        let mut previous = price;
        for day in 0..=30 {
            let value = remaining_value(dt(0), dt(30), price, dt(day));
            assert!((0..=price).contains(&value), "day {day}: {value}");
            assert!(value <= previous, "day {day}: {value} > {previous}");
            previous = value;
        }
    }

    #[test]
    fn rounds_to_nearest_dong() {
        // 100,000 over 3 days, 1 day remaining: 100000/3 = 33333.33 -> 33333
        assert_eq!(remaining_value(dt(0), dt(3), 100_000, dt(2)), 33_333);
        // 2 days remaining: 66666.67 -> 66667
        assert_eq!(remaining_value(dt(0), dt(3), 100_000, dt(1)), 66_667);
    }

    #[test]
    fn no_subscription_degenerates_to_full_price() {
        let quote = plan_switch_quote(None, 250_000, dt(10));
        assert_eq!(quote.remaining_value_vnd, 0);
        assert_eq!(quote.amount_to_pay_vnd, 250_000);
        assert!(quote.is_upgrade);
    }
}
