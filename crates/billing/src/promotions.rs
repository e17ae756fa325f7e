//! Coupon validation and redemption
//!
//! Validation is read-only: an abandoned checkout must not burn a
//! redemption. Usage is recorded by the payment ledger at approval time,
//! inside the approval transaction, guarded by the
//! `promotion_usages(promotion_id, customer_id)` unique constraint.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use streampass_shared::DiscountType;

/// A successfully validated coupon, priced against an amount.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionQuote {
    pub promotion_id: Uuid,
    pub code: String,
    pub original_amount_vnd: i64,
    pub discount_amount_vnd: i64,
    pub final_amount_vnd: i64,
}

/// Why a coupon was refused. Each variant maps to a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionRejection {
    UnknownCode,
    Inactive,
    Expired,
    Exhausted,
    AlreadyRedeemed,
}

impl PromotionRejection {
    pub fn user_message(&self) -> &'static str {
        match self {
            PromotionRejection::UnknownCode => "Coupon code does not exist",
            PromotionRejection::Inactive => "Coupon is no longer active",
            PromotionRejection::Expired => "Coupon has expired",
            PromotionRejection::Exhausted => "Coupon has reached its usage limit",
            PromotionRejection::AlreadyRedeemed => "Coupon was already used on this account",
        }
    }
}

/// Outcome of validating a coupon code.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "valid", rename_all = "snake_case")]
pub enum PromotionOutcome {
    #[serde(rename = "true")]
    Valid(PromotionQuote),
    #[serde(rename = "false")]
    Invalid { error: PromotionRejection },
}

#[derive(Debug, sqlx::FromRow)]
struct PromotionRow {
    id: Uuid,
    code: String,
    discount_type: String,
    discount_value: i64,
    max_uses: Option<i32>,
    current_uses: i32,
    expires_at: Option<OffsetDateTime>,
    is_active: bool,
}

pub struct PromotionValidator {
    pool: PgPool,
}

impl PromotionValidator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validate `code` for `customer_id` against `original_amount_vnd`.
    ///
    /// Checks run in order and short-circuit on the first failure:
    /// existence, active flag, expiry, usage limit, prior redemption by
    /// this customer. Read-only.
    pub async fn validate(
        &self,
        code: &str,
        original_amount_vnd: i64,
        customer_id: Uuid,
    ) -> BillingResult<PromotionOutcome> {
        let code = code.trim();
        if code.is_empty() {
            return Err(BillingError::Validation("coupon code is empty".into()));
        }

        let row: Option<PromotionRow> = sqlx::query_as(
            r#"
            SELECT id, code, discount_type, discount_value,
                   max_uses, current_uses, expires_at, is_active
            FROM promotions
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        let Some(promo) = row else {
            return Ok(PromotionOutcome::Invalid {
                error: PromotionRejection::UnknownCode,
            });
        };

        let already_used: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM promotion_usages WHERE promotion_id = $1 AND customer_id = $2",
        )
        .bind(promo.id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Err(error) =
            check_eligibility(&promo, OffsetDateTime::now_utc(), already_used.is_some())
        {
            return Ok(PromotionOutcome::Invalid { error });
        }

        let discount_type: DiscountType = promo
            .discount_type
            .parse()
            .map_err(|e| BillingError::Validation(format!("promotion {}: {e}", promo.id)))?;

        let discount =
            compute_discount(discount_type, promo.discount_value, original_amount_vnd);

        Ok(PromotionOutcome::Valid(PromotionQuote {
            promotion_id: promo.id,
            code: promo.code,
            original_amount_vnd,
            discount_amount_vnd: discount,
            final_amount_vnd: original_amount_vnd - discount,
        }))
    }

    /// Record a redemption inside the approval transaction.
    ///
    /// The unique constraint is the real guard against two concurrent
    /// approvals: a conflicting insert rolls the whole approval back with
    /// `Conflict` instead of silently double-counting.
    pub async fn record_redemption(
        tx: &mut Transaction<'_, Postgres>,
        promotion_id: Uuid,
        customer_id: Uuid,
        payment_id: Uuid,
    ) -> BillingResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO promotion_usages (promotion_id, customer_id, payment_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (promotion_id, customer_id) DO NOTHING
            "#,
        )
        .bind(promotion_id)
        .bind(customer_id)
        .bind(payment_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(BillingError::Conflict(
                "coupon already redeemed by this customer".into(),
            ));
        }

        // The counter bump re-checks the limit at write time: two
        // different customers can both pass the read-only validation for
        // the last remaining use, and only the constraint here decides
        // who gets it.
        let counted = sqlx::query(
            r#"
            UPDATE promotions
            SET current_uses = current_uses + 1
            WHERE id = $1 AND (max_uses IS NULL OR current_uses < max_uses)
            "#,
        )
        .bind(promotion_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if counted == 0 {
            return Err(BillingError::Conflict(
                "coupon has reached its usage limit".into(),
            ));
        }

        Ok(())
    }
}

/// Eligibility checks for a fetched promotion row, in order, returning
/// the first failure: active flag, expiry, usage limit, prior redemption
/// by this customer. Pure; callers supply the usage lookup.
fn check_eligibility(
    promo: &PromotionRow,
    now: OffsetDateTime,
    already_used: bool,
) -> Result<(), PromotionRejection> {
    if !promo.is_active {
        return Err(PromotionRejection::Inactive);
    }
    if let Some(expires_at) = promo.expires_at {
        if expires_at < now {
            return Err(PromotionRejection::Expired);
        }
    }
    if let Some(max_uses) = promo.max_uses {
        if promo.current_uses >= max_uses {
            return Err(PromotionRejection::Exhausted);
        }
    }
    if already_used {
        return Err(PromotionRejection::AlreadyRedeemed);
    }
    Ok(())
}

/// Discount for `amount`, clamped to `[0, amount]` so a coupon can never
/// produce a negative payable amount.
pub fn compute_discount(discount_type: DiscountType, value: i64, amount_vnd: i64) -> i64 {
    let raw = match discount_type {
        DiscountType::Percent => amount_vnd.saturating_mul(value) / 100,
        DiscountType::FixedAmount => value,
    };
    raw.clamp(0, amount_vnd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn promo(max_uses: Option<i32>, current_uses: i32) -> PromotionRow {
        PromotionRow {
            id: Uuid::new_v4(),
            code: "WELCOME20".into(),
            discount_type: "percent".into(),
            discount_value: 20,
            max_uses,
            current_uses,
            expires_at: None,
            is_active: true,
        }
    }

    #[test]
    fn eligible_promotion_passes() {
        let now = OffsetDateTime::now_utc();
        assert!(check_eligibility(&promo(Some(10), 3), now, false).is_ok());
        assert!(check_eligibility(&promo(None, 1_000_000), now, false).is_ok());
    }

    #[test]
    fn exhausted_coupon_rejects_every_customer() {
        // A customer who never redeemed the code still sees exhausted once
        // the limit is hit.
        let now = OffsetDateTime::now_utc();
        let result = check_eligibility(&promo(Some(1), 1), now, false);
        assert_eq!(result, Err(PromotionRejection::Exhausted));
    }

    #[test]
    fn checks_fail_in_declaration_order() {
        let now = OffsetDateTime::now_utc();

        // Inactive wins over everything else.
        let mut row = promo(Some(1), 1);
        row.is_active = false;
        row.expires_at = Some(now - Duration::days(1));
        assert_eq!(
            check_eligibility(&row, now, true),
            Err(PromotionRejection::Inactive)
        );

        // Expiry wins over exhaustion and prior redemption.
        let mut row = promo(Some(1), 1);
        row.expires_at = Some(now - Duration::days(1));
        assert_eq!(
            check_eligibility(&row, now, true),
            Err(PromotionRejection::Expired)
        );

        // Exhaustion wins over prior redemption.
        assert_eq!(
            check_eligibility(&promo(Some(1), 1), now, true),
            Err(PromotionRejection::Exhausted)
        );
    }

    #[test]
    fn prior_redemption_rejects_repeat_customer() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            check_eligibility(&promo(Some(10), 3), now, true),
            Err(PromotionRejection::AlreadyRedeemed)
        );
    }

    #[test]
    fn percent_discount() {
        assert_eq!(compute_discount(DiscountType::Percent, 20, 300_000), 60_000);
        assert_eq!(compute_discount(DiscountType::Percent, 100, 300_000), 300_000);
    }

    #[test]
    fn fixed_discount() {
        assert_eq!(
            compute_discount(DiscountType::FixedAmount, 50_000, 300_000),
            50_000
        );
    }

    #[test]
    fn discount_never_exceeds_amount() {
        // oversized fixed discount clamps to the full amount, not below zero
        assert_eq!(
            compute_discount(DiscountType::FixedAmount, 500_000, 300_000),
            300_000
        );
        assert_eq!(compute_discount(DiscountType::Percent, 150, 300_000), 300_000);
    }

    #[test]
    fn negative_value_clamps_to_zero() {
        assert_eq!(compute_discount(DiscountType::FixedAmount, -10, 300_000), 0);
        assert_eq!(compute_discount(DiscountType::Percent, -5, 300_000), 0);
    }

    #[test]
    fn rejection_messages_are_distinct() {
        let msgs = [
            PromotionRejection::UnknownCode,
            PromotionRejection::Inactive,
            PromotionRejection::Expired,
            PromotionRejection::Exhausted,
            PromotionRejection::AlreadyRedeemed,
        ]
        .map(|r| r.user_message());
        let unique: std::collections::HashSet<_> = msgs.iter().collect();
        assert_eq!(unique.len(), msgs.len());
    }
}
