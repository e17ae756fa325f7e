//! Payment code allocation
//!
//! Payment codes are the reconciliation key customers type into their bank
//! transfer note, so they must be short, unambiguous, and unique. The
//! database UNIQUE constraint on `payments.payment_code` is the
//! authoritative guard; the pre-check here only avoids burning an insert
//! on an obvious collision.

use rand::Rng;
use sqlx::PgPool;

use crate::error::{BillingError, BillingResult};

/// Alphabet excluding visually ambiguous characters (0/O, 1/I).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Constant tag prefixed to every code.
pub const CODE_PREFIX: &str = "SP";

/// Random characters after the prefix.
pub const CODE_LENGTH: usize = 8;

/// Bounded retries before giving up with `CodeAllocationExhausted`.
const MAX_ATTEMPTS: u32 = 5;

pub struct PaymentCodeAllocator {
    pool: PgPool,
}

impl PaymentCodeAllocator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Allocate a payment code not currently used by any payment.
    ///
    /// Exhausting the retry budget is a hard failure: the caller must
    /// abort rather than persist a payment without a code.
    pub async fn allocate(&self) -> BillingResult<String> {
        for attempt in 1..=MAX_ATTEMPTS {
            let candidate = generate_code();

            let exists: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM payments WHERE payment_code = $1")
                    .bind(&candidate)
                    .fetch_optional(&self.pool)
                    .await?;

            if exists.is_none() {
                return Ok(candidate);
            }

            tracing::warn!(
                attempt = attempt,
                code = %candidate,
                "Payment code collision, regenerating"
            );
        }

        tracing::error!(
            attempts = MAX_ATTEMPTS,
            "Payment code allocation exhausted"
        );
        Err(BillingError::CodeAllocationExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }
}

/// Generate one candidate code, e.g. `SP-K4QX72MN`.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let body: String = (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", CODE_PREFIX, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_has_expected_shape() {
        let code = generate_code();
        assert_eq!(code.len(), CODE_PREFIX.len() + 1 + CODE_LENGTH);
        assert!(code.starts_with("SP-"));
    }

    #[test]
    fn code_avoids_ambiguous_characters() {
        for _ in 0..200 {
            let code = generate_code();
            let body = &code[CODE_PREFIX.len() + 1..];
            for ambiguous in ['0', 'O', '1', 'I'] {
                assert!(
                    !body.contains(ambiguous),
                    "code {code} contains ambiguous char {ambiguous}"
                );
            }
        }
    }

    #[test]
    fn codes_are_distinct_in_practice() {
        // 32^8 possibilities; 1000 draws should never collide
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_code()));
        }
    }
}
