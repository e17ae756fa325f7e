//! Payment gateway webhook handling
//!
//! The gateway posts signed confirmations when it observes a bank
//! transfer. Signature verification happens before any database write,
//! and idempotency is an atomic INSERT..ON CONFLICT claim on the gateway
//! event id so two concurrent deliveries of the same event cannot both
//! process it.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::events::ActorType;
use crate::payments::PaymentLedger;

type HmacSha256 = Hmac<Sha256>;

/// Max accepted clock skew between the gateway and us.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Events stuck in 'processing' longer than this can be re-claimed, so a
/// crash mid-handling does not wedge the event forever.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Parsed gateway notification.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    /// Gateway-side unique id, the idempotency key.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: GatewayEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEventData {
    pub payment_id: Uuid,
    #[serde(default)]
    pub bank_transaction_ref: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

pub struct WebhookHandler {
    pool: PgPool,
    webhook_secret: String,
    payments: PaymentLedger,
}

impl WebhookHandler {
    pub fn new(pool: PgPool, webhook_secret: String, email: BillingEmailService) -> Self {
        Self {
            payments: PaymentLedger::new(pool.clone(), email),
            pool,
            webhook_secret,
        }
    }

    /// Verify the signature header and parse the payload.
    ///
    /// Header format: `t=<unix seconds>,v1=<hex hmac-sha256>` where the
    /// MAC covers `"{t}.{payload}"`. Any parse or verification failure
    /// maps to the same opaque error; callers must not leak which check
    /// failed.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<GatewayEvent> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::error!("Missing timestamp in webhook signature header");
            BillingError::WebhookSignatureInvalid
        })?;
        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::error!("Missing v1 signature in webhook signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::error!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let signed_payload = format!("{timestamp}.{payload}");
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::error!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: GatewayEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook payload");
            BillingError::WebhookSignatureInvalid
        })?;

        Ok(event)
    }

    /// Handle a verified gateway event.
    ///
    /// The INSERT..ON CONFLICT..RETURNING claims exclusive processing
    /// rights; losing the claim means the event is a replay and the
    /// handler acknowledges it without side effects. Events stuck in
    /// 'processing' past the timeout are re-claimable.
    pub async fn handle_event(&self, event: GatewayEvent) -> BillingResult<()> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO gateway_webhook_events
                (gateway_event_id, event_type, processing_result, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (gateway_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW()
            WHERE gateway_webhook_events.processing_result = 'processing'
              AND gateway_webhook_events.processing_started_at
                  < NOW() - make_interval(mins => $3)
            RETURNING id
            "#,
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_none() {
            tracing::info!(
                gateway_event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate gateway event, acknowledging without processing"
            );
            return Ok(());
        }

        tracing::info!(
            gateway_event_id = %event.id,
            event_type = %event.event_type,
            payment_id = %event.data.payment_id,
            "Processing gateway event"
        );

        let result = self.process_event(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE gateway_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE gateway_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event.id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                gateway_event_id = %event.id,
                error = %e,
                "Failed to record webhook processing result; event may look stuck"
            );
        }

        result
    }

    async fn process_event(&self, event: &GatewayEvent) -> BillingResult<()> {
        match event.event_type.as_str() {
            "payment.succeeded" => {
                match self
                    .payments
                    .approve(
                        event.data.payment_id,
                        None,
                        event.data.bank_transaction_ref.as_deref(),
                        ActorType::Gateway,
                    )
                    .await
                {
                    Ok(approved) => {
                        tracing::info!(
                            payment_id = %approved.payment_id,
                            subscription_id = %approved.subscription_id,
                            "Gateway confirmation approved payment"
                        );
                        Ok(())
                    }
                    // An admin approving first is a normal race, not an
                    // error worth a gateway-side retry.
                    Err(BillingError::AlreadyProcessed(msg)) => {
                        tracing::info!(
                            payment_id = %event.data.payment_id,
                            detail = %msg,
                            "Gateway confirmation arrived after payment was finalized"
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            "payment.failed" => {
                let reason = event
                    .data
                    .failure_reason
                    .as_deref()
                    .unwrap_or("rejected by payment gateway");
                match self
                    .payments
                    .reject(event.data.payment_id, None, reason)
                    .await
                {
                    Ok(()) | Err(BillingError::AlreadyProcessed(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            other => {
                tracing::info!(
                    gateway_event_id = %event.id,
                    event_type = %other,
                    "Unhandled gateway event type"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler_with_secret(secret: &str) -> WebhookHandler {
        // Lazy pool: no connection is made in these tests.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/streampass_test")
            .unwrap();
        WebhookHandler::new(pool, secret.to_string(), BillingEmailService::from_env())
    }

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn sample_payload() -> String {
        serde_json::json!({
            "id": "evt_abc123",
            "type": "payment.succeeded",
            "data": {
                "payment_id": Uuid::nil(),
                "bank_transaction_ref": "FT2026082700001"
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn valid_signature_parses_event() {
        let handler = handler_with_secret("whsec_test");
        let payload = sample_payload();
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let sig = sign("whsec_test", ts, &payload);

        let event = handler
            .verify_event(&payload, &format!("t={ts},v1={sig}"))
            .unwrap();
        assert_eq!(event.id, "evt_abc123");
        assert_eq!(event.event_type, "payment.succeeded");
        assert_eq!(
            event.data.bank_transaction_ref.as_deref(),
            Some("FT2026082700001")
        );
    }

    #[tokio::test]
    async fn tampered_payload_is_rejected() {
        let handler = handler_with_secret("whsec_test");
        let payload = sample_payload();
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let sig = sign("whsec_test", ts, &payload);

        let tampered = payload.replace("payment.succeeded", "payment.failed");
        let result = handler.verify_event(&tampered, &format!("t={ts},v1={sig}"));
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let handler = handler_with_secret("whsec_real");
        let payload = sample_payload();
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let sig = sign("whsec_other", ts, &payload);

        let result = handler.verify_event(&payload, &format!("t={ts},v1={sig}"));
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let handler = handler_with_secret("whsec_test");
        let payload = sample_payload();
        let ts = OffsetDateTime::now_utc().unix_timestamp() - SIGNATURE_TOLERANCE_SECS - 10;
        let sig = sign("whsec_test", ts, &payload);

        let result = handler.verify_event(&payload, &format!("t={ts},v1={sig}"));
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[tokio::test]
    async fn malformed_header_is_rejected() {
        let handler = handler_with_secret("whsec_test");
        let payload = sample_payload();

        for header in ["", "t=abc,v1=def", "v1=deadbeef", "t=12345"] {
            let result = handler.verify_event(&payload, header);
            assert!(
                matches!(result, Err(BillingError::WebhookSignatureInvalid)),
                "header {header:?} should be rejected"
            );
        }
    }
}
