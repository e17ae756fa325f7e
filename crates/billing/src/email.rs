//! Billing email notifications
//!
//! Thin client for the Resend HTTP API. Construction is from env;
//! without an API key the service runs disabled and every send is a
//! logged no-op. Sends are fire-and-forget: a delivery failure must
//! never fail the billing operation that triggered it.

use serde_json::json;

/// Message category, attached as a Resend tag for delivery analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTag {
    PaymentInstructions,
    PaymentApproved,
    PaymentRejected,
    RenewalReminder,
    RefundRequestAlert,
}

impl EmailTag {
    fn as_str(&self) -> &'static str {
        match self {
            EmailTag::PaymentInstructions => "payment_instructions",
            EmailTag::PaymentApproved => "payment_approved",
            EmailTag::PaymentRejected => "payment_rejected",
            EmailTag::RenewalReminder => "renewal_reminder",
            EmailTag::RefundRequestAlert => "refund_request_alert",
        }
    }
}

#[derive(Clone)]
pub struct BillingEmailService {
    client: reqwest::Client,
    api_key: String,
    from_address: String,
    /// Operations inbox for refund-request alerts.
    ops_address: String,
}

impl BillingEmailService {
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            from_address: std::env::var("BILLING_FROM_EMAIL")
                .unwrap_or_else(|_| "billing@streampass.example".to_string()),
            ops_address: std::env::var("BILLING_OPS_EMAIL")
                .unwrap_or_else(|_| "ops@streampass.example".to_string()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Send one email. Delivery errors are logged here and reported only
    /// as a `false` return so jobs can count failures; they are never
    /// propagated as errors.
    pub async fn send(&self, to: &str, subject: &str, html: &str, tag: EmailTag) -> bool {
        if !self.is_enabled() {
            tracing::debug!(
                to = %to,
                tag = tag.as_str(),
                "Email disabled (no RESEND_API_KEY), skipping send"
            );
            return false;
        }

        let body = json!({
            "from": self.from_address,
            "to": [to],
            "subject": subject,
            "html": html,
            "tags": [{"name": "category", "value": tag.as_str()}],
        });

        let result = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, tag = tag.as_str(), "Email sent");
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    tag = tag.as_str(),
                    status = %status,
                    body = %body,
                    "Email send rejected"
                );
                false
            }
            Err(e) => {
                tracing::error!(to = %to, tag = tag.as_str(), error = %e, "Email send failed");
                false
            }
        }
    }

    /// Bank-transfer instructions for a freshly created payment.
    pub async fn send_payment_instructions(
        &self,
        to: &str,
        payment_code: &str,
        amount_vnd: i64,
        expires_hours: i64,
    ) -> bool {
        let html = format!(
            "<p>Your payment is ready. Transfer <b>{} VND</b> with the note \
             <b>{}</b> within {} hours.</p>\
             <p>Your subscription activates once the transfer is verified.</p>",
            amount_vnd, payment_code, expires_hours
        );
        self.send(
            to,
            "Payment instructions",
            &html,
            EmailTag::PaymentInstructions,
        )
        .await
    }

    pub async fn send_payment_approved(&self, to: &str, tier: &str, end_date: &str) -> bool {
        let html = format!(
            "<p>Your payment was verified. Your <b>{}</b> subscription is \
             active until {}.</p>",
            tier, end_date
        );
        self.send(to, "Payment confirmed", &html, EmailTag::PaymentApproved)
            .await
    }

    pub async fn send_payment_rejected(&self, to: &str, reason: &str) -> bool {
        let html = format!(
            "<p>We could not verify your payment: {}.</p>\
             <p>Please contact support if you believe this is a mistake.</p>",
            reason
        );
        self.send(to, "Payment not verified", &html, EmailTag::PaymentRejected)
            .await
    }

    pub async fn send_renewal_reminder(&self, to: &str, tier: &str, end_date: &str) -> bool {
        let html = format!(
            "<p>Your <b>{}</b> subscription ends on {}. Renew to keep \
             watching without interruption.</p>",
            tier, end_date
        );
        self.send(to, "Your subscription ends soon", &html, EmailTag::RenewalReminder)
            .await
    }

    /// Actionable alert to operations when a refund request is opened.
    pub async fn send_refund_request_alert(
        &self,
        customer_email: &str,
        amount_vnd: i64,
        reason: &str,
    ) -> bool {
        let html = format!(
            "<p>New refund request: <b>{} VND</b> for {}.</p><p>{}</p>\
             <p>Review it in the admin console refund queue.</p>",
            amount_vnd, customer_email, reason
        );
        let ops = self.ops_address.clone();
        self.send(
            &ops,
            "Refund request requires review",
            &html,
            EmailTag::RefundRequestAlert,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_service() -> BillingEmailService {
        BillingEmailService {
            client: reqwest::Client::new(),
            api_key: String::new(),
            from_address: "billing@streampass.example".into(),
            ops_address: "ops@streampass.example".into(),
        }
    }

    #[tokio::test]
    async fn disabled_service_reports_sends_as_not_delivered() {
        let service = disabled_service();
        assert!(!service.is_enabled());
        let delivered = service
            .send(
                "user@example.test",
                "subject",
                "<p>body</p>",
                EmailTag::RenewalReminder,
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn helper_sends_surface_the_delivery_outcome() {
        // The reminder job counts these results; a swallowed failure would
        // report every send as successful.
        let service = disabled_service();
        assert!(
            !service
                .send_renewal_reminder("user@example.test", "pro", "2026-09-01")
                .await
        );
    }
}
