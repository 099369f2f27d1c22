use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{msg, AppError, Result};
use crate::models::SubscriptionPlan;
use crate::util::format_major_units;

type HmacSha256 = Hmac<Sha256>;

/// Metadata key carrying our customer id on Stripe objects. Set on both the
/// checkout session and the subscription it creates, so webhook events can
/// always be traced back to a local customer.
pub const METADATA_CUSTOMER_ID: &str = "motorpact_customer_id";

/// Trial period before the first subscription charge.
const TRIAL_PERIOD_DAYS: &str = "7";

#[derive(Debug, Deserialize)]
struct CreateCustomerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct CreatePortalSessionResponse {
    url: String,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
}

impl StripeClient {
    pub fn new(secret_key: String, webhook_secret: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            webhook_secret,
        }
    }

    /// Create a Stripe customer tagged with our customer id.
    pub async fn create_customer(&self, email: &str, customer_id: &str) -> Result<String> {
        let response = self
            .client
            .post("https://api.stripe.com/v1/customers")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("email", email),
                (
                    &format!("metadata[{}]", METADATA_CUSTOMER_ID) as &str,
                    customer_id,
                ),
            ])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        let customer: CreateCustomerResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))?;

        Ok(customer.id)
    }

    /// Create the initial checkout session: an ad-hoc one-time line item for
    /// the refundable security deposit plus the recurring plan price, in
    /// subscription mode with a trial.
    ///
    /// Metadata goes on both the session and `subscription_data`, so the
    /// subscription created from this checkout carries it too.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_subscription_checkout(
        &self,
        stripe_customer_id: &str,
        customer_id: &str,
        plan: SubscriptionPlan,
        plan_price_id: &str,
        deposit_cents: i64,
        purchase_value_cents: i64,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<(String, String)> {
        let deposit_str = deposit_cents.to_string();
        let deposit_major = format_major_units(deposit_cents);
        let purchase_major = format_major_units(purchase_value_cents);
        let metadata_customer_key = format!("metadata[{}]", METADATA_CUSTOMER_ID);
        let sub_metadata_customer_key =
            format!("subscription_data[metadata][{}]", METADATA_CUSTOMER_ID);

        let form: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("customer", stripe_customer_id),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
            ("allow_promotion_codes", "true"),
            // Security deposit as a one-time line item
            ("line_items[0][price_data][currency]", "usd"),
            (
                "line_items[0][price_data][product_data][name]",
                "Security Deposit (Refundable)",
            ),
            ("line_items[0][price_data][unit_amount]", &deposit_str),
            ("line_items[0][quantity]", "1"),
            // Recurring plan price from the dashboard
            ("line_items[1][price]", plan_price_id),
            ("line_items[1][quantity]", "1"),
            ("subscription_data[trial_period_days]", TRIAL_PERIOD_DAYS),
            (&metadata_customer_key, customer_id),
            ("metadata[plan]", plan.as_ref()),
            ("metadata[security_deposit]", &deposit_major),
            ("metadata[purchase_value]", &purchase_major),
            (&sub_metadata_customer_key, customer_id),
            ("subscription_data[metadata][plan]", plan.as_ref()),
            (
                "subscription_data[metadata][security_deposit]",
                &deposit_major,
            ),
        ];

        let session = self.post_checkout_session(&form).await?;
        Ok(session)
    }

    /// Create a one-time payment checkout session for an account balance
    /// top up.
    pub async fn create_topup_checkout(
        &self,
        stripe_customer_id: &str,
        customer_id: &str,
        amount_cents: i64,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<(String, String)> {
        let amount_str = amount_cents.to_string();
        let metadata_customer_key = format!("metadata[{}]", METADATA_CUSTOMER_ID);

        let form: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("customer", stripe_customer_id),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
            ("line_items[0][price_data][currency]", "usd"),
            (
                "line_items[0][price_data][product_data][name]",
                "Account Balance Top Up",
            ),
            ("line_items[0][price_data][unit_amount]", &amount_str),
            ("line_items[0][quantity]", "1"),
            (&metadata_customer_key, customer_id),
            ("metadata[topup]", "true"),
        ];

        self.post_checkout_session(&form).await
    }

    async fn post_checkout_session(&self, form: &[(&str, &str)]) -> Result<(String, String)> {
        let response = self
            .client
            .post("https://api.stripe.com/v1/checkout/sessions")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        let session: CreateCheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))?;

        Ok((session.id, session.url))
    }

    /// Create a billing portal session for self-serve subscription
    /// management.
    pub async fn create_portal_session(
        &self,
        stripe_customer_id: &str,
        return_url: &str,
    ) -> Result<String> {
        let response = self
            .client
            .post("https://api.stripe.com/v1/billing_portal/sessions")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[("customer", stripe_customer_id), ("return_url", return_url)])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        let session: CreatePortalSessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))?;

        Ok(session.url)
    }

    /// Fetch a subscription, used when a webhook payload lacks the metadata
    /// needed to resolve the local customer.
    pub async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        let response = self
            .client
            .get(format!(
                "https://api.stripe.com/v1/subscriptions/{}",
                subscription_id
            ))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        // Stripe signature format: t=timestamp,v1=signature
        let parts: Vec<&str> = signature.split(',').collect();

        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in parts {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        // Parse and validate timestamp to prevent replay attacks.
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        // Also reject timestamps from the future (clock skew tolerance: 60 seconds)
        if age < -60 {
            tracing::warn!(
                "Stripe webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison to prevent timing attacks. Length check is
        // not constant-time, but signature length is not secret (always 64
        // hex chars for SHA-256).
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();

        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>, // "payment" or "subscription"
    pub payment_status: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>, // Present for subscription mode
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeMetadata {
    pub motorpact_customer_id: Option<String>,
    pub plan: Option<String>,
    /// Deposit in major units ("650" or "650.50"), Stripe metadata values
    /// are always strings.
    pub security_deposit: Option<String>,
    pub purchase_value: Option<String>,
    pub topup: Option<String>,
}

// ============ invoice.paid / invoice.payment_failed ============

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub status: Option<String>, // "paid", "open", etc.
    pub amount_paid: Option<i64>,
    pub amount_due: Option<i64>,
    pub currency: Option<String>,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf: Option<String>,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub due_date: Option<i64>,
    pub billing_reason: Option<String>, // "subscription_create", "subscription_cycle", etc.
}

// ============ customer.subscription.updated / deleted ============

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<String>,
    pub status: String, // "active", "past_due", "canceled", etc.
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::Mac;

    fn client() -> StripeClient {
        StripeClient::new("sk_test_x".into(), "whsec_test".into())
    }

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, String::from_utf8_lossy(payload)).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature() {
        let client = client();
        let payload = br#"{"id":"evt_1","type":"invoice.paid"}"#;
        let sig = sign("whsec_test", chrono::Utc::now().timestamp(), payload);
        assert!(client.verify_webhook_signature(payload, &sig).unwrap());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let client = client();
        let payload = b"{}";
        let sig = sign("whsec_other", chrono::Utc::now().timestamp(), payload);
        assert!(!client.verify_webhook_signature(payload, &sig).unwrap());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let client = client();
        let payload = b"{}";
        let sig = sign("whsec_test", chrono::Utc::now().timestamp() - 600, payload);
        assert!(!client.verify_webhook_signature(payload, &sig).unwrap());
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let client = client();
        let payload = b"{}";
        let sig = sign("whsec_test", chrono::Utc::now().timestamp() + 300, payload);
        assert!(!client.verify_webhook_signature(payload, &sig).unwrap());
    }

    #[test]
    fn test_malformed_header_is_error() {
        let client = client();
        assert!(client.verify_webhook_signature(b"{}", "garbage").is_err());
        assert!(client
            .verify_webhook_signature(b"{}", "t=notanumber,v1=aa")
            .is_err());
    }

    #[test]
    fn test_metadata_defaults_when_absent() {
        let session: StripeCheckoutSession =
            serde_json::from_str(r#"{"id":"cs_1"}"#).unwrap();
        assert!(session.metadata.motorpact_customer_id.is_none());
    }
}
