use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentType {
    SecurityDeposit,
    Subscription,
    DepositTopup,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

/// A money movement recorded by the webhook reconciler. Amounts are cents.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: String,
    pub customer_id: String,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_invoice_id: Option<String>,
    pub description: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub customer_id: String,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_invoice_id: Option<String>,
    pub description: Option<String>,
}

/// Aggregate totals over succeeded payments, for the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStats {
    pub total_collected_cents: i64,
    pub deposit_collected_cents: i64,
    pub subscription_collected_cents: i64,
    pub payment_count: i64,
}

/// A payment joined with the owning customer's display fields, for the admin
/// payment feed.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentWithCustomer {
    #[serde(flatten)]
    pub payment: Payment,
    pub customer_email: String,
    pub customer_name: String,
}
