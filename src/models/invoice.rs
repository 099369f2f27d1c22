use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
    Uncollectible,
}

/// A local mirror of a Stripe invoice, kept so the portal can render billing
/// history without calling Stripe on every page load.
#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: String,
    pub customer_id: String,
    pub stripe_invoice_id: String,
    pub status: InvoiceStatus,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub currency: String,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf_url: Option<String>,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub due_date: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub customer_id: String,
    pub stripe_invoice_id: String,
    pub status: InvoiceStatus,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub currency: String,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf_url: Option<String>,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub due_date: Option<i64>,
}
