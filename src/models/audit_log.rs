use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Actions recorded in the audit trail. Stored as snake_case strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    SignUp,
    Login,
    Logout,
    CustomerRegistered,
    DocumentUploaded,
    AccountActivated,
    PaymentRecorded,
    PaymentFailed,
    SubscriptionUpdated,
    SubscriptionCanceled,
    RenewalReminder,
    CheckoutStarted,
    TopupStarted,
    PortalOpened,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLog {
    pub id: String,
    pub customer_id: Option<String>,
    pub user_id: Option<String>,
    pub action: AuditAction,
    /// Free-form JSON detail blob.
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditLogQuery {
    pub customer_id: Option<String>,
    pub action: Option<AuditAction>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditLogQuery {
    /// Clamp pagination to sane bounds.
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
