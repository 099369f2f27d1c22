use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{msg, AppError, Result};

/// Security deposit floor in cents ($650).
pub const DEPOSIT_FLOOR_CENTS: i64 = 65_000;

/// Compute the required security deposit for a given purchase value.
///
/// The deposit is 10% of the vehicle purchase value, rounded to the nearest
/// cent, with a fixed $650 floor. Both values are in cents.
pub fn security_deposit_cents(purchase_value_cents: i64) -> i64 {
    let ten_percent = (purchase_value_cents + 5) / 10;
    ten_percent.max(DEPOSIT_FLOOR_CENTS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountType {
    Individual,
    Business,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountStatus {
    Draft,
    PaymentPending,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionPlan {
    Monthly,
    Yearly,
}

/// Mirrors Stripe's subscription status values we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Incomplete,
    Trialing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VehicleTitleStatus {
    Pending,
    Mailed,
    Completed,
}

/// The financed individual or business entity. One per user.
///
/// All monetary fields are integer cents. `account_status` transitions are
/// driven only by the webhook reconciler or explicit admin action, never by
/// the client directly.
#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub id: String,
    pub user_id: String,
    pub customer_number: Option<String>,
    pub account_type: AccountType,
    pub account_status: AccountStatus,

    // Individual profile
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,

    // Business profile
    pub business_name: Option<String>,
    pub business_ein: Option<String>,
    pub business_contact_name: Option<String>,

    pub email: String,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,

    pub terms_accepted: bool,
    pub terms_accepted_at: Option<i64>,

    pub purchase_value_cents: i64,
    pub security_deposit_required_cents: i64,
    pub security_deposit_paid_cents: i64,
    pub account_balance_cents: i64,

    // Stripe linkage
    pub stripe_customer_id: Option<String>,
    pub subscription_plan: Option<SubscriptionPlan>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_current_period_end: Option<i64>,

    pub vehicle_title_status: VehicleTitleStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Customer {
    /// Display name for UI (business name, or "First Last").
    pub fn display_name(&self) -> String {
        if self.account_type == AccountType::Business {
            if let Some(ref name) = self.business_name {
                return name.clone();
            }
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            _ => self.email.clone(),
        }
    }

    /// Deposit progress as a whole percentage, capped at 100.
    pub fn deposit_progress_percent(&self) -> i64 {
        if self.security_deposit_required_cents <= 0 {
            return 100;
        }
        (self.security_deposit_paid_cents * 100 / self.security_deposit_required_cents).min(100)
    }
}

/// Registration payload. The customer's email comes from the authenticated
/// user, not the body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCustomer {
    pub account_type: AccountType,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub business_name: Option<String>,
    pub business_ein: Option<String>,
    pub business_contact_name: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub terms_accepted: bool,
    pub purchase_value_cents: i64,
    pub subscription_plan: SubscriptionPlan,
}

impl CreateCustomer {
    pub fn validate(&self) -> Result<()> {
        if !self.terms_accepted {
            return Err(AppError::BadRequest(msg::TERMS_NOT_ACCEPTED.into()));
        }
        if self.purchase_value_cents < 0 {
            return Err(AppError::BadRequest(msg::NEGATIVE_PURCHASE_VALUE.into()));
        }
        match self.account_type {
            AccountType::Individual => {
                let has_names = self
                    .first_name
                    .as_deref()
                    .is_some_and(|s| !s.trim().is_empty())
                    && self
                        .last_name
                        .as_deref()
                        .is_some_and(|s| !s.trim().is_empty());
                if !has_names {
                    return Err(AppError::BadRequest(msg::NAME_REQUIRED.into()));
                }
            }
            AccountType::Business => {
                let has_name = self
                    .business_name
                    .as_deref()
                    .is_some_and(|s| !s.trim().is_empty());
                if !has_name {
                    return Err(AppError::BadRequest(msg::BUSINESS_NAME_REQUIRED.into()));
                }
            }
        }
        Ok(())
    }
}
