//! Prefixed ID generation for MotorPact entities.
//!
//! All IDs use an `mp_` brand prefix to guarantee collision avoidance with
//! Stripe's own identifiers (`cus_`, `sub_`, `in_`, `pi_`, etc.).
//!
//! Format: `mp_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "mp_usr_", "mp_ses_", "mp_cus_", "mp_doc_", "mp_pay_", "mp_inv_", "mp_aud_",
];

/// Validate that a string is a valid MotorPact prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `mp_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in MotorPact.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    User,
    Session,
    Customer,
    Document,
    Payment,
    Invoice,
    AuditLog,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => "mp_usr",
            Self::Session => "mp_ses",
            Self::Customer => "mp_cus",
            Self::Document => "mp_doc",
            Self::Payment => "mp_pay",
            Self::Invoice => "mp_inv",
            Self::AuditLog => "mp_aud",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
