mod audit_log;
mod customer;
mod document;
mod invoice;
mod payment;
mod user;

pub use audit_log::*;
pub use customer::*;
pub use document::*;
pub use invoice::*;
pub use payment::*;
pub use user::*;
