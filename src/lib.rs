//! MotorPact - customer portal and billing backend for vehicle financing
//!
//! This library provides the core functionality for the MotorPact service:
//! customer registration, document collection, Stripe checkout and webhook
//! reconciliation, and the admin dashboard API.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod storage;
pub mod util;
