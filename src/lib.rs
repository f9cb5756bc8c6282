//! Payment reconciliation backend for bamboo adoptions.
//!
//! Gateway callbacks and a scheduled status poll both feed the
//! [`services::ReconciliationEngine`], which turns a successful payment into
//! exactly one adoption with its own bamboo plant.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
