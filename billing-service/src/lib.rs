//! Billing Service library.
//!
//! The billing-to-cash core for the water utility platform: bill creation,
//! invoice consolidation, payment application, double-entry ledger postings
//! and derived balance recalculation.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
