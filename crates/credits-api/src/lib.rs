//! API layer for the cloud credits engine
//!
//! HTTP handlers for credit installation, balances, manual settlement,
//! migration and the credit state log.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;

pub use dto::ApiResponse;
pub use handlers::{configure_credits, configure_health};

use actix_web::web;

/// Mount every route of the API on `cfg`
pub fn configure(cfg: &mut web::ServiceConfig) {
    configure_health(cfg);
    configure_credits(cfg);
}
