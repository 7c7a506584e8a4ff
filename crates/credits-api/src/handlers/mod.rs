//! HTTP request handlers

pub mod credits;
pub mod health;

pub use credits::configure as configure_credits;
pub use health::configure as configure_health;
