//! Data Transfer Objects for the API

pub mod common;
pub mod credits;

pub use common::ApiResponse;
pub use credits::{
    CreditsQuery, InstallCreditRequest, SettleRequest, SettleResponse, StateLogRequest,
    UnappliedResponse,
};
