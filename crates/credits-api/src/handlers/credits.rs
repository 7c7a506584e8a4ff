//! Credit handlers
//!
//! HTTP handlers for credit installation, reads, manual settlement,
//! migration and the credit state log.

use crate::dto::credits::{
    CreditsQuery, InstallCreditRequest, SettleRequest, SettleResponse, StateLogRequest,
    UnappliedResponse,
};
use crate::dto::ApiResponse;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use credits_core::models::{CreditStateEntry, NewCreditGrant};
use credits_core::AppError;
use credits_services::ServiceContext;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Install a credit grant
///
/// POST /api/v1/credits
#[instrument(skip(ctx, req))]
pub async fn install_credit(
    ctx: web::Data<ServiceContext>,
    req: web::Json<InstallCreditRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Credit installation validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let grant: NewCreditGrant = req.into_inner().into();
    debug!(account_id = %grant.account_id, code = %grant.code, "Installing credit");

    let installed = ctx.installer.install(grant).await?;

    info!(
        account_id = %installed.account_id,
        amount = %installed.amount,
        "Credit installed"
    );

    Ok(HttpResponse::Created().json(ApiResponse::with_message(installed, "Credit installed")))
}

/// Credit summary of an account, with grants when `history=true`
///
/// GET /api/v1/credits/{account_id}
#[instrument(skip(ctx))]
pub async fn get_credits(
    ctx: web::Data<ServiceContext>,
    path: web::Path<String>,
    query: web::Query<CreditsQuery>,
) -> Result<HttpResponse, AppError> {
    let credits = ctx.reader.credits(&path, query.history).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(credits)))
}

/// Unapplied balance of an account
///
/// GET /api/v1/credits/{account_id}/unapplied
#[instrument(skip(ctx))]
pub async fn get_unapplied(
    ctx: web::Data<ServiceContext>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let account_id = path.into_inner();
    let unapplied = ctx.reader.unapplied_balance(&account_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(UnappliedResponse {
        account_id,
        unapplied,
    })))
}

/// Settle a cost against the account's credit
///
/// POST /api/v1/credits/{account_id}/settle
#[instrument(skip(ctx, req))]
pub async fn settle(
    ctx: web::Data<ServiceContext>,
    path: web::Path<String>,
    req: web::Json<SettleRequest>,
) -> Result<HttpResponse, AppError> {
    let account_id = path.into_inner();
    let cost = req.cost;

    if cost <= Decimal::ZERO {
        warn!(account_id = %account_id, cost = %cost, "Rejected non-positive settlement");
        return Err(AppError::InvalidAmount(format!(
            "cost must be positive, got {}",
            cost
        )));
    }

    let unsettled = ctx.engine.settle(&account_id, cost).await?;
    let response = SettleResponse {
        account_id,
        cost,
        settled: cost - unsettled,
        unsettled,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

/// Migrate the account's credit to its upgraded backend
///
/// POST /api/v1/credits/{account_id}/migrate
#[instrument(skip(ctx))]
pub async fn migrate(
    ctx: web::Data<ServiceContext>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let outcome = ctx.migrator.migrate(&path).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(outcome)))
}

/// Latest credit state of an account
///
/// GET /api/v1/credits/{account_id}/state
#[instrument(skip(ctx))]
pub async fn get_state(
    ctx: web::Data<ServiceContext>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let account_id = path.into_inner();
    let entry = ctx
        .state_log
        .latest(&account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("credit state of account {}", account_id)))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(entry)))
}

/// Record a credit state for an account
///
/// POST /api/v1/credits/{account_id}/state
#[instrument(skip(ctx, req))]
pub async fn record_state(
    ctx: web::Data<ServiceContext>,
    path: web::Path<String>,
    req: web::Json<StateLogRequest>,
) -> Result<HttpResponse, AppError> {
    let req = req.into_inner();
    let now = Utc::now();
    let event_at = req.event_at.unwrap_or(now);
    if event_at > now {
        return Err(AppError::Validation(format!(
            "event_at {} is in the future",
            event_at
        )));
    }
    let entry = CreditStateEntry::new(path.into_inner(), req.state, event_at);

    ctx.state_log.append(&entry).await?;
    info!(account_id = %entry.account_id, state = %entry.state, "Credit state recorded");

    Ok(HttpResponse::Created().json(ApiResponse::success(entry)))
}

/// Configure credit routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/credits")
            .route("", web::post().to(install_credit))
            .route("/{account_id}", web::get().to(get_credits))
            .route("/{account_id}/unapplied", web::get().to(get_unapplied))
            .route("/{account_id}/settle", web::post().to(settle))
            .route("/{account_id}/migrate", web::post().to(migrate))
            .route("/{account_id}/state", web::get().to(get_state))
            .route("/{account_id}/state", web::post().to(record_state)),
    );
}
