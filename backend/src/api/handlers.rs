//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Calls the appropriate service
//! 3. Returns a formatted response
//!
//! ## Error Handling
//!
//! Handlers return `Result<HttpResponse, LedgerError>`; the error side is
//! rendered by `LedgerError`'s `ResponseError` impl:
//!
//! ```json
//! {
//!     "success": false,
//!     "error": {
//!         "code": "INSUFFICIENT_BALANCE",
//!         "message": "Insufficient balance: requested 500, available 200"
//!     }
//! }
//! ```

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use tracing::{info, warn};

use super::AppState;
use crate::access::Permission;
use crate::db::{LedgerStore, Page};
use crate::error::LedgerError;
use crate::models::{
    ApiInfo, ApiResponse, ApproveDepositRequest, ApproveWithdrawalRequest, DepositRequest, HealthResponse,
    HistoryQuery, InvestmentRequest, LoginRequest, RedeemRequest, RegisterRequest, WithdrawalRequest,
};

type State<S> = web::Data<Arc<AppState<S>>>;
type HandlerResult = Result<HttpResponse, LedgerError>;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

fn ok<T: serde::Serialize>(data: T) -> HandlerResult {
    Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
}

fn created<T: serde::Serialize>(data: T) -> HandlerResult {
    Ok(HttpResponse::Created().json(ApiResponse::success(data)))
}

/// API information endpoint (root).
///
/// `GET /`
pub async fn api_info() -> HttpResponse {
    let endpoints = [
        "POST /users",
        "POST /users/login",
        "GET /users/{email}",
        "GET /plans",
        "POST /deposits",
        "POST /deposits/approve",
        "GET /deposits/{email}",
        "POST /withdrawals",
        "POST /withdrawals/approve",
        "GET /withdrawals/{email}",
        "POST /investments",
        "GET /investments/{email}",
        "GET /rewards/{email}",
        "POST /rewards/redeem",
        "POST /profit/accrue",
        "GET /dashboard/{email}",
        "GET /transactions/{email}",
        "GET /health",
    ];

    HttpResponse::Ok().json(ApiResponse::success(ApiInfo {
        name: "Investment Ledger API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
    }))
}

/// Health check endpoint.
///
/// `GET /health`
///
/// ```bash
/// curl http://127.0.0.1:8080/health
/// ```
///
/// Returns 503 when the store does not answer.
pub async fn health_check<S: LedgerStore>(state: State<S>) -> HttpResponse {
    let store_healthy = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Store ping failed: {}", e);
            false
        }
    };

    let response = HealthResponse {
        status: if store_healthy { "healthy" } else { "unhealthy" }.to_string(),
        store: store_healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if store_healthy {
        actix_web::http::StatusCode::OK
    } else {
        actix_web::http::StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

/// `GET /plans`
pub async fn list_plans<S: LedgerStore>(state: State<S>) -> HandlerResult {
    ok(state.transfers.plans().all())
}

// ==========================================
// USERS
// ==========================================

/// Register a user.
///
/// `POST /users`
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/users \
///   -H "Content-Type: application/json" \
///   -d '{"email":"ada@example.com","firstName":"Ada","lastName":"Lovelace","username":"ada","password":"correct horse"}'
/// ```
pub async fn register_user<S: LedgerStore>(state: State<S>, body: web::Json<RegisterRequest>) -> HandlerResult {
    let registration = state.accounts.register_user(body.into_inner().into()).await?;
    created(registration)
}

/// Check credentials and return the user.
///
/// `POST /users/login`
///
/// A wrong password and an unknown email both answer 401
/// `INVALID_CREDENTIALS`.
pub async fn login<S: LedgerStore>(state: State<S>, body: web::Json<LoginRequest>) -> HandlerResult {
    let request = body.into_inner();
    ok(state.accounts.login(&request.email, &request.password).await?)
}

/// `GET /users/{email}`
pub async fn get_balances<S: LedgerStore>(state: State<S>, path: web::Path<String>) -> HandlerResult {
    ok(state.queries.balances(&path.into_inner()).await?)
}

// ==========================================
// DEPOSITS
// ==========================================

/// Request a deposit. The deposit stays Pending until an admin decides.
///
/// `POST /deposits`
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/deposits \
///   -H "Content-Type: application/json" \
///   -d '{"email":"ada@example.com","amount":"500","currency":"USDT","address":"TQn9..."}'
/// ```
pub async fn create_deposit<S: LedgerStore>(state: State<S>, body: web::Json<DepositRequest>) -> HandlerResult {
    created(state.transfers.create_deposit(body.into_inner().into()).await?)
}

/// Approve or reject a Pending deposit.
///
/// `POST /deposits/approve`
///
/// ```json
/// {
///     "transactionId": "0b6c…",
///     "action": "approve",
///     "adminEmail": "admin@example.com"
/// }
/// ```
///
/// A second decision on the same deposit answers 409 `ALREADY_PROCESSED`.
pub async fn approve_deposit<S: LedgerStore>(
    state: State<S>,
    body: web::Json<ApproveDepositRequest>,
) -> HandlerResult {
    let request = body.into_inner();
    let principal = state.policy.resolve(&request.admin_email);
    if let Err(e) = principal.require(Permission::ApproveDeposits) {
        warn!("Deposit approval refused for {}", principal.identity);
        return Err(e);
    }

    let reference = request.reference()?;
    info!("Deposit decision {:?} on {:?} by {}", request.action, reference, principal.identity);

    ok(state.transfers.approve_deposit(reference, request.action).await?)
}

/// `GET /deposits/{email}`
pub async fn get_deposits<S: LedgerStore>(state: State<S>, path: web::Path<String>) -> HandlerResult {
    ok(state.queries.deposit_history(&path.into_inner()).await?)
}

// ==========================================
// WITHDRAWALS
// ==========================================

/// Request a withdrawal. Balances change only on approval.
///
/// `POST /withdrawals`
pub async fn create_withdrawal<S: LedgerStore>(
    state: State<S>,
    body: web::Json<WithdrawalRequest>,
) -> HandlerResult {
    created(state.transfers.create_withdrawal(body.into_inner().into()).await?)
}

/// `POST /withdrawals/approve`
///
/// ```json
/// {
///     "withdrawalId": "5d1e…",
///     "action": "reject",
///     "adminEmail": "admin@example.com"
/// }
/// ```
pub async fn approve_withdrawal<S: LedgerStore>(
    state: State<S>,
    body: web::Json<ApproveWithdrawalRequest>,
) -> HandlerResult {
    let request = body.into_inner();
    let principal = state.policy.resolve(&request.admin_email);

    ok(state
        .transfers
        .approve_withdrawal(request.withdrawal_id, request.action, &principal)
        .await?)
}

/// `GET /withdrawals/{email}`
pub async fn get_withdrawals<S: LedgerStore>(state: State<S>, path: web::Path<String>) -> HandlerResult {
    ok(state.queries.withdrawal_history(&path.into_inner()).await?)
}

// ==========================================
// INVESTMENTS
// ==========================================

/// Invest part of the main balance in a plan.
///
/// `POST /investments`
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/investments \
///   -H "Content-Type: application/json" \
///   -d '{"email":"ada@example.com","planId":1,"amount":"1000"}'
/// ```
pub async fn create_investment<S: LedgerStore>(
    state: State<S>,
    body: web::Json<InvestmentRequest>,
) -> HandlerResult {
    created(state.transfers.create_investment(body.into_inner().into()).await?)
}

/// `GET /investments/{email}`
pub async fn get_investments<S: LedgerStore>(state: State<S>, path: web::Path<String>) -> HandlerResult {
    ok(state.queries.investments(&path.into_inner()).await?)
}

// ==========================================
// REWARDS & PROFIT
// ==========================================

/// `GET /rewards/{email}`
pub async fn get_rewards<S: LedgerStore>(state: State<S>, path: web::Path<String>) -> HandlerResult {
    ok(state.rewards.rewards_summary(&path.into_inner()).await?)
}

/// Convert reward points to main balance.
///
/// `POST /rewards/redeem` with `{"email": "...", "points": 500}`
pub async fn redeem_rewards<S: LedgerStore>(state: State<S>, body: web::Json<RedeemRequest>) -> HandlerResult {
    let request = body.into_inner();
    ok(state.transfers.redeem_rewards(&request.email, request.points).await?)
}

/// Run one accrual pass now. Safe to repeat: each investment accrues at
/// most once per UTC day.
///
/// `POST /profit/accrue`
pub async fn accrue_profits<S: LedgerStore>(state: State<S>) -> HandlerResult {
    let report = state.accruals.accrue_profits().await?;
    info!(
        "📈 Accrual pass: {} processed, {} already accrued, {} matured, {} failed",
        report.investments_processed, report.already_accrued, report.matured, report.failed
    );
    ok(report)
}

// ==========================================
// QUERIES
// ==========================================

/// Everything the dashboard needs for one user.
///
/// `GET /dashboard/{email}`
///
/// Accrues due profit first when `ACCRUE_ON_DASHBOARD` is on; an accrual
/// failure does not fail the read.
pub async fn get_dashboard<S: LedgerStore>(state: State<S>, path: web::Path<String>) -> HandlerResult {
    ok(state.queries.dashboard_snapshot(&path.into_inner()).await?)
}

/// Get transaction history, newest first.
///
/// `GET /transactions/{email}?limit=20&offset=0`
///
/// ## Query Parameters
///
/// - `limit` - Number of transactions (default: 20, max: 100)
/// - `offset` - Skip N transactions (for pagination)
pub async fn get_transactions<S: LedgerStore>(
    state: State<S>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> HandlerResult {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    ok(state
        .queries
        .transaction_history(&path.into_inner(), Page::new(limit, offset))
        .await?)
}
