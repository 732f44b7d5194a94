//! # REST API Module
//!
//! This module defines all HTTP endpoints for the investment ledger API.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/users` | Register a user |
//! | GET | `/users/{email}` | Balances |
//! | GET | `/plans` | Plan catalog |
//! | POST | `/deposits` | Request a deposit |
//! | POST | `/deposits/approve` | Approve or reject a deposit (admin) |
//! | GET | `/deposits/{email}` | Pending and past deposits |
//! | POST | `/withdrawals` | Request a withdrawal |
//! | POST | `/withdrawals/approve` | Approve or reject a withdrawal (admin) |
//! | GET | `/withdrawals/{email}` | Pending and past withdrawals |
//! | POST | `/investments` | Invest in a plan |
//! | GET | `/investments/{email}` | Investments |
//! | GET | `/rewards/{email}` | Reward points and ledger |
//! | POST | `/rewards/redeem` | Redeem points |
//! | POST | `/profit/accrue` | Run an accrual pass |
//! | GET | `/dashboard/{email}` | Dashboard snapshot |
//! | GET | `/transactions/{email}` | Paged transaction history |
//! | GET | `/health` | Health check |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

use std::sync::Arc;

use crate::access::AccessPolicy;
use crate::config::AppConfig;
use crate::db::LedgerStore;
use crate::services::{
    AccountService, AccrualEngine, LedgerQuery, Notifier, PlanCatalog, RewardEngine, TransferEngine,
};

pub mod handlers;
pub mod routes;

pub use routes::configure_routes;

/// Application state shared across all handlers.
///
/// Every service shares the same store handle, so they all observe one
/// ledger.
pub struct AppState<S: LedgerStore> {
    pub store: S,
    pub accounts: AccountService<S>,
    pub transfers: TransferEngine<S>,
    pub accruals: AccrualEngine<S>,
    pub rewards: RewardEngine<S>,
    pub queries: LedgerQuery<S>,
    pub policy: AccessPolicy,
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(store: S, config: AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            accounts: AccountService::new(store.clone()),
            accruals: AccrualEngine::new(store.clone()),
            rewards: RewardEngine::new(store.clone()),
            queries: LedgerQuery::new(store.clone(), config.accrue_on_dashboard),
            policy: AccessPolicy::new(&config.admin_identities),
            transfers: TransferEngine::new(store.clone(), PlanCatalog::default(), notifier, config),
            store,
        }
    }
}
