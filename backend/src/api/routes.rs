//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;
use crate::db::LedgerStore;

/// Configure all API routes for a given store backend.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                   GET
/// ├── /plans                    GET
/// ├── /users                    POST
/// │   ├── /login                POST
/// │   └── /{email}              GET
/// ├── /deposits                 POST
/// │   ├── /approve              POST (admin)
/// │   └── /{email}              GET
/// ├── /withdrawals              POST
/// │   ├── /approve              POST (admin)
/// │   └── /{email}              GET
/// ├── /investments              POST
/// │   └── /{email}              GET
/// ├── /rewards/redeem           POST
/// ├── /rewards/{email}          GET
/// ├── /profit/accrue            POST
/// ├── /dashboard/{email}        GET
/// └── /transactions/{email}     GET
/// ```
pub fn configure_routes<S: LedgerStore>(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))
        .route("/health", web::get().to(handlers::health_check::<S>))
        .route("/plans", web::get().to(handlers::list_plans::<S>))
        .service(
            web::scope("/users")
                .route("", web::post().to(handlers::register_user::<S>))
                .route("/login", web::post().to(handlers::login::<S>))
                .route("/{email}", web::get().to(handlers::get_balances::<S>)),
        )
        .service(
            web::scope("/deposits")
                .route("", web::post().to(handlers::create_deposit::<S>))
                // Literal segment is registered before the {email} matcher
                .route("/approve", web::post().to(handlers::approve_deposit::<S>))
                .route("/{email}", web::get().to(handlers::get_deposits::<S>)),
        )
        .service(
            web::scope("/withdrawals")
                .route("", web::post().to(handlers::create_withdrawal::<S>))
                .route("/approve", web::post().to(handlers::approve_withdrawal::<S>))
                .route("/{email}", web::get().to(handlers::get_withdrawals::<S>)),
        )
        .service(
            web::scope("/investments")
                .route("", web::post().to(handlers::create_investment::<S>))
                .route("/{email}", web::get().to(handlers::get_investments::<S>)),
        )
        .service(
            web::scope("/rewards")
                .route("/redeem", web::post().to(handlers::redeem_rewards::<S>))
                .route("/{email}", web::get().to(handlers::get_rewards::<S>)),
        )
        .route("/profit/accrue", web::post().to(handlers::accrue_profits::<S>))
        .route("/dashboard/{email}", web::get().to(handlers::get_dashboard::<S>))
        .route("/transactions/{email}", web::get().to(handlers::get_transactions::<S>));
}
