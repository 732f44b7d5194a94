//! # Investment Ledger Backend
//!
//! Balance and ledger consistency engine for an investment platform: user
//! balances, deposits, withdrawals, plan investments, daily profit accrual
//! and referral rewards, served over a REST API.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────────────────┐   ┌─────────────────────────────┐  │
//! │  │  REST API (Actix)       │   │  Background                 │  │
//! │  │  /users  /deposits      │   │  • Accrual loop (optional)  │  │
//! │  │  /withdrawals /invest.. │   │                             │  │
//! │  │  /dashboard /rewards    │   │                             │  │
//! │  └─────────────────────────┘   └─────────────────────────────┘  │
//! │               │                              │                   │
//! │  ┌────────────┴──────────────────────────────┴────────────────┐ │
//! │  │                    SERVICE LAYER                            │ │
//! │  │  Accounts · Transfers · Accrual · Rewards · Queries         │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! │                          │                                       │
//! │                 LedgerStore / LedgerTx                           │
//! │                 ┌────────┴────────┐                              │
//! │          ┌──────┴──────┐   ┌──────┴──────┐                       │
//! │          │  PostgreSQL │   │   Memory    │                       │
//! │          └─────────────┘   └─────────────┘                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod access;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{LedgerError, Result};
