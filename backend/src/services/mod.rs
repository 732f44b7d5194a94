//! # Services Module
//!
//! Business logic for the investment ledger. Every service is generic over a
//! [`LedgerStore`](crate::db::LedgerStore) and runs each operation inside one
//! store transaction.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `AccountService` | Registration, referral codes |
//! | `TransferEngine` | Deposits, withdrawals, investments, redemptions |
//! | `AccrualEngine` | Daily profit accrual, maturity settlement |
//! | `RewardEngine` | Referral rewards, reward ledger |
//! | `LedgerQuery` | Dashboard and history views |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                    TransferEngine                         │   │
//! │  │  • create_deposit()     • approve_deposit()               │   │
//! │  │  • create_withdrawal()  • approve_withdrawal()            │   │
//! │  │  • create_investment()  • redeem_rewards()                │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │           │                                   │                  │
//! │           ▼                                   ▼                  │
//! │  ┌────────────┐      ┌────────────┐   ┌────────────┐            │
//! │  │  Reward    │      │  Accrual   │◄──│  Ledger    │            │
//! │  │  Engine    │      │  Engine    │   │  Query     │            │
//! │  │            │      │            │   │            │            │
//! │  │ Referrals  │      │ Daily ROI  │   │ Dashboard  │            │
//! │  │ Points     │      │ Maturity   │   │ History    │            │
//! │  └────────────┘      └────────────┘   └────────────┘            │
//! │                                                                  │
//! │  Notifier: best-effort messages after commit                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod accounts;
pub mod accrual_engine;
pub mod ledger_query;
pub mod notifier;
pub mod plans;
pub mod reward_engine;
pub mod transfer_engine;

pub use accounts::{AccountService, NewUser, Registration};
pub use accrual_engine::{AccrualEngine, AccrualReport};
pub use ledger_query::{BalanceSnapshot, DashboardSnapshot, LedgerQuery, MonthlySummary, RequestHistory};
pub use notifier::{LogNotifier, Notifier};
pub use plans::{Plan, PlanCatalog};
pub use reward_engine::{RewardEngine, RewardsSummary};
pub use transfer_engine::{
    ApprovalAction, DepositRef, NewDeposit, NewInvestment, NewWithdrawal, TransferEngine,
};
