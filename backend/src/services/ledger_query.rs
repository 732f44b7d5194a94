//! # Ledger Query Layer
//!
//! Read-only views over the ledger. Each view reads inside a single unit
//! of work so it sees one committed state.
//!
//! `dashboard_snapshot` runs an accrual pass first when
//! `ACCRUE_ON_DASHBOARD` is on. A failed pass is logged and the snapshot
//! is still returned.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::{
    complete, DepositRecord, DepositStatus, InvestmentRecord, InvestmentStatus, LedgerStore, LedgerTx, Page,
    TransactionKind, TransactionRecord, TransactionStatus, UserRecord, WithdrawalRecord, WithdrawalStatus,
};
use crate::error::LedgerError;
use crate::utils::month_label;

use super::accrual_engine::{AccrualEngine, AccrualReport};

/// A user's accumulators plus derived figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub email: String,
    pub main_balance: Decimal,
    pub investment_balance: Decimal,
    pub available_balance: Decimal,
    pub total_deposit: Decimal,
    pub total_withdrawals: Decimal,
    pub total_earn: Decimal,
    pub reward_points: i64,
    pub active_investments: u32,
    pub completed_investments: u32,
}

impl BalanceSnapshot {
    fn new(user: &UserRecord, investments: &[InvestmentRecord]) -> Self {
        let count = |status| investments.iter().filter(|i| i.status == status).count() as u32;
        Self {
            email: user.email.clone(),
            main_balance: user.main_balance,
            investment_balance: user.investment_balance,
            available_balance: user.available_balance(),
            total_deposit: user.total_deposit,
            total_withdrawals: user.total_withdrawals,
            total_earn: user.total_earn,
            reward_points: user.reward_points,
            active_investments: count(InvestmentStatus::Active),
            completed_investments: count(InvestmentStatus::Completed),
        }
    }
}

/// Requests split into still-pending and decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHistory<T> {
    pub pending: Vec<T>,
    pub history: Vec<T>,
}

/// One calendar month of activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    /// Short month name, e.g. `Jan`.
    pub month: String,
    pub year: i32,
    pub deposits: Decimal,
    pub invest: Decimal,
    pub roi: Decimal,
    pub interest: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub balances: BalanceSnapshot,
    pub pending_deposits: Vec<DepositRecord>,
    pub deposit_history: Vec<DepositRecord>,
    pub pending_withdrawals: Vec<WithdrawalRecord>,
    pub withdrawal_history: Vec<WithdrawalRecord>,
    pub monthly_data: Vec<MonthlySummary>,
    /// Report of the accrual pass run before the read, if any.
    pub accrual: Option<AccrualReport>,
}

pub fn partition_deposits(deposits: Vec<DepositRecord>) -> RequestHistory<DepositRecord> {
    let (pending, history) = deposits.into_iter().partition(|d| d.status == DepositStatus::Pending);
    RequestHistory { pending, history }
}

pub fn partition_withdrawals(withdrawals: Vec<WithdrawalRecord>) -> RequestHistory<WithdrawalRecord> {
    let (pending, history) = withdrawals
        .into_iter()
        .partition(|w| w.status == WithdrawalStatus::Pending);
    RequestHistory { pending, history }
}

#[derive(Default)]
struct MonthTotals {
    deposits: Decimal,
    invest: Decimal,
    roi: Decimal,
    interest: Decimal,
}

fn bucket(months: &mut BTreeMap<(i32, u32), MonthTotals>, at: DateTime<Utc>) -> &mut MonthTotals {
    months.entry((at.year(), at.month())).or_default()
}

/// Group completed deposits, all investments and successful roi and
/// interest entries by calendar month, oldest month first.
pub fn monthly_summary(
    deposits: &[DepositRecord],
    investments: &[InvestmentRecord],
    transactions: &[TransactionRecord],
) -> Vec<MonthlySummary> {
    let mut months = BTreeMap::new();

    for deposit in deposits.iter().filter(|d| d.status == DepositStatus::Completed) {
        bucket(&mut months, deposit.created_at).deposits += deposit.amount;
    }
    for investment in investments {
        bucket(&mut months, investment.created_at).invest += investment.amount;
    }
    for entry in transactions.iter().filter(|t| t.status == TransactionStatus::Success) {
        match entry.kind {
            TransactionKind::Roi => bucket(&mut months, entry.created_at).roi += entry.amount,
            TransactionKind::Interest => bucket(&mut months, entry.created_at).interest += entry.amount,
            _ => {}
        }
    }

    months
        .into_iter()
        .map(|((year, month), totals)| MonthlySummary {
            month: month_label(month),
            year,
            deposits: totals.deposits,
            invest: totals.invest,
            roi: totals.roi,
            interest: totals.interest,
        })
        .collect()
}

#[derive(Clone)]
pub struct LedgerQuery<S: LedgerStore> {
    store: S,
    accrual: AccrualEngine<S>,
    accrue_on_dashboard: bool,
}

impl<S: LedgerStore> LedgerQuery<S> {
    pub fn new(store: S, accrue_on_dashboard: bool) -> Self {
        Self {
            accrual: AccrualEngine::new(store.clone()),
            store,
            accrue_on_dashboard,
        }
    }

    /// Everything the dashboard shows for one user.
    pub async fn dashboard_snapshot(&self, email: &str) -> Result<DashboardSnapshot, LedgerError> {
        let accrual = if self.accrue_on_dashboard {
            match self.accrual.accrue_profits().await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Accrual before dashboard read failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let mut tx = self.store.begin_read().await?;
        let result = load_dashboard(&mut tx, email).await;
        let mut snapshot = complete(tx, result).await?;
        snapshot.accrual = accrual;

        debug!("Dashboard snapshot for {}", email);
        Ok(snapshot)
    }

    pub async fn balances(&self, email: &str) -> Result<BalanceSnapshot, LedgerError> {
        let mut tx = self.store.begin_read().await?;
        let result = load_balances(&mut tx, email).await;
        complete(tx, result).await
    }

    pub async fn deposit_history(&self, email: &str) -> Result<RequestHistory<DepositRecord>, LedgerError> {
        let mut tx = self.store.begin_read().await?;
        let result = load_deposits(&mut tx, email).await;
        complete(tx, result).await
    }

    pub async fn withdrawal_history(&self, email: &str) -> Result<RequestHistory<WithdrawalRecord>, LedgerError> {
        let mut tx = self.store.begin_read().await?;
        let result = load_withdrawals(&mut tx, email).await;
        complete(tx, result).await
    }

    /// Ledger entries, newest first.
    pub async fn transaction_history(&self, email: &str, page: Page) -> Result<Vec<TransactionRecord>, LedgerError> {
        let mut tx = self.store.begin_read().await?;
        let result = load_transactions(&mut tx, email, page).await;
        complete(tx, result).await
    }

    /// Investments, newest first.
    pub async fn investments(&self, email: &str) -> Result<Vec<InvestmentRecord>, LedgerError> {
        let mut tx = self.store.begin_read().await?;
        let result = load_investments(&mut tx, email).await;
        complete(tx, result).await
    }
}

async fn find_user<T: LedgerTx>(tx: &mut T, email: &str) -> Result<UserRecord, LedgerError> {
    tx.user_by_email(email)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("user {}", email)))
}

async fn load_dashboard<T: LedgerTx>(tx: &mut T, email: &str) -> Result<DashboardSnapshot, LedgerError> {
    let user = find_user(tx, email).await?;
    let deposits = tx.deposits_for_user(user.id).await?;
    let withdrawals = tx.withdrawals_for_user(user.id).await?;
    let investments = tx.investments_for_user(user.id).await?;
    let transactions = tx.transactions_for_user(user.id, Page::all()).await?;

    let monthly_data = monthly_summary(&deposits, &investments, &transactions);
    let balances = BalanceSnapshot::new(&user, &investments);
    let deposits = partition_deposits(deposits);
    let withdrawals = partition_withdrawals(withdrawals);

    Ok(DashboardSnapshot {
        balances,
        pending_deposits: deposits.pending,
        deposit_history: deposits.history,
        pending_withdrawals: withdrawals.pending,
        withdrawal_history: withdrawals.history,
        monthly_data,
        accrual: None,
    })
}

async fn load_balances<T: LedgerTx>(tx: &mut T, email: &str) -> Result<BalanceSnapshot, LedgerError> {
    let user = find_user(tx, email).await?;
    let investments = tx.investments_for_user(user.id).await?;
    Ok(BalanceSnapshot::new(&user, &investments))
}

async fn load_deposits<T: LedgerTx>(tx: &mut T, email: &str) -> Result<RequestHistory<DepositRecord>, LedgerError> {
    let user = find_user(tx, email).await?;
    Ok(partition_deposits(tx.deposits_for_user(user.id).await?))
}

async fn load_withdrawals<T: LedgerTx>(
    tx: &mut T,
    email: &str,
) -> Result<RequestHistory<WithdrawalRecord>, LedgerError> {
    let user = find_user(tx, email).await?;
    Ok(partition_withdrawals(tx.withdrawals_for_user(user.id).await?))
}

async fn load_transactions<T: LedgerTx>(
    tx: &mut T,
    email: &str,
    page: Page,
) -> Result<Vec<TransactionRecord>, LedgerError> {
    let user = find_user(tx, email).await?;
    Ok(tx.transactions_for_user(user.id, page).await?)
}

async fn load_investments<T: LedgerTx>(tx: &mut T, email: &str) -> Result<Vec<InvestmentRecord>, LedgerError> {
    let user = find_user(tx, email).await?;
    Ok(tx.investments_for_user(user.id).await?)
}
