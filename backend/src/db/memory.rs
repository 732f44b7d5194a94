//! # In-Memory Ledger Store
//!
//! A process-local [`LedgerStore`] used by the test suites and by
//! `LEDGER_STORE=memory` development runs.
//!
//! A unit of work takes the single store mutex for its whole lifetime and
//! works on a private copy of the state. Commit swaps the copy in; rollback
//! (or dropping the unit of work) throws it away. Units of work are
//! therefore fully serialized, which is stricter than the row locking the
//! PostgreSQL store provides.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::models::*;
use super::store::{BalanceDelta, LedgerStore, LedgerTx, Page, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, UserRecord>,
    referrals: HashMap<String, ReferralRecord>,
    deposits: HashMap<Uuid, DepositRecord>,
    withdrawals: HashMap<Uuid, WithdrawalRecord>,
    investments: HashMap<Uuid, InvestmentRecord>,
    transactions: Vec<TransactionRecord>,
    rewards: Vec<RewardEntry>,
}

/// Shared handle to the in-memory state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Unit of work over [`MemoryStore`].
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }

    /// Same as `begin`: the store lock already isolates every unit of work.
    async fn begin_read(&self) -> Result<MemoryTx, StoreError> {
        self.begin().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Sort newest first by `created_at`.
fn newest_first<T>(mut rows: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    rows.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    rows
}

fn missing(what: &str, id: Uuid) -> StoreError {
    StoreError::NotFound(format!("{} {}", what, id))
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn insert_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        if self.working.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate(format!("user email {}", user.email)));
        }
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user(&mut self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn user_by_email(&mut self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email = email.trim().to_lowercase();
        Ok(self.working.users.values().find(|u| u.email == email).cloned())
    }

    async fn lock_user(&mut self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        self.user(id).await
    }

    async fn adjust_user(&mut self, id: Uuid, delta: &BalanceDelta) -> Result<UserRecord, StoreError> {
        let user = self.working.users.get_mut(&id).ok_or_else(|| missing("user", id))?;
        delta.apply_to(user)?;
        Ok(user.clone())
    }

    async fn insert_referral(&mut self, referral: &ReferralRecord) -> Result<(), StoreError> {
        if self.working.referrals.contains_key(&referral.code) {
            return Err(StoreError::Duplicate(format!("referral code {}", referral.code)));
        }
        self.working.referrals.insert(referral.code.clone(), referral.clone());
        Ok(())
    }

    async fn referral_by_code(&mut self, code: &str) -> Result<Option<ReferralRecord>, StoreError> {
        Ok(self.working.referrals.get(code).cloned())
    }

    async fn referral_for_user(&mut self, user_id: Uuid) -> Result<Option<ReferralRecord>, StoreError> {
        Ok(self.working.referrals.values().find(|r| r.user_id == user_id).cloned())
    }

    async fn insert_deposit(&mut self, deposit: &DepositRecord) -> Result<(), StoreError> {
        self.working.deposits.insert(deposit.id, deposit.clone());
        Ok(())
    }

    async fn lock_deposit(&mut self, id: Uuid) -> Result<Option<DepositRecord>, StoreError> {
        Ok(self.working.deposits.get(&id).cloned())
    }

    async fn set_deposit_status(&mut self, id: Uuid, status: DepositStatus) -> Result<(), StoreError> {
        let deposit = self.working.deposits.get_mut(&id).ok_or_else(|| missing("deposit", id))?;
        deposit.status = status;
        deposit.updated_at = Utc::now();
        Ok(())
    }

    async fn deposits_for_user(&mut self, user_id: Uuid) -> Result<Vec<DepositRecord>, StoreError> {
        let rows = self.working.deposits.values().filter(|d| d.user_id == user_id).cloned().collect();
        Ok(newest_first(rows, |d| d.created_at))
    }

    async fn insert_withdrawal(&mut self, withdrawal: &WithdrawalRecord) -> Result<(), StoreError> {
        self.working.withdrawals.insert(withdrawal.id, withdrawal.clone());
        Ok(())
    }

    async fn lock_withdrawal(&mut self, id: Uuid) -> Result<Option<WithdrawalRecord>, StoreError> {
        Ok(self.working.withdrawals.get(&id).cloned())
    }

    async fn set_withdrawal_status(&mut self, id: Uuid, status: WithdrawalStatus) -> Result<(), StoreError> {
        let withdrawal = self
            .working
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| missing("withdrawal", id))?;
        withdrawal.status = status;
        withdrawal.updated_at = Utc::now();
        Ok(())
    }

    async fn withdrawals_for_user(&mut self, user_id: Uuid) -> Result<Vec<WithdrawalRecord>, StoreError> {
        let rows = self.working.withdrawals.values().filter(|w| w.user_id == user_id).cloned().collect();
        Ok(newest_first(rows, |w| w.created_at))
    }

    async fn insert_investment(&mut self, investment: &InvestmentRecord) -> Result<(), StoreError> {
        self.working.investments.insert(investment.id, investment.clone());
        Ok(())
    }

    async fn lock_investment(&mut self, id: Uuid) -> Result<Option<InvestmentRecord>, StoreError> {
        Ok(self.working.investments.get(&id).cloned())
    }

    async fn set_investment_status(&mut self, id: Uuid, status: InvestmentStatus) -> Result<(), StoreError> {
        let investment = self
            .working
            .investments
            .get_mut(&id)
            .ok_or_else(|| missing("investment", id))?;
        investment.status = status;
        Ok(())
    }

    async fn investments_for_user(&mut self, user_id: Uuid) -> Result<Vec<InvestmentRecord>, StoreError> {
        let rows = self.working.investments.values().filter(|i| i.user_id == user_id).cloned().collect();
        Ok(newest_first(rows, |i| i.created_at))
    }

    async fn accruing_investments(&mut self, now: DateTime<Utc>) -> Result<Vec<InvestmentRecord>, StoreError> {
        let mut rows: Vec<_> = self
            .working
            .investments
            .values()
            .filter(|i| i.status == InvestmentStatus::Active && i.end_date > now)
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.created_at);
        Ok(rows)
    }

    async fn matured_investments(&mut self, now: DateTime<Utc>) -> Result<Vec<InvestmentRecord>, StoreError> {
        let mut rows: Vec<_> = self
            .working
            .investments
            .values()
            .filter(|i| i.status == InvestmentStatus::Active && i.end_date <= now)
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.created_at);
        Ok(rows)
    }

    async fn count_qualifying_investments(
        &mut self,
        user_id: Uuid,
        min_amount: Decimal,
        excluding: Uuid,
    ) -> Result<i64, StoreError> {
        let count = self
            .working
            .investments
            .values()
            .filter(|i| {
                i.user_id == user_id && i.id != excluding && i.amount >= min_amount
            })
            .count();
        Ok(count as i64)
    }

    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<(), StoreError> {
        if let (TransactionKind::Roi, Some(investment_id), Some(date)) = (tx.kind, tx.investment_id, tx.accrual_date) {
            if self.accrual_exists(investment_id, date).await? {
                return Err(StoreError::Duplicate(format!(
                    "accrual for investment {} on {}",
                    investment_id, date
                )));
            }
        }
        self.working.transactions.push(tx.clone());
        Ok(())
    }

    async fn lock_transaction(&mut self, id: Uuid) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.working.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn lock_transaction_for_deposit(&mut self, deposit_id: Uuid) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self
            .working
            .transactions
            .iter()
            .find(|t| t.kind == TransactionKind::Deposit && t.deposit_id == Some(deposit_id))
            .cloned())
    }

    async fn transactions_for_withdrawal(&mut self, withdrawal_id: Uuid) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self
            .working
            .transactions
            .iter()
            .filter(|t| t.withdrawal_id == Some(withdrawal_id))
            .cloned()
            .collect())
    }

    async fn set_transaction_status(&mut self, id: Uuid, status: TransactionStatus) -> Result<(), StoreError> {
        let tx = self
            .working
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| missing("transaction", id))?;
        tx.status = status;
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn accrual_exists(&mut self, investment_id: Uuid, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.working.transactions.iter().any(|t| {
            t.kind == TransactionKind::Roi && t.investment_id == Some(investment_id) && t.accrual_date == Some(date)
        }))
    }

    async fn transactions_for_user(&mut self, user_id: Uuid, page: Page) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = self.working.transactions.iter().filter(|t| t.user_id == user_id).cloned().collect();
        let rows = newest_first(rows, |t| t.created_at).into_iter().skip(page.offset as usize);
        Ok(match page.limit {
            Some(limit) => rows.take(limit as usize).collect(),
            None => rows.collect(),
        })
    }

    async fn insert_reward(&mut self, entry: &RewardEntry) -> Result<bool, StoreError> {
        if entry.kind == RewardKind::Earned {
            if let Some(ref_id) = entry.ref_id {
                let exists = self
                    .working
                    .rewards
                    .iter()
                    .any(|r| r.kind == RewardKind::Earned && r.ref_id == Some(ref_id));
                if exists {
                    return Ok(false);
                }
            }
        }
        self.working.rewards.push(entry.clone());
        Ok(true)
    }

    async fn rewards_for_user(&mut self, user_id: Uuid) -> Result<Vec<RewardEntry>, StoreError> {
        let rows = self.working.rewards.iter().filter(|r| r.user_id == user_id).cloned().collect();
        Ok(newest_first(rows, |r| r.created_at))
    }

    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
