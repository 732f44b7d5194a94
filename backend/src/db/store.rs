//! # Ledger Store Contract
//!
//! Everything the engines need from persistence, expressed as two traits:
//!
//! - [`LedgerStore`] hands out units of work.
//! - [`LedgerTx`] is one unit of work. Reads and writes issued through it
//!   are applied together on [`LedgerTx::commit`] or not at all.
//!
//! `lock_*` reads take a row lock that is held until the unit of work
//! ends, so a status check made through them cannot be invalidated by a
//! concurrent writer before the transition is written.
//!
//! Balance changes go through [`LedgerTx::adjust_user`] as relative
//! deltas. The store applies them against the current row, never against
//! a value the caller read earlier, and refuses any delta that would take
//! `main_balance`, `investment_balance` or `reward_points` below zero.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use super::models::*;

/// Errors raised by a ledger store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Could not obtain a connection or the unit of work is closed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A guarded adjustment would break a balance invariant.
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// A unique key already exists.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A stored value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<UnknownVariant> for StoreError {
    fn from(e: UnknownVariant) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Relative change to a user's accumulators.
///
/// ```rust,ignore
/// let delta = BalanceDelta::default().main(-amount).investment(amount);
/// tx.adjust_user(user_id, &delta).await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceDelta {
    pub main_balance: Decimal,
    pub investment_balance: Decimal,
    pub total_deposit: Decimal,
    pub total_withdrawals: Decimal,
    pub total_earn: Decimal,
    pub reward_points: i64,
}

impl BalanceDelta {
    pub fn main(mut self, amount: Decimal) -> Self {
        self.main_balance += amount;
        self
    }

    pub fn investment(mut self, amount: Decimal) -> Self {
        self.investment_balance += amount;
        self
    }

    pub fn deposit(mut self, amount: Decimal) -> Self {
        self.total_deposit += amount;
        self
    }

    pub fn withdrawals(mut self, amount: Decimal) -> Self {
        self.total_withdrawals += amount;
        self
    }

    pub fn earn(mut self, amount: Decimal) -> Self {
        self.total_earn += amount;
        self
    }

    pub fn points(mut self, points: i64) -> Self {
        self.reward_points += points;
        self
    }

    /// Apply to an in-memory row, enforcing the same guards as the SQL
    /// adjustment. The row is left untouched on error.
    pub fn apply_to(&self, user: &mut UserRecord) -> Result<(), StoreError> {
        let main = user.main_balance + self.main_balance;
        let invested = user.investment_balance + self.investment_balance;
        let points = user.reward_points + self.reward_points;

        if main < Decimal::ZERO {
            return Err(StoreError::Constraint(format!(
                "main_balance of {} would become {}",
                user.id, main
            )));
        }
        if invested < Decimal::ZERO {
            return Err(StoreError::Constraint(format!(
                "investment_balance of {} would become {}",
                user.id, invested
            )));
        }
        if points < 0 {
            return Err(StoreError::Constraint(format!(
                "reward_points of {} would become {}",
                user.id, points
            )));
        }

        user.main_balance = main;
        user.investment_balance = invested;
        user.total_deposit += self.total_deposit;
        user.total_withdrawals += self.total_withdrawals;
        user.total_earn += self.total_earn;
        user.reward_points = points;
        Ok(())
    }
}

/// Pagination window for history reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: i64,
}

impl Page {
    /// Every row.
    pub fn all() -> Self {
        Self { limit: None, offset: 0 }
    }

    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: Some(limit.max(0)),
            offset: offset.max(0),
        }
    }
}

/// Source of units of work.
#[async_trait]
pub trait LedgerStore: Clone + Send + Sync + 'static {
    type Tx: LedgerTx;

    /// Open a unit of work.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Open a read-only unit of work whose reads all observe one committed
    /// snapshot. `lock_*` and write methods must not be called on it.
    async fn begin_read(&self) -> Result<Self::Tx, StoreError>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// One all-or-nothing unit of work.
///
/// List reads return newest first unless stated otherwise.
#[async_trait]
pub trait LedgerTx: Send + Sized {
    // ---- users ----

    /// Insert a user. `Duplicate` when the email is taken.
    async fn insert_user(&mut self, user: &UserRecord) -> Result<(), StoreError>;
    async fn user(&mut self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;
    async fn user_by_email(&mut self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn lock_user(&mut self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;

    /// Apply a relative delta and return the updated row.
    ///
    /// `NotFound` for an unknown user, `Constraint` when a guard refuses.
    async fn adjust_user(&mut self, id: Uuid, delta: &BalanceDelta) -> Result<UserRecord, StoreError>;

    // ---- referrals ----

    /// Insert a referral code. `Duplicate` when the code is taken.
    async fn insert_referral(&mut self, referral: &ReferralRecord) -> Result<(), StoreError>;
    async fn referral_by_code(&mut self, code: &str) -> Result<Option<ReferralRecord>, StoreError>;
    async fn referral_for_user(&mut self, user_id: Uuid) -> Result<Option<ReferralRecord>, StoreError>;

    // ---- deposits ----

    async fn insert_deposit(&mut self, deposit: &DepositRecord) -> Result<(), StoreError>;
    async fn lock_deposit(&mut self, id: Uuid) -> Result<Option<DepositRecord>, StoreError>;
    async fn set_deposit_status(&mut self, id: Uuid, status: DepositStatus) -> Result<(), StoreError>;
    async fn deposits_for_user(&mut self, user_id: Uuid) -> Result<Vec<DepositRecord>, StoreError>;

    // ---- withdrawals ----

    async fn insert_withdrawal(&mut self, withdrawal: &WithdrawalRecord) -> Result<(), StoreError>;
    async fn lock_withdrawal(&mut self, id: Uuid) -> Result<Option<WithdrawalRecord>, StoreError>;
    async fn set_withdrawal_status(&mut self, id: Uuid, status: WithdrawalStatus) -> Result<(), StoreError>;
    async fn withdrawals_for_user(&mut self, user_id: Uuid) -> Result<Vec<WithdrawalRecord>, StoreError>;

    // ---- investments ----

    async fn insert_investment(&mut self, investment: &InvestmentRecord) -> Result<(), StoreError>;
    async fn lock_investment(&mut self, id: Uuid) -> Result<Option<InvestmentRecord>, StoreError>;
    async fn set_investment_status(&mut self, id: Uuid, status: InvestmentStatus) -> Result<(), StoreError>;
    async fn investments_for_user(&mut self, user_id: Uuid) -> Result<Vec<InvestmentRecord>, StoreError>;

    /// Active investments with `end_date > now`, oldest first.
    async fn accruing_investments(&mut self, now: DateTime<Utc>) -> Result<Vec<InvestmentRecord>, StoreError>;

    /// Active investments with `end_date <= now`, oldest first.
    async fn matured_investments(&mut self, now: DateTime<Utc>) -> Result<Vec<InvestmentRecord>, StoreError>;

    /// Investments of `user_id` with `amount >= min_amount`, not counting
    /// `excluding`. Callers hold the user's lock so concurrent investments
    /// of the same user are counted in commit order.
    async fn count_qualifying_investments(
        &mut self,
        user_id: Uuid,
        min_amount: Decimal,
        excluding: Uuid,
    ) -> Result<i64, StoreError>;

    // ---- transactions ----

    /// Append a ledger entry. `Duplicate` when an accrual for the same
    /// `(investment_id, accrual_date)` exists.
    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<(), StoreError>;
    async fn lock_transaction(&mut self, id: Uuid) -> Result<Option<TransactionRecord>, StoreError>;
    async fn lock_transaction_for_deposit(&mut self, deposit_id: Uuid) -> Result<Option<TransactionRecord>, StoreError>;
    async fn transactions_for_withdrawal(&mut self, withdrawal_id: Uuid) -> Result<Vec<TransactionRecord>, StoreError>;
    async fn set_transaction_status(&mut self, id: Uuid, status: TransactionStatus) -> Result<(), StoreError>;
    async fn accrual_exists(&mut self, investment_id: Uuid, date: NaiveDate) -> Result<bool, StoreError>;
    async fn transactions_for_user(&mut self, user_id: Uuid, page: Page) -> Result<Vec<TransactionRecord>, StoreError>;

    // ---- rewards ----

    /// Append a reward entry. Returns `false`, writing nothing, when the
    /// entry is `Earned` and an earned entry with the same `ref_id` exists.
    async fn insert_reward(&mut self, entry: &RewardEntry) -> Result<bool, StoreError>;
    async fn rewards_for_user(&mut self, user_id: Uuid) -> Result<Vec<RewardEntry>, StoreError>;

    // ---- completion ----

    async fn commit(self) -> Result<(), StoreError>;
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Commit on `Ok`, roll back on `Err`.
///
/// A failed rollback is logged and the original error is returned; the
/// store discards the unit of work either way.
pub async fn complete<T, R, E>(tx: T, result: Result<R, E>) -> Result<R, E>
where
    T: LedgerTx,
    E: From<StoreError>,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_delta_builder_accumulates() {
        let delta = BalanceDelta::default().main(dec!(5)).main(dec!(-2)).points(3);
        assert_eq!(delta.main_balance, dec!(3));
        assert_eq!(delta.reward_points, 3);
        assert_eq!(delta.total_earn, Decimal::ZERO);
    }

    #[test]
    fn test_apply_guard_leaves_row_untouched() {
        let mut user = UserRecord::new("a@example.com", "A", "B", "ab", None);
        user.main_balance = dec!(10);

        let err = BalanceDelta::default()
            .main(dec!(-11))
            .deposit(dec!(1))
            .apply_to(&mut user)
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert_eq!(user.main_balance, dec!(10));
        assert_eq!(user.total_deposit, Decimal::ZERO);

        BalanceDelta::default()
            .main(dec!(-10))
            .withdrawals(dec!(10))
            .apply_to(&mut user)
            .unwrap();
        assert_eq!(user.main_balance, Decimal::ZERO);
        assert_eq!(user.total_withdrawals, dec!(10));
    }

    #[test]
    fn test_page_clamps() {
        assert_eq!(Page::new(-1, -5), Page { limit: Some(0), offset: 0 });
        assert_eq!(Page::all().limit, None);
    }
}
