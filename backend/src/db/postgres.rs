//! PostgreSQL-backed [`LedgerStore`].
//!
//! Each unit of work checks one connection out of the pool and opens a
//! transaction on it:
//!
//! | Opened by | Statement |
//! |-----------|-----------|
//! | `begin` | `BEGIN ISOLATION LEVEL READ COMMITTED` |
//! | `begin_read` | `BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY` |
//!
//! Writers rely on `lock_*` reads (`SELECT ... FOR UPDATE`); readers see a
//! single snapshot across all their statements. A unit of work dropped without commit or
//! rollback detaches its connection from the pool so an open transaction
//! is never handed to another caller.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{Client, Object};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::*;
use super::queries;
use super::store::{BalanceDelta, LedgerStore, LedgerTx, Page, StoreError};
use super::Database;

/// Ledger store over the shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn open(&self, read_only: bool) -> Result<PgTx, StoreError> {
        let client = self
            .db
            .pool()
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        client.batch_execute(begin_statement(read_only)).await?;
        debug!("Unit of work started (read only: {})", read_only);

        Ok(PgTx { client: Some(client) })
    }
}

fn begin_statement(read_only: bool) -> &'static str {
    if read_only {
        "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY"
    } else {
        "BEGIN ISOLATION LEVEL READ COMMITTED"
    }
}

/// Unit of work holding one pooled connection with an open transaction.
pub struct PgTx {
    client: Option<Client>,
}

impl PgTx {
    fn client(&self) -> Result<&Client, StoreError> {
        self.client
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("unit of work already finished".to_string()))
    }

    async fn finish(mut self, statement: &str) -> Result<(), StoreError> {
        let client = self
            .client
            .take()
            .ok_or_else(|| StoreError::Unavailable("unit of work already finished".to_string()))?;

        match client.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Connection state is unknown, keep it out of the pool
                drop(Object::take(client));
                Err(StoreError::Query(e))
            }
        }
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            warn!("Unit of work dropped while open, discarding connection");
            drop(Object::take(client));
        }
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        self.open(false).await
    }

    async fn begin_read(&self) -> Result<PgTx, StoreError> {
        self.open(true).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let client = self
            .db
            .pool()
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        client.query_one("SELECT 1", &[]).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn insert_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        queries::insert_user(self.client()?, user).await
    }

    async fn user(&mut self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        queries::get_user(self.client()?, id, false).await
    }

    async fn user_by_email(&mut self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        queries::get_user_by_email(self.client()?, email).await
    }

    async fn lock_user(&mut self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        queries::get_user(self.client()?, id, true).await
    }

    async fn adjust_user(&mut self, id: Uuid, delta: &BalanceDelta) -> Result<UserRecord, StoreError> {
        queries::adjust_user(self.client()?, id, delta).await
    }

    async fn insert_referral(&mut self, referral: &ReferralRecord) -> Result<(), StoreError> {
        queries::insert_referral(self.client()?, referral).await
    }

    async fn referral_by_code(&mut self, code: &str) -> Result<Option<ReferralRecord>, StoreError> {
        queries::get_referral_by_code(self.client()?, code).await
    }

    async fn referral_for_user(&mut self, user_id: Uuid) -> Result<Option<ReferralRecord>, StoreError> {
        queries::get_referral_for_user(self.client()?, user_id).await
    }

    async fn insert_deposit(&mut self, deposit: &DepositRecord) -> Result<(), StoreError> {
        queries::insert_deposit(self.client()?, deposit).await
    }

    async fn lock_deposit(&mut self, id: Uuid) -> Result<Option<DepositRecord>, StoreError> {
        queries::lock_deposit(self.client()?, id).await
    }

    async fn set_deposit_status(&mut self, id: Uuid, status: DepositStatus) -> Result<(), StoreError> {
        queries::set_deposit_status(self.client()?, id, status).await
    }

    async fn deposits_for_user(&mut self, user_id: Uuid) -> Result<Vec<DepositRecord>, StoreError> {
        queries::get_deposits_for_user(self.client()?, user_id).await
    }

    async fn insert_withdrawal(&mut self, withdrawal: &WithdrawalRecord) -> Result<(), StoreError> {
        queries::insert_withdrawal(self.client()?, withdrawal).await
    }

    async fn lock_withdrawal(&mut self, id: Uuid) -> Result<Option<WithdrawalRecord>, StoreError> {
        queries::lock_withdrawal(self.client()?, id).await
    }

    async fn set_withdrawal_status(&mut self, id: Uuid, status: WithdrawalStatus) -> Result<(), StoreError> {
        queries::set_withdrawal_status(self.client()?, id, status).await
    }

    async fn withdrawals_for_user(&mut self, user_id: Uuid) -> Result<Vec<WithdrawalRecord>, StoreError> {
        queries::get_withdrawals_for_user(self.client()?, user_id).await
    }

    async fn insert_investment(&mut self, investment: &InvestmentRecord) -> Result<(), StoreError> {
        queries::insert_investment(self.client()?, investment).await
    }

    async fn lock_investment(&mut self, id: Uuid) -> Result<Option<InvestmentRecord>, StoreError> {
        queries::lock_investment(self.client()?, id).await
    }

    async fn set_investment_status(&mut self, id: Uuid, status: InvestmentStatus) -> Result<(), StoreError> {
        queries::set_investment_status(self.client()?, id, status).await
    }

    async fn investments_for_user(&mut self, user_id: Uuid) -> Result<Vec<InvestmentRecord>, StoreError> {
        queries::get_investments_for_user(self.client()?, user_id).await
    }

    async fn accruing_investments(&mut self, now: DateTime<Utc>) -> Result<Vec<InvestmentRecord>, StoreError> {
        queries::get_active_investments(self.client()?, now, false).await
    }

    async fn matured_investments(&mut self, now: DateTime<Utc>) -> Result<Vec<InvestmentRecord>, StoreError> {
        queries::get_active_investments(self.client()?, now, true).await
    }

    async fn count_qualifying_investments(
        &mut self,
        user_id: Uuid,
        min_amount: Decimal,
        excluding: Uuid,
    ) -> Result<i64, StoreError> {
        queries::count_qualifying_investments(self.client()?, user_id, min_amount, excluding).await
    }

    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<(), StoreError> {
        queries::insert_transaction(self.client()?, tx).await
    }

    async fn lock_transaction(&mut self, id: Uuid) -> Result<Option<TransactionRecord>, StoreError> {
        queries::lock_transaction(self.client()?, id).await
    }

    async fn lock_transaction_for_deposit(&mut self, deposit_id: Uuid) -> Result<Option<TransactionRecord>, StoreError> {
        queries::lock_transaction_for_deposit(self.client()?, deposit_id).await
    }

    async fn transactions_for_withdrawal(&mut self, withdrawal_id: Uuid) -> Result<Vec<TransactionRecord>, StoreError> {
        queries::get_transactions_for_withdrawal(self.client()?, withdrawal_id).await
    }

    async fn set_transaction_status(&mut self, id: Uuid, status: TransactionStatus) -> Result<(), StoreError> {
        queries::set_transaction_status(self.client()?, id, status).await
    }

    async fn accrual_exists(&mut self, investment_id: Uuid, date: NaiveDate) -> Result<bool, StoreError> {
        queries::accrual_exists(self.client()?, investment_id, date).await
    }

    async fn transactions_for_user(&mut self, user_id: Uuid, page: Page) -> Result<Vec<TransactionRecord>, StoreError> {
        queries::get_transactions_for_user(self.client()?, user_id, page).await
    }

    async fn insert_reward(&mut self, entry: &RewardEntry) -> Result<bool, StoreError> {
        queries::insert_reward(self.client()?, entry).await
    }

    async fn rewards_for_user(&mut self, user_id: Uuid) -> Result<Vec<RewardEntry>, StoreError> {
        queries::get_rewards_for_user(self.client()?, user_id).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.finish("COMMIT").await?;
        debug!("Unit of work committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.finish("ROLLBACK").await?;
        debug!("Unit of work rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_get_one_snapshot() {
        assert!(begin_statement(true).contains("REPEATABLE READ"));
        assert!(begin_statement(true).ends_with("READ ONLY"));
        assert_eq!(begin_statement(false), "BEGIN ISOLATION LEVEL READ COMMITTED");
    }
}
