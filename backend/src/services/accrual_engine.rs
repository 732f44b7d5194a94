//! # Accrual Engine
//!
//! Posts daily profit for active investments and settles matured ones.
//!
//! ## Daily Profit
//!
//! ```text
//! daily_profit = (amount * roi / 100) / 365      rounded to 8 places
//! ```
//!
//! `roi` is the plan's annual return in percent. Each accrual is keyed by
//! `(investment_id, accrual_date)` where `accrual_date` is the UTC calendar
//! day of the run, so any number of runs on one day post at most one
//! accrual per investment. The key is checked under the investment's row
//! lock and backed by a unique index.
//!
//! ## Maturity
//!
//! An Active investment whose `end_date` has passed is moved to Completed
//! and its capital returns from `investment_balance` to `main_balance`,
//! recorded as a `capital_return` ledger entry.
//!
//! ## Pass Order
//!
//! ```text
//! accrue_profits()
//!     │
//!     ├── settle matured investments      (one unit of work each)
//!     │
//!     └── accrue still-running ones       (one unit of work each)
//!             failures are logged and counted, the pass continues
//! ```

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::interval;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::{
    complete, BalanceDelta, InvestmentRecord, InvestmentStatus, LedgerStore, LedgerTx, TransactionKind,
    TransactionRecord, TransactionStatus,
};
use crate::error::LedgerError;

/// Counts from one accrual pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccrualReport {
    /// UTC day the pass accrued for.
    pub accrual_date: Option<NaiveDate>,
    /// Investments that received an accrual.
    pub investments_processed: u32,
    /// Investments already accrued for the day.
    pub already_accrued: u32,
    /// Investments with nothing to accrue.
    pub skipped: u32,
    /// Investments whose unit of work failed.
    pub failed: u32,
    /// Investments settled as matured.
    pub matured: u32,
    /// Sum of posted accruals.
    pub total_accrued: Decimal,
}

enum Outcome {
    Accrued(Decimal),
    AlreadyAccrued,
    Skipped,
}

/// Daily profit for `amount` at `roi` percent per year.
pub fn daily_profit(amount: Decimal, roi: Decimal) -> Decimal {
    (amount * roi / Decimal::from(100) / Decimal::from(365)).round_dp(8)
}

/// Profit `amount` would earn over `days` days of accrual.
pub fn potential_profit(amount: Decimal, roi: Decimal, days: u32) -> Decimal {
    daily_profit(amount, roi) * Decimal::from(days)
}

#[derive(Clone)]
pub struct AccrualEngine<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> AccrualEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run a full pass for the current instant.
    pub async fn accrue_profits(&self) -> Result<AccrualReport, LedgerError> {
        self.accrue_profits_at(Utc::now()).await
    }

    /// Run a full pass as if the clock read `now`.
    pub async fn accrue_profits_at(&self, now: DateTime<Utc>) -> Result<AccrualReport, LedgerError> {
        let date = now.date_naive();
        let (matured, settle_failures) = self.settle_matured_at(now).await?;

        let mut report = AccrualReport {
            accrual_date: Some(date),
            matured,
            failed: settle_failures,
            ..AccrualReport::default()
        };

        let mut tx = self.store.begin().await?;
        let result = tx.accruing_investments(now).await.map_err(LedgerError::from);
        let candidates = complete(tx, result).await?;
        debug!("{} investments eligible for accrual on {}", candidates.len(), date);

        for investment in candidates {
            let mut tx = self.store.begin().await?;
            let result = accrue_one(&mut tx, investment.id, now, date).await;

            match complete(tx, result).await {
                Ok(Outcome::Accrued(amount)) => {
                    report.investments_processed += 1;
                    report.total_accrued += amount;
                }
                Ok(Outcome::AlreadyAccrued) | Err(LedgerError::Conflict(_)) => report.already_accrued += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!("Accrual failed for investment {}: {}", investment.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "📊 Accrual pass for {}: {} accrued ({}), {} already, {} skipped, {} failed, {} matured",
            date,
            report.investments_processed,
            report.total_accrued,
            report.already_accrued,
            report.skipped,
            report.failed,
            report.matured
        );

        Ok(report)
    }

    /// Settle every Active investment past its end date.
    ///
    /// Returns `(settled, failed)`.
    pub async fn settle_matured(&self) -> Result<(u32, u32), LedgerError> {
        self.settle_matured_at(Utc::now()).await
    }

    pub async fn settle_matured_at(&self, now: DateTime<Utc>) -> Result<(u32, u32), LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = tx.matured_investments(now).await.map_err(LedgerError::from);
        let matured = complete(tx, result).await?;

        let mut settled = 0;
        let mut failed = 0;
        for investment in matured {
            let mut tx = self.store.begin().await?;
            let result = settle_one(&mut tx, investment.id, now).await;

            match complete(tx, result).await {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Maturity settlement failed for investment {}: {}", investment.id, e);
                    failed += 1;
                }
            }
        }

        if settled > 0 {
            info!("Settled {} matured investments", settled);
        }
        Ok((settled, failed))
    }

    /// Run passes forever at `interval_secs`.
    ///
    /// This should be spawned as a background task:
    ///
    /// ```rust,ignore
    /// let engine = AccrualEngine::new(store);
    /// tokio::spawn(async move {
    ///     engine.start_accrual_loop(3600).await;
    /// });
    /// ```
    pub async fn start_accrual_loop(&self, interval_secs: u64) {
        info!("Starting accrual loop (interval: {}s)", interval_secs);

        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

        loop {
            ticker.tick().await;

            if let Err(e) = self.accrue_profits().await {
                error!("Scheduled accrual failed: {}", e);
            }
        }
    }
}

async fn accrue_one<T: LedgerTx>(
    tx: &mut T,
    investment_id: Uuid,
    now: DateTime<Utc>,
    date: NaiveDate,
) -> Result<Outcome, LedgerError> {
    let Some(investment) = tx.lock_investment(investment_id).await? else {
        return Ok(Outcome::Skipped);
    };
    if investment.status != InvestmentStatus::Active || investment.end_date <= now {
        return Ok(Outcome::Skipped);
    }
    if tx.accrual_exists(investment.id, date).await? {
        debug!("Investment {} already accrued for {}", investment.id, date);
        return Ok(Outcome::AlreadyAccrued);
    }

    let profit = daily_profit(investment.amount, investment.roi);
    if profit <= Decimal::ZERO {
        return Ok(Outcome::Skipped);
    }

    tx.adjust_user(investment.user_id, &BalanceDelta::default().earn(profit).main(profit))
        .await?;

    let mut entry = TransactionRecord::new(
        investment.user_id,
        TransactionKind::Roi,
        profit,
        TransactionStatus::Success,
        format!("Daily ROI for {} plan investment {} - {}", investment.plan_name, investment.id, date),
    );
    entry.investment_id = Some(investment.id);
    entry.accrual_date = Some(date);
    tx.insert_transaction(&entry).await?;

    debug!("Accrued {} on investment {} for {}", profit, investment.id, date);
    Ok(Outcome::Accrued(profit))
}

async fn settle_one<T: LedgerTx>(tx: &mut T, investment_id: Uuid, now: DateTime<Utc>) -> Result<bool, LedgerError> {
    let Some(investment) = tx.lock_investment(investment_id).await? else {
        return Ok(false);
    };
    if !is_settleable(&investment, now) {
        return Ok(false);
    }

    tx.set_investment_status(investment.id, InvestmentStatus::Completed).await?;
    tx.adjust_user(
        investment.user_id,
        &BalanceDelta::default()
            .investment(-investment.amount)
            .main(investment.amount),
    )
    .await?;

    let mut entry = TransactionRecord::new(
        investment.user_id,
        TransactionKind::CapitalReturn,
        investment.amount,
        TransactionStatus::Success,
        format!("Capital returned from {} plan investment {}", investment.plan_name, investment.id),
    );
    entry.investment_id = Some(investment.id);
    tx.insert_transaction(&entry).await?;

    info!("🏁 Investment {} matured, {} returned to main balance", investment.id, investment.amount);
    Ok(true)
}

fn is_settleable(investment: &InvestmentRecord, now: DateTime<Utc>) -> bool {
    investment.status == InvestmentStatus::Active && investment.end_date <= now
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, Page};
    use crate::test_support::{sample_investment, seed_user, set_balances};
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    async fn place(store: &MemoryStore, investment: &InvestmentRecord) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_investment(investment).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[test]
    fn test_daily_profit_formula() {
        assert_eq!(daily_profit(dec!(10000), dec!(15)), dec!(4.10958904));
        assert_eq!(daily_profit(dec!(3650), dec!(10)), dec!(1));
        assert_eq!(daily_profit(dec!(1000), dec!(0)), Decimal::ZERO);
        assert_eq!(potential_profit(dec!(3650), dec!(10), 30), dec!(30));
    }

    #[tokio::test]
    async fn test_thirty_days_of_accrual() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "roi@example.com", None).await;
        let start = Utc::now();
        let investment = sample_investment(user.id, dec!(10000), start);
        place(&store, &investment).await;

        let engine = AccrualEngine::new(store.clone());
        for day in 0..30 {
            let report = engine
                .accrue_profits_at(start + ChronoDuration::days(day))
                .await
                .unwrap();
            assert_eq!(report.investments_processed, 1);
        }

        let expected = potential_profit(dec!(10000), dec!(15), 30);
        assert_eq!(expected, dec!(123.2876712));

        let mut tx = store.begin().await.unwrap();
        let user = tx.user(user.id).await.unwrap().unwrap();
        assert_eq!(user.total_earn, expected);
        assert_eq!(user.main_balance, expected);

        let entries = tx.transactions_for_user(user.id, Page::all()).await.unwrap();
        assert_eq!(entries.len(), 30);
        assert!(entries.iter().all(|t| t.kind == TransactionKind::Roi && t.investment_id == Some(investment.id)));
    }

    #[tokio::test]
    async fn test_repeated_pass_is_idempotent() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "twice@example.com", None).await;
        let now = Utc::now();
        place(&store, &sample_investment(user.id, dec!(10000), now)).await;

        let engine = AccrualEngine::new(store.clone());
        engine.accrue_profits_at(now).await.unwrap();
        let again = engine.accrue_profits_at(now).await.unwrap();
        assert_eq!(again.investments_processed, 0);
        assert_eq!(again.already_accrued, 1);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.user(user.id).await.unwrap().unwrap().total_earn, dec!(4.10958904));
    }

    #[tokio::test]
    async fn test_concurrent_passes_accrue_once() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "race@example.com", None).await;
        let now = Utc::now();
        place(&store, &sample_investment(user.id, dec!(10000), now)).await;

        let first = AccrualEngine::new(store.clone());
        let second = first.clone();
        let (a, b) = tokio::join!(first.accrue_profits_at(now), second.accrue_profits_at(now));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.investments_processed + b.investments_processed, 1);
        assert_eq!(a.already_accrued + b.already_accrued, 1);
        assert_eq!(a.failed + b.failed, 0);

        let mut tx = store.begin().await.unwrap();
        let user = tx.user(user.id).await.unwrap().unwrap();
        assert_eq!(user.total_earn, dec!(4.10958904));
        assert_eq!(tx.transactions_for_user(user.id, Page::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_maturity_returns_capital() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "mature@example.com", None).await;
        set_balances(&store, user.id, Decimal::ZERO, dec!(10000)).await;

        let now = Utc::now();
        let investment = sample_investment(user.id, dec!(10000), now - ChronoDuration::days(91));
        place(&store, &investment).await;

        let engine = AccrualEngine::new(store.clone());
        let report = engine.accrue_profits_at(now).await.unwrap();
        assert_eq!(report.matured, 1);
        assert_eq!(report.investments_processed, 0);

        let again = engine.accrue_profits_at(now).await.unwrap();
        assert_eq!(again.matured, 0);

        let mut tx = store.begin().await.unwrap();
        let user = tx.user(user.id).await.unwrap().unwrap();
        assert_eq!(user.main_balance, dec!(10000));
        assert_eq!(user.investment_balance, Decimal::ZERO);

        let settled = tx.lock_investment(investment.id).await.unwrap().unwrap();
        assert_eq!(settled.status, InvestmentStatus::Completed);

        let entries = tx.transactions_for_user(user.id, Page::all()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, TransactionKind::CapitalReturn);
    }

    #[tokio::test]
    async fn test_failed_investment_does_not_abort_pass() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "ok@example.com", None).await;
        let now = Utc::now();

        // owner does not exist, so the balance adjustment fails
        let orphan = sample_investment(Uuid::new_v4(), dec!(5000), now);
        let healthy = sample_investment(user.id, dec!(5000), now + ChronoDuration::milliseconds(1));
        place(&store, &orphan).await;
        place(&store, &healthy).await;

        let report = AccrualEngine::new(store.clone()).accrue_profits_at(now).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.investments_processed, 1);
    }
}
