//! # Database Queries
//!
//! This module contains all the SQL used by the PostgreSQL store. Each
//! function performs one statement on a client that already has a unit of
//! work open, so nothing here begins or ends a transaction.
//!
//! ## Query Organization
//!
//! Queries are grouped by the table they operate on:
//! - `*_user*` - users table
//! - `*_referral*` - referrals table
//! - `*_deposit*` / `*_withdrawal*` - request tables
//! - `*_investment*` - investments table
//! - `*_transaction*` / `accrual_exists` - audit ledger
//! - `*_reward*` - reward ledger
//!
//! ## Error Handling
//!
//! All queries return `Result<T, StoreError>`. Unique violations become
//! `Duplicate`, undecodable TEXT columns become `Corrupt`.

use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::Client;
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::store::{BalanceDelta, Page, StoreError};

// ============================================
// HELPER FUNCTIONS
// ============================================

const USER_COLUMNS: &str = "id, email, first_name, last_name, username, \
     main_balance, investment_balance, total_deposit, total_withdrawals, total_earn, \
     reward_points, referred_by_id, password_hash, created_at";

const REQUEST_COLUMNS: &str = "id, user_id, amount, currency, address, status, created_at, updated_at";

const INVESTMENT_COLUMNS: &str = "id, user_id, plan_id, plan_name, amount, roi, duration_days, \
     status, created_at, end_date";

const TRANSACTION_COLUMNS: &str = "id, user_id, kind, amount, status, description, \
     transaction_ref, payment_method, deposit_id, withdrawal_id, investment_id, \
     accrual_date, created_at, updated_at";

const REWARD_COLUMNS: &str = "id, user_id, kind, points, description, ref_id, created_at";

/// Map a unique violation to `Duplicate`, anything else to `Query`.
fn map_unique(e: tokio_postgres::Error, what: impl FnOnce() -> String) -> StoreError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StoreError::Duplicate(what())
    } else {
        StoreError::Query(e)
    }
}

/// Helper to convert a database row to UserRecord
fn row_to_user(row: &Row) -> Result<UserRecord, StoreError> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        username: row.try_get("username")?,
        main_balance: row.try_get("main_balance")?,
        investment_balance: row.try_get("investment_balance")?,
        total_deposit: row.try_get("total_deposit")?,
        total_withdrawals: row.try_get("total_withdrawals")?,
        total_earn: row.try_get("total_earn")?,
        reward_points: row.try_get("reward_points")?,
        referred_by_id: row.try_get("referred_by_id")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_referral(row: &Row) -> Result<ReferralRecord, StoreError> {
    Ok(ReferralRecord {
        code: row.try_get("code")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Helper to convert a database row to DepositRecord
fn row_to_deposit(row: &Row) -> Result<DepositRecord, StoreError> {
    Ok(DepositRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        address: row.try_get("address")?,
        status: row.try_get::<_, String>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Helper to convert a database row to WithdrawalRecord
fn row_to_withdrawal(row: &Row) -> Result<WithdrawalRecord, StoreError> {
    Ok(WithdrawalRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        address: row.try_get("address")?,
        status: row.try_get::<_, String>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Helper to convert a database row to InvestmentRecord
fn row_to_investment(row: &Row) -> Result<InvestmentRecord, StoreError> {
    Ok(InvestmentRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        plan_id: row.try_get("plan_id")?,
        plan_name: row.try_get("plan_name")?,
        amount: row.try_get("amount")?,
        roi: row.try_get("roi")?,
        duration_days: row.try_get("duration_days")?,
        status: row.try_get::<_, String>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        end_date: row.try_get("end_date")?,
    })
}

/// Helper to convert a database row to TransactionRecord
fn row_to_transaction(row: &Row) -> Result<TransactionRecord, StoreError> {
    Ok(TransactionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: row.try_get::<_, String>("kind")?.parse()?,
        amount: row.try_get("amount")?,
        status: row.try_get::<_, String>("status")?.parse()?,
        description: row.try_get("description")?,
        transaction_ref: row.try_get("transaction_ref")?,
        payment_method: row.try_get("payment_method")?,
        deposit_id: row.try_get("deposit_id")?,
        withdrawal_id: row.try_get("withdrawal_id")?,
        investment_id: row.try_get("investment_id")?,
        accrual_date: row.try_get("accrual_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_reward(row: &Row) -> Result<RewardEntry, StoreError> {
    Ok(RewardEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: row.try_get::<_, String>("kind")?.parse()?,
        points: row.try_get("points")?,
        description: row.try_get("description")?,
        ref_id: row.try_get("ref_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn collect<T>(rows: Vec<Row>, f: fn(&Row) -> Result<T, StoreError>) -> Result<Vec<T>, StoreError> {
    rows.iter().map(f).collect()
}

// ============================================
// USER QUERIES
// ============================================

pub async fn insert_user(client: &Client, user: &UserRecord) -> Result<(), StoreError> {
    debug!("Inserting user: {}", user.email);

    client
        .execute(
            r#"
            INSERT INTO users (
                id, email, first_name, last_name, username,
                main_balance, investment_balance, total_deposit, total_withdrawals, total_earn,
                reward_points, referred_by_id, password_hash, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
            &[
                &user.id,
                &user.email,
                &user.first_name,
                &user.last_name,
                &user.username,
                &user.main_balance,
                &user.investment_balance,
                &user.total_deposit,
                &user.total_withdrawals,
                &user.total_earn,
                &user.reward_points,
                &user.referred_by_id,
                &user.password_hash,
                &user.created_at,
            ],
        )
        .await
        .map_err(|e| map_unique(e, || format!("user email {}", user.email)))?;

    Ok(())
}

/// Get a user by id, optionally taking a row lock.
pub async fn get_user(client: &Client, id: Uuid, for_update: bool) -> Result<Option<UserRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM users WHERE id = $1{}",
        USER_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    client.query_opt(sql.as_str(), &[&id]).await?.as_ref().map(row_to_user).transpose()
}

pub async fn get_user_by_email(client: &Client, email: &str) -> Result<Option<UserRecord>, StoreError> {
    let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
    let email = email.trim().to_lowercase();
    client.query_opt(sql.as_str(), &[&email]).await?.as_ref().map(row_to_user).transpose()
}

/// Apply a relative delta in one guarded UPDATE.
///
/// Zero rows back means the user is missing or a guard refused; a follow-up
/// existence check tells the two apart.
pub async fn adjust_user(client: &Client, id: Uuid, delta: &BalanceDelta) -> Result<UserRecord, StoreError> {
    debug!("Adjusting user {}: {:?}", id, delta);

    let sql = format!(
        r#"
        UPDATE users
        SET
            main_balance = main_balance + $2,
            investment_balance = investment_balance + $3,
            total_deposit = total_deposit + $4,
            total_withdrawals = total_withdrawals + $5,
            total_earn = total_earn + $6,
            reward_points = reward_points + $7
        WHERE id = $1
          AND main_balance + $2 >= 0
          AND investment_balance + $3 >= 0
          AND reward_points + $7 >= 0
        RETURNING {}
        "#,
        USER_COLUMNS
    );

    let row = client
        .query_opt(
            sql.as_str(),
            &[
                &id,
                &delta.main_balance,
                &delta.investment_balance,
                &delta.total_deposit,
                &delta.total_withdrawals,
                &delta.total_earn,
                &delta.reward_points,
            ],
        )
        .await?;

    match row {
        Some(row) => row_to_user(&row),
        None => {
            let exists = client
                .query_opt("SELECT 1 FROM users WHERE id = $1", &[&id])
                .await?
                .is_some();
            if exists {
                Err(StoreError::Constraint(format!("balance guard refused adjustment of {}", id)))
            } else {
                Err(StoreError::NotFound(format!("user {}", id)))
            }
        }
    }
}

// ============================================
// REFERRAL QUERIES
// ============================================

pub async fn insert_referral(client: &Client, referral: &ReferralRecord) -> Result<(), StoreError> {
    client
        .execute(
            "INSERT INTO referrals (code, user_id, created_at) VALUES ($1, $2, $3)",
            &[&referral.code, &referral.user_id, &referral.created_at],
        )
        .await
        .map_err(|e| map_unique(e, || format!("referral code {}", referral.code)))?;
    Ok(())
}

pub async fn get_referral_by_code(client: &Client, code: &str) -> Result<Option<ReferralRecord>, StoreError> {
    client
        .query_opt("SELECT code, user_id, created_at FROM referrals WHERE code = $1", &[&code])
        .await?
        .as_ref()
        .map(row_to_referral)
        .transpose()
}

pub async fn get_referral_for_user(client: &Client, user_id: Uuid) -> Result<Option<ReferralRecord>, StoreError> {
    client
        .query_opt("SELECT code, user_id, created_at FROM referrals WHERE user_id = $1", &[&user_id])
        .await?
        .as_ref()
        .map(row_to_referral)
        .transpose()
}

// ============================================
// DEPOSIT / WITHDRAWAL QUERIES
// ============================================

pub async fn insert_deposit(client: &Client, deposit: &DepositRecord) -> Result<(), StoreError> {
    debug!("Inserting deposit {} for user {}", deposit.id, deposit.user_id);

    client
        .execute(
            r#"
            INSERT INTO deposits (id, user_id, amount, currency, address, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            &[
                &deposit.id,
                &deposit.user_id,
                &deposit.amount,
                &deposit.currency,
                &deposit.address,
                &deposit.status.as_str(),
                &deposit.created_at,
                &deposit.updated_at,
            ],
        )
        .await?;
    Ok(())
}

pub async fn lock_deposit(client: &Client, id: Uuid) -> Result<Option<DepositRecord>, StoreError> {
    let sql = format!("SELECT {} FROM deposits WHERE id = $1 FOR UPDATE", REQUEST_COLUMNS);
    client.query_opt(sql.as_str(), &[&id]).await?.as_ref().map(row_to_deposit).transpose()
}

pub async fn set_deposit_status(client: &Client, id: Uuid, status: DepositStatus) -> Result<(), StoreError> {
    let updated = client
        .execute(
            "UPDATE deposits SET status = $2, updated_at = NOW() WHERE id = $1",
            &[&id, &status.as_str()],
        )
        .await?;
    if updated == 0 {
        return Err(StoreError::NotFound(format!("deposit {}", id)));
    }
    Ok(())
}

pub async fn get_deposits_for_user(client: &Client, user_id: Uuid) -> Result<Vec<DepositRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM deposits WHERE user_id = $1 ORDER BY created_at DESC",
        REQUEST_COLUMNS
    );
    collect(client.query(sql.as_str(), &[&user_id]).await?, row_to_deposit)
}

pub async fn insert_withdrawal(client: &Client, withdrawal: &WithdrawalRecord) -> Result<(), StoreError> {
    debug!("Inserting withdrawal {} for user {}", withdrawal.id, withdrawal.user_id);

    client
        .execute(
            r#"
            INSERT INTO withdrawals (id, user_id, amount, currency, address, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            &[
                &withdrawal.id,
                &withdrawal.user_id,
                &withdrawal.amount,
                &withdrawal.currency,
                &withdrawal.address,
                &withdrawal.status.as_str(),
                &withdrawal.created_at,
                &withdrawal.updated_at,
            ],
        )
        .await?;
    Ok(())
}

pub async fn lock_withdrawal(client: &Client, id: Uuid) -> Result<Option<WithdrawalRecord>, StoreError> {
    let sql = format!("SELECT {} FROM withdrawals WHERE id = $1 FOR UPDATE", REQUEST_COLUMNS);
    client.query_opt(sql.as_str(), &[&id]).await?.as_ref().map(row_to_withdrawal).transpose()
}

pub async fn set_withdrawal_status(client: &Client, id: Uuid, status: WithdrawalStatus) -> Result<(), StoreError> {
    let updated = client
        .execute(
            "UPDATE withdrawals SET status = $2, updated_at = NOW() WHERE id = $1",
            &[&id, &status.as_str()],
        )
        .await?;
    if updated == 0 {
        return Err(StoreError::NotFound(format!("withdrawal {}", id)));
    }
    Ok(())
}

pub async fn get_withdrawals_for_user(client: &Client, user_id: Uuid) -> Result<Vec<WithdrawalRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM withdrawals WHERE user_id = $1 ORDER BY created_at DESC",
        REQUEST_COLUMNS
    );
    collect(client.query(sql.as_str(), &[&user_id]).await?, row_to_withdrawal)
}

// ============================================
// INVESTMENT QUERIES
// ============================================

pub async fn insert_investment(client: &Client, investment: &InvestmentRecord) -> Result<(), StoreError> {
    debug!("Inserting investment {} for user {}", investment.id, investment.user_id);

    client
        .execute(
            r#"
            INSERT INTO investments (
                id, user_id, plan_id, plan_name, amount, roi, duration_days,
                status, created_at, end_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
            &[
                &investment.id,
                &investment.user_id,
                &investment.plan_id,
                &investment.plan_name,
                &investment.amount,
                &investment.roi,
                &investment.duration_days,
                &investment.status.as_str(),
                &investment.created_at,
                &investment.end_date,
            ],
        )
        .await?;
    Ok(())
}

pub async fn lock_investment(client: &Client, id: Uuid) -> Result<Option<InvestmentRecord>, StoreError> {
    let sql = format!("SELECT {} FROM investments WHERE id = $1 FOR UPDATE", INVESTMENT_COLUMNS);
    client.query_opt(sql.as_str(), &[&id]).await?.as_ref().map(row_to_investment).transpose()
}

pub async fn set_investment_status(client: &Client, id: Uuid, status: InvestmentStatus) -> Result<(), StoreError> {
    let updated = client
        .execute("UPDATE investments SET status = $2 WHERE id = $1", &[&id, &status.as_str()])
        .await?;
    if updated == 0 {
        return Err(StoreError::NotFound(format!("investment {}", id)));
    }
    Ok(())
}

pub async fn get_investments_for_user(client: &Client, user_id: Uuid) -> Result<Vec<InvestmentRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM investments WHERE user_id = $1 ORDER BY created_at DESC",
        INVESTMENT_COLUMNS
    );
    collect(client.query(sql.as_str(), &[&user_id]).await?, row_to_investment)
}

/// Active investments on one side of `now`: still accruing when `matured`
/// is false, past their end date when it is true.
pub async fn get_active_investments(
    client: &Client,
    now: DateTime<Utc>,
    matured: bool,
) -> Result<Vec<InvestmentRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM investments WHERE status = $1 AND end_date {} $2 ORDER BY created_at ASC",
        INVESTMENT_COLUMNS,
        if matured { "<=" } else { ">" }
    );
    collect(
        client
            .query(sql.as_str(), &[&InvestmentStatus::Active.as_str(), &now])
            .await?,
        row_to_investment,
    )
}

pub async fn count_qualifying_investments(
    client: &Client,
    user_id: Uuid,
    min_amount: Decimal,
    excluding: Uuid,
) -> Result<i64, StoreError> {
    let row = client
        .query_one(
            r#"
            SELECT COUNT(*) AS n FROM investments
            WHERE user_id = $1 AND amount >= $2 AND id <> $3
            "#,
            &[&user_id, &min_amount, &excluding],
        )
        .await?;
    Ok(row.try_get("n")?)
}

// ============================================
// TRANSACTION QUERIES
// ============================================

/// Record a new ledger entry.
pub async fn insert_transaction(client: &Client, tx: &TransactionRecord) -> Result<(), StoreError> {
    debug!("Inserting {} transaction for user {}", tx.kind, tx.user_id);

    client
        .execute(
            r#"
            INSERT INTO transactions (
                id, user_id, kind, amount, status, description,
                transaction_ref, payment_method, deposit_id, withdrawal_id, investment_id,
                accrual_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
            &[
                &tx.id,
                &tx.user_id,
                &tx.kind.as_str(),
                &tx.amount,
                &tx.status.as_str(),
                &tx.description,
                &tx.transaction_ref,
                &tx.payment_method,
                &tx.deposit_id,
                &tx.withdrawal_id,
                &tx.investment_id,
                &tx.accrual_date,
                &tx.created_at,
                &tx.updated_at,
            ],
        )
        .await
        .map_err(|e| map_unique(e, || format!("transaction {} ({})", tx.id, tx.kind)))?;
    Ok(())
}

pub async fn lock_transaction(client: &Client, id: Uuid) -> Result<Option<TransactionRecord>, StoreError> {
    let sql = format!("SELECT {} FROM transactions WHERE id = $1 FOR UPDATE", TRANSACTION_COLUMNS);
    client.query_opt(sql.as_str(), &[&id]).await?.as_ref().map(row_to_transaction).transpose()
}

pub async fn lock_transaction_for_deposit(
    client: &Client,
    deposit_id: Uuid,
) -> Result<Option<TransactionRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE deposit_id = $1 AND kind = $2 ORDER BY created_at ASC LIMIT 1 FOR UPDATE",
        TRANSACTION_COLUMNS
    );
    client
        .query_opt(sql.as_str(), &[&deposit_id, &TransactionKind::Deposit.as_str()])
        .await?
        .as_ref()
        .map(row_to_transaction)
        .transpose()
}

pub async fn get_transactions_for_withdrawal(
    client: &Client,
    withdrawal_id: Uuid,
) -> Result<Vec<TransactionRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE withdrawal_id = $1 FOR UPDATE",
        TRANSACTION_COLUMNS
    );
    collect(client.query(sql.as_str(), &[&withdrawal_id]).await?, row_to_transaction)
}

pub async fn set_transaction_status(client: &Client, id: Uuid, status: TransactionStatus) -> Result<(), StoreError> {
    let updated = client
        .execute(
            "UPDATE transactions SET status = $2, updated_at = NOW() WHERE id = $1",
            &[&id, &status.as_str()],
        )
        .await?;
    if updated == 0 {
        return Err(StoreError::NotFound(format!("transaction {}", id)));
    }
    Ok(())
}

pub async fn accrual_exists(client: &Client, investment_id: Uuid, date: NaiveDate) -> Result<bool, StoreError> {
    let row = client
        .query_opt(
            "SELECT 1 FROM transactions WHERE kind = $1 AND investment_id = $2 AND accrual_date = $3",
            &[&TransactionKind::Roi.as_str(), &investment_id, &date],
        )
        .await?;
    Ok(row.is_some())
}

pub async fn get_transactions_for_user(
    client: &Client,
    user_id: Uuid,
    page: Page,
) -> Result<Vec<TransactionRecord>, StoreError> {
    // LIMIT NULL means no limit in PostgreSQL
    let sql = format!(
        "SELECT {} FROM transactions WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        TRANSACTION_COLUMNS
    );
    collect(
        client
            .query(sql.as_str(), &[&user_id, &page.limit, &page.offset])
            .await?,
        row_to_transaction,
    )
}

// ============================================
// REWARD QUERIES
// ============================================

/// Insert a reward entry; an earned entry that clashes on `ref_id` is
/// skipped and reported as `false`.
pub async fn insert_reward(client: &Client, entry: &RewardEntry) -> Result<bool, StoreError> {
    let inserted = client
        .execute(
            r#"
            INSERT INTO reward_ledger (id, user_id, kind, points, description, ref_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (ref_id) WHERE kind = 'earned' DO NOTHING
            "#,
            &[
                &entry.id,
                &entry.user_id,
                &entry.kind.as_str(),
                &entry.points,
                &entry.description,
                &entry.ref_id,
                &entry.created_at,
            ],
        )
        .await?;
    Ok(inserted == 1)
}

pub async fn get_rewards_for_user(client: &Client, user_id: Uuid) -> Result<Vec<RewardEntry>, StoreError> {
    let sql = format!(
        "SELECT {} FROM reward_ledger WHERE user_id = $1 ORDER BY created_at DESC",
        REWARD_COLUMNS
    );
    collect(client.query(sql.as_str(), &[&user_id]).await?, row_to_reward)
}
