//! # Transfer Engine
//!
//! Every operation that moves money in or out of a user's balances.
//!
//! ## Operations
//!
//! | Operation | Balance effect |
//! |-----------|----------------|
//! | `create_deposit` | none, records a Pending request |
//! | `approve_deposit` | approve: `main += amount`, `total_deposit += amount` |
//! | `create_withdrawal` | none, records a Pending request |
//! | `approve_withdrawal` | approve: `main -= amount`, `total_withdrawals += amount` |
//! | `create_investment` | `main -= amount`, `investment += amount` |
//! | `redeem_rewards` | `points -= n`, `main += n / 100` |
//!
//! ## Flow Example: Deposit Approval
//!
//! ```text
//! 1. begin unit of work
//!                ↓
//! 2. lock deposit transaction ──── missing / not Pending / wrong kind → error
//!                ↓
//! 3. lock linked deposit
//!                ↓
//! 4. write statuses, credit balance, referral reward
//!                ↓
//! 5. commit (any error before this rolls everything back)
//!                ↓
//! 6. notify depositor (failure only logged)
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{Permission, Principal};
use crate::config::AppConfig;
use crate::db::{
    complete, BalanceDelta, DepositRecord, DepositStatus, InvestmentRecord, InvestmentStatus, LedgerStore,
    LedgerTx, RewardEntry, RewardKind, StoreError, TransactionKind, TransactionRecord, TransactionStatus,
    UserRecord, WithdrawalRecord, WithdrawalStatus,
};
use crate::error::LedgerError;
use crate::utils::format_usd;

use super::notifier::{notify_best_effort, Notifier};
use super::plans::PlanCatalog;
use super::reward_engine::{self, MIN_REDEMPTION_POINTS, POINTS_PER_DOLLAR};

/// Decimal places the money columns hold.
const AMOUNT_SCALE: u32 = 8;

// ==========================================
// INPUTS AND RESULTS
// ==========================================

/// Admin decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

/// How an approval names the deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositRef {
    /// The Pending deposit transaction.
    Transaction(Uuid),
    /// The deposit request itself.
    Deposit(Uuid),
}

#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub email: String,
    pub amount: Decimal,
    pub currency: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub email: String,
    pub amount: Decimal,
    pub currency: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct NewInvestment {
    pub email: String,
    pub plan_id: i32,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositReceipt {
    pub deposit: DepositRecord,
    pub transaction_id: Uuid,
    pub transaction_ref: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositDecision {
    pub deposit_id: Uuid,
    pub transaction_id: Uuid,
    pub status: DepositStatus,
    pub amount: Decimal,
    pub main_balance: Decimal,
    pub referral_rewarded: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub withdrawal: WithdrawalRecord,
    pub transaction_id: Uuid,
    pub available_balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalDecision {
    pub withdrawal_id: Uuid,
    pub status: WithdrawalStatus,
    pub amount: Decimal,
    pub main_balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentReceipt {
    pub investment: InvestmentRecord,
    pub main_balance: Decimal,
    pub investment_balance: Decimal,
    pub referral_rewarded: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionReceipt {
    pub points_redeemed: i64,
    pub cash_value: Decimal,
    pub reward_points: i64,
    pub main_balance: Decimal,
}

// ==========================================
// ENGINE
// ==========================================

/// Deposits, withdrawals, investments and redemptions.
///
/// ## Usage
///
/// ```rust,ignore
/// let engine = TransferEngine::new(store, PlanCatalog::default(), notifier, config);
/// let receipt = engine.create_deposit(request).await?;
/// engine.approve_deposit(DepositRef::Transaction(receipt.transaction_id), ApprovalAction::Approve).await?;
/// ```
#[derive(Clone)]
pub struct TransferEngine<S: LedgerStore> {
    store: S,
    plans: PlanCatalog,
    notifier: Arc<dyn Notifier>,
    config: AppConfig,
}

impl<S: LedgerStore> TransferEngine<S> {
    pub fn new(store: S, plans: PlanCatalog, notifier: Arc<dyn Notifier>, config: AppConfig) -> Self {
        Self {
            store,
            plans,
            notifier,
            config,
        }
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    // ==========================================
    // DEPOSITS
    // ==========================================

    /// Record a Pending deposit and its Pending ledger entry.
    pub async fn create_deposit(&self, request: NewDeposit) -> Result<DepositReceipt, LedgerError> {
        require_amount(request.amount)?;
        require_text("currency", &request.currency)?;
        require_text("address", &request.address)?;

        let mut tx = self.store.begin().await?;
        let result = insert_deposit_request(&mut tx, &request).await;
        let receipt = complete(tx, result).await?;

        info!(
            "💰 Deposit request {} for {} ({} {})",
            receipt.deposit.id, request.email, receipt.deposit.amount, receipt.deposit.currency
        );

        let body = format!(
            "{} requested a deposit of {} {} (transaction {}). Approve or reject at {}/deposits/approve",
            request.email,
            format_usd(receipt.deposit.amount),
            receipt.deposit.currency,
            receipt.transaction_id,
            self.config.public_base_url
        );
        self.notify_admins("New deposit request", &body).await;

        Ok(receipt)
    }

    /// Approve or reject a Pending deposit.
    ///
    /// Concurrent calls for the same deposit serialize on the transaction
    /// row lock; every call after the first sees `AlreadyProcessed`.
    pub async fn approve_deposit(
        &self,
        reference: DepositRef,
        action: ApprovalAction,
    ) -> Result<DepositDecision, LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = decide_deposit(&mut tx, reference, action).await;
        let (decision, depositor) = complete(tx, result).await?;

        info!(
            "✅ Deposit {} {:?}: {} for {}",
            decision.deposit_id, decision.status, decision.amount, depositor.email
        );

        let (subject, body) = match action {
            ApprovalAction::Approve => (
                "Deposit approved",
                format!(
                    "Your deposit of {} has been credited. Main balance: {}",
                    format_usd(decision.amount),
                    format_usd(decision.main_balance)
                ),
            ),
            ApprovalAction::Reject => (
                "Deposit rejected",
                format!("Your deposit of {} was rejected.", format_usd(decision.amount)),
            ),
        };
        notify_best_effort(self.notifier.as_ref(), &depositor.email, subject, &body).await;

        Ok(decision)
    }

    // ==========================================
    // WITHDRAWALS
    // ==========================================

    /// Record a Pending withdrawal. Balances are untouched until approval.
    pub async fn create_withdrawal(&self, request: NewWithdrawal) -> Result<WithdrawalReceipt, LedgerError> {
        require_amount(request.amount)?;
        require_text("currency", &request.currency)?;
        require_text("address", &request.address)?;

        let mut tx = self.store.begin().await?;
        let result = insert_withdrawal_request(&mut tx, &request).await;
        let receipt = complete(tx, result).await?;

        info!(
            "📤 Withdrawal request {} for {} ({})",
            receipt.withdrawal.id, request.email, receipt.withdrawal.amount
        );

        let body = format!(
            "{} requested a withdrawal of {} {} to {} (withdrawal {}). Approve or reject at {}/withdrawals/approve",
            request.email,
            format_usd(receipt.withdrawal.amount),
            receipt.withdrawal.currency,
            receipt.withdrawal.address,
            receipt.withdrawal.id,
            self.config.public_base_url
        );
        self.notify_admins("New withdrawal request", &body).await;

        Ok(receipt)
    }

    /// Approve or reject a Pending withdrawal.
    ///
    /// Requires [`Permission::ApproveWithdrawals`]. An approval that would
    /// take `main_balance` below zero fails with `InsufficientBalance` and
    /// changes nothing.
    pub async fn approve_withdrawal(
        &self,
        withdrawal_id: Uuid,
        action: ApprovalAction,
        principal: &Principal,
    ) -> Result<WithdrawalDecision, LedgerError> {
        if let Err(e) = principal.require(Permission::ApproveWithdrawals) {
            warn!("Withdrawal approval refused for {}", principal.identity);
            return Err(e);
        }

        let mut tx = self.store.begin().await?;
        let result = decide_withdrawal(&mut tx, withdrawal_id, action).await;
        let (decision, user) = complete(tx, result).await?;

        info!(
            "✅ Withdrawal {} {:?} by {}: {}",
            decision.withdrawal_id, decision.status, principal.identity, decision.amount
        );

        let (subject, body) = match action {
            ApprovalAction::Approve => (
                "Withdrawal approved",
                format!(
                    "Your withdrawal of {} has been approved and is on its way.",
                    format_usd(decision.amount)
                ),
            ),
            ApprovalAction::Reject => (
                "Withdrawal rejected",
                format!(
                    "Your withdrawal of {} was rejected. Your balance is unchanged.",
                    format_usd(decision.amount)
                ),
            ),
        };
        notify_best_effort(self.notifier.as_ref(), &user.email, subject, &body).await;

        Ok(decision)
    }

    // ==========================================
    // INVESTMENTS
    // ==========================================

    /// Move funds from the main balance into a new Active investment.
    pub async fn create_investment(&self, request: NewInvestment) -> Result<InvestmentReceipt, LedgerError> {
        require_amount(request.amount)?;

        let plan = self
            .plans
            .get(request.plan_id)
            .ok_or(LedgerError::InvalidPlan(request.plan_id))?;

        if !plan.accepts(request.amount) {
            return Err(LedgerError::InvalidInput(match plan.max_amount {
                Some(max) => format!(
                    "{} plan accepts {} to {}",
                    plan.name,
                    format_usd(plan.min_amount),
                    format_usd(max)
                ),
                None => format!("Minimum investment for {} is {}", plan.name, format_usd(plan.min_amount)),
            }));
        }

        // Stamped again once the user lock is held
        let now = Utc::now();
        let investment = InvestmentRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            plan_id: plan.id,
            plan_name: plan.name.to_string(),
            amount: request.amount,
            roi: plan.roi,
            duration_days: plan.duration_days,
            status: InvestmentStatus::Active,
            created_at: now,
            end_date: now + Duration::days(i64::from(plan.duration_days)),
        };

        let mut tx = self.store.begin().await?;
        let result = insert_investment(&mut tx, &request.email, investment).await;
        let receipt = complete(tx, result).await?;

        info!(
            "📈 Investment {} in {} for {}: {}",
            receipt.investment.id, receipt.investment.plan_name, request.email, receipt.investment.amount
        );

        Ok(receipt)
    }

    // ==========================================
    // REWARDS
    // ==========================================

    /// Convert reward points to cash at 100 points per dollar.
    pub async fn redeem_rewards(&self, email: &str, points: i64) -> Result<RedemptionReceipt, LedgerError> {
        if points < MIN_REDEMPTION_POINTS {
            return Err(LedgerError::BelowMinimum {
                minimum: MIN_REDEMPTION_POINTS,
                requested: points,
            });
        }

        let mut tx = self.store.begin().await?;
        let result = redeem(&mut tx, email, points).await;
        let receipt = complete(tx, result).await?;

        info!(
            "🎁 {} redeemed {} points for {}",
            email, receipt.points_redeemed, receipt.cash_value
        );

        Ok(receipt)
    }

    async fn notify_admins(&self, subject: &str, body: &str) {
        if self.config.admin_identities.is_empty() {
            warn!("No admin identities configured, '{}' not delivered", subject);
            return;
        }
        for admin in &self.config.admin_identities {
            notify_best_effort(self.notifier.as_ref(), admin, subject, body).await;
        }
    }
}

// ==========================================
// UNIT OF WORK BODIES
// ==========================================

fn require_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidInput(format!("amount must be positive, got {}", amount)));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(LedgerError::InvalidInput(format!(
            "amount {} has more than {} decimal places",
            amount, AMOUNT_SCALE
        )));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(LedgerError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}

/// Find a user by email and take their row lock.
async fn lock_user_by_email<T: LedgerTx>(tx: &mut T, email: &str) -> Result<UserRecord, LedgerError> {
    let user = tx
        .user_by_email(email)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("user {}", email)))?;
    tx.lock_user(user.id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("user {}", email)))
}

/// Translate a refused balance guard into `InsufficientBalance`.
fn balance_guard(err: StoreError, available: Decimal, requested: Decimal) -> LedgerError {
    match err {
        StoreError::Constraint(_) => LedgerError::InsufficientBalance { available, requested },
        other => other.into(),
    }
}

async fn insert_deposit_request<T: LedgerTx>(tx: &mut T, request: &NewDeposit) -> Result<DepositReceipt, LedgerError> {
    let user = lock_user_by_email(tx, &request.email).await?;
    let now = Utc::now();

    let deposit = DepositRecord {
        id: Uuid::new_v4(),
        user_id: user.id,
        amount: request.amount,
        currency: request.currency.trim().to_string(),
        address: request.address.trim().to_string(),
        status: DepositStatus::Pending,
        created_at: now,
        updated_at: now,
    };
    tx.insert_deposit(&deposit).await?;

    let transaction_ref = Uuid::new_v4().to_string();
    let mut entry = TransactionRecord::new(
        user.id,
        TransactionKind::Deposit,
        deposit.amount,
        TransactionStatus::Pending,
        format!("Deposit of {} {}", deposit.amount, deposit.currency),
    );
    entry.deposit_id = Some(deposit.id);
    entry.transaction_ref = Some(transaction_ref.clone());
    entry.payment_method = Some(deposit.currency.clone());
    tx.insert_transaction(&entry).await?;

    Ok(DepositReceipt {
        deposit,
        transaction_id: entry.id,
        transaction_ref,
    })
}

async fn decide_deposit<T: LedgerTx>(
    tx: &mut T,
    reference: DepositRef,
    action: ApprovalAction,
) -> Result<(DepositDecision, UserRecord), LedgerError> {
    let entry = match reference {
        DepositRef::Transaction(id) => tx.lock_transaction(id).await?,
        DepositRef::Deposit(id) => tx.lock_transaction_for_deposit(id).await?,
    }
    .ok_or_else(|| LedgerError::NotFound(format!("deposit transaction {:?}", reference)))?;

    if entry.status != TransactionStatus::Pending {
        warn!("Deposit transaction {} already {}", entry.id, entry.status);
        return Err(LedgerError::AlreadyProcessed(format!(
            "transaction {} is {}",
            entry.id, entry.status
        )));
    }
    if entry.kind != TransactionKind::Deposit {
        return Err(LedgerError::InvalidType(format!(
            "transaction {} is a {} entry",
            entry.id, entry.kind
        )));
    }

    let deposit_id = entry
        .deposit_id
        .ok_or_else(|| LedgerError::InvalidState(format!("transaction {} has no linked deposit", entry.id)))?;
    let deposit = tx
        .lock_deposit(deposit_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("deposit {}", deposit_id)))?;
    if deposit.status != DepositStatus::Pending {
        return Err(LedgerError::AlreadyProcessed(format!(
            "deposit {} is {}",
            deposit.id, deposit.status
        )));
    }

    let depositor = tx
        .lock_user(entry.user_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("user {}", entry.user_id)))?;

    let (status, updated, rewarded) = match action {
        ApprovalAction::Approve => {
            tx.set_transaction_status(entry.id, TransactionStatus::Success).await?;
            tx.set_deposit_status(deposit.id, DepositStatus::Completed).await?;
            let updated = tx
                .adjust_user(
                    depositor.id,
                    &BalanceDelta::default().main(entry.amount).deposit(entry.amount),
                )
                .await?;
            let rewarded = reward_engine::award_deposit_referral(tx, &depositor, &deposit).await?;
            (DepositStatus::Completed, updated, rewarded)
        }
        ApprovalAction::Reject => {
            tx.set_transaction_status(entry.id, TransactionStatus::Failed).await?;
            tx.set_deposit_status(deposit.id, DepositStatus::Failed).await?;
            (DepositStatus::Failed, depositor, false)
        }
    };

    Ok((
        DepositDecision {
            deposit_id: deposit.id,
            transaction_id: entry.id,
            status,
            amount: entry.amount,
            main_balance: updated.main_balance,
            referral_rewarded: rewarded,
        },
        updated,
    ))
}

async fn insert_withdrawal_request<T: LedgerTx>(
    tx: &mut T,
    request: &NewWithdrawal,
) -> Result<WithdrawalReceipt, LedgerError> {
    let user = lock_user_by_email(tx, &request.email).await?;

    let available = user.available_balance();
    if available < request.amount {
        warn!(
            "Withdrawal of {} refused for {}: available {}",
            request.amount, user.email, available
        );
        return Err(LedgerError::InsufficientBalance {
            available,
            requested: request.amount,
        });
    }

    let now = Utc::now();
    let withdrawal = WithdrawalRecord {
        id: Uuid::new_v4(),
        user_id: user.id,
        amount: request.amount,
        currency: request.currency.trim().to_string(),
        address: request.address.trim().to_string(),
        status: WithdrawalStatus::Pending,
        created_at: now,
        updated_at: now,
    };
    tx.insert_withdrawal(&withdrawal).await?;

    let mut entry = TransactionRecord::new(
        user.id,
        TransactionKind::Withdrawal,
        withdrawal.amount,
        TransactionStatus::Pending,
        format!("Withdrawal of {} {} to {}", withdrawal.amount, withdrawal.currency, withdrawal.address),
    );
    entry.withdrawal_id = Some(withdrawal.id);
    entry.transaction_ref = Some(format!("WD-{}", withdrawal.id.simple()));
    entry.payment_method = Some(withdrawal.currency.clone());
    tx.insert_transaction(&entry).await?;

    Ok(WithdrawalReceipt {
        withdrawal,
        transaction_id: entry.id,
        available_balance: available,
    })
}

async fn decide_withdrawal<T: LedgerTx>(
    tx: &mut T,
    withdrawal_id: Uuid,
    action: ApprovalAction,
) -> Result<(WithdrawalDecision, UserRecord), LedgerError> {
    let withdrawal = tx
        .lock_withdrawal(withdrawal_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {}", withdrawal_id)))?;

    if withdrawal.status != WithdrawalStatus::Pending {
        return Err(LedgerError::InvalidState(format!(
            "withdrawal {} is {}",
            withdrawal.id, withdrawal.status
        )));
    }

    let user = tx
        .lock_user(withdrawal.user_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("user {}", withdrawal.user_id)))?;

    let (withdrawal_status, entry_status) = match action {
        ApprovalAction::Approve => (WithdrawalStatus::Completed, TransactionStatus::Success),
        ApprovalAction::Reject => (WithdrawalStatus::Rejected, TransactionStatus::Failed),
    };

    tx.set_withdrawal_status(withdrawal.id, withdrawal_status).await?;
    for entry in tx.transactions_for_withdrawal(withdrawal.id).await? {
        if entry.status == TransactionStatus::Pending {
            tx.set_transaction_status(entry.id, entry_status).await?;
        }
    }

    let updated = match action {
        ApprovalAction::Approve => tx
            .adjust_user(
                user.id,
                &BalanceDelta::default()
                    .main(-withdrawal.amount)
                    .withdrawals(withdrawal.amount),
            )
            .await
            .map_err(|e| balance_guard(e, user.main_balance, withdrawal.amount))?,
        ApprovalAction::Reject => user,
    };

    Ok((
        WithdrawalDecision {
            withdrawal_id: withdrawal.id,
            status: withdrawal_status,
            amount: withdrawal.amount,
            main_balance: updated.main_balance,
        },
        updated,
    ))
}

async fn insert_investment<T: LedgerTx>(
    tx: &mut T,
    email: &str,
    mut investment: InvestmentRecord,
) -> Result<InvestmentReceipt, LedgerError> {
    let user = lock_user_by_email(tx, email).await?;
    investment.user_id = user.id;

    let term = investment.end_date - investment.created_at;
    investment.created_at = Utc::now();
    investment.end_date = investment.created_at + term;

    if user.main_balance < investment.amount {
        warn!(
            "Investment of {} refused for {}: main balance {}",
            investment.amount, user.email, user.main_balance
        );
        return Err(LedgerError::InsufficientBalance {
            available: user.main_balance,
            requested: investment.amount,
        });
    }

    let updated = tx
        .adjust_user(
            user.id,
            &BalanceDelta::default()
                .main(-investment.amount)
                .investment(investment.amount),
        )
        .await
        .map_err(|e| balance_guard(e, user.main_balance, investment.amount))?;

    tx.insert_investment(&investment).await?;

    let mut entry = TransactionRecord::new(
        user.id,
        TransactionKind::Investment,
        investment.amount,
        TransactionStatus::Completed,
        format!("Investment in {} plan", investment.plan_name),
    );
    entry.investment_id = Some(investment.id);
    entry.transaction_ref = Some(format!("INV-{}", investment.created_at.timestamp_millis()));
    entry.payment_method = Some("Balance".to_string());
    tx.insert_transaction(&entry).await?;

    let rewarded = reward_engine::award_investment_referral(tx, &user, &investment).await?;

    Ok(InvestmentReceipt {
        investment,
        main_balance: updated.main_balance,
        investment_balance: updated.investment_balance,
        referral_rewarded: rewarded,
    })
}

async fn redeem<T: LedgerTx>(tx: &mut T, email: &str, points: i64) -> Result<RedemptionReceipt, LedgerError> {
    let user = lock_user_by_email(tx, email).await?;

    if points > user.reward_points {
        return Err(LedgerError::InsufficientPoints {
            available: user.reward_points,
            requested: points,
        });
    }

    let mut cash_value = Decimal::from(points) / Decimal::from(POINTS_PER_DOLLAR);
    cash_value.rescale(2);

    let updated = tx
        .adjust_user(user.id, &BalanceDelta::default().points(-points).main(cash_value))
        .await
        .map_err(|e| match e {
            StoreError::Constraint(_) => LedgerError::InsufficientPoints {
                available: user.reward_points,
                requested: points,
            },
            other => other.into(),
        })?;

    tx.insert_reward(&RewardEntry {
        id: Uuid::new_v4(),
        user_id: user.id,
        kind: RewardKind::Redeemed,
        points: -points,
        description: format!("Redeemed {} points for {}", points, format_usd(cash_value)),
        ref_id: None,
        created_at: Utc::now(),
    })
    .await?;

    tx.insert_transaction(&TransactionRecord::new(
        user.id,
        TransactionKind::RewardRedemption,
        cash_value,
        TransactionStatus::Success,
        format!("Redeemed {} reward points", points),
    ))
    .await?;

    Ok(RedemptionReceipt {
        points_redeemed: points,
        cash_value,
        reward_points: updated.reward_points,
        main_balance: updated.main_balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessPolicy;
    use crate::db::{MemoryStore, Page};
    use crate::test_support::{
        fund, referred_pair, sample_investment, seed_user, set_balances, FailingNotifier, RecordingNotifier,
    };
    use rust_decimal_macros::dec;

    fn engine(store: &MemoryStore, notifier: Arc<dyn Notifier>) -> TransferEngine<MemoryStore> {
        let config = AppConfig {
            admin_identities: vec!["admin@example.com".to_string()],
            ..AppConfig::default()
        };
        TransferEngine::new(store.clone(), PlanCatalog::default(), notifier, config)
    }

    fn admin() -> Principal {
        AccessPolicy::new(&["admin@example.com".to_string()]).resolve("admin@example.com")
    }

    fn deposit_request(email: &str, amount: Decimal) -> NewDeposit {
        NewDeposit {
            email: email.to_string(),
            amount,
            currency: "USDT".to_string(),
            address: "TXYZ".to_string(),
        }
    }

    fn withdrawal_request(email: &str, amount: Decimal) -> NewWithdrawal {
        NewWithdrawal {
            email: email.to_string(),
            amount,
            currency: "USDT".to_string(),
            address: "TXYZ".to_string(),
        }
    }

    async fn reload(store: &MemoryStore, id: Uuid) -> UserRecord {
        let mut tx = store.begin().await.unwrap();
        tx.user(id).await.unwrap().unwrap()
    }

    // ---- deposits ----

    #[tokio::test]
    async fn test_deposit_approve_then_reject_scenario() {
        let store = MemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(&store, notifier.clone());
        let (referrer, user) = referred_pair(&store).await;

        let first = engine.create_deposit(deposit_request(&user.email, dec!(500))).await.unwrap();
        let second = engine.create_deposit(deposit_request(&user.email, dec!(200))).await.unwrap();
        assert_eq!(reload(&store, user.id).await.main_balance, Decimal::ZERO);

        let decision = engine
            .approve_deposit(DepositRef::Transaction(first.transaction_id), ApprovalAction::Approve)
            .await
            .unwrap();
        assert_eq!(decision.status, DepositStatus::Completed);
        assert!(decision.referral_rewarded);

        let rejected = engine
            .approve_deposit(DepositRef::Deposit(second.deposit.id), ApprovalAction::Reject)
            .await
            .unwrap();
        assert_eq!(rejected.status, DepositStatus::Failed);

        let user = reload(&store, user.id).await;
        assert_eq!(user.main_balance, dec!(500));
        assert_eq!(user.total_deposit, dec!(500));
        assert_eq!(reload(&store, referrer.id).await.reward_points, 200);

        let mut tx = store.begin().await.unwrap();
        let deposits = tx.deposits_for_user(user.id).await.unwrap();
        assert!(deposits.iter().any(|d| d.id == first.deposit.id && d.status == DepositStatus::Completed));
        assert!(deposits.iter().any(|d| d.id == second.deposit.id && d.status == DepositStatus::Failed));
        drop(tx);

        // admin alerts for both requests plus two depositor notices
        let sent = notifier.sent();
        assert_eq!(sent.iter().filter(|(to, _)| to == "admin@example.com").count(), 2);
        assert!(sent.iter().any(|(to, subject)| to == &user.email && subject == "Deposit approved"));
    }

    #[tokio::test]
    async fn test_deposit_reapproval_is_already_processed() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let user = seed_user(&store, "bob@example.com", None).await;

        let receipt = engine.create_deposit(deposit_request(&user.email, dec!(100))).await.unwrap();
        let reference = DepositRef::Transaction(receipt.transaction_id);
        engine.approve_deposit(reference, ApprovalAction::Approve).await.unwrap();

        let err = engine.approve_deposit(reference, ApprovalAction::Approve).await.unwrap_err();
        assert_eq!(err.kind(), "ALREADY_PROCESSED");
        let err = engine.approve_deposit(reference, ApprovalAction::Reject).await.unwrap_err();
        assert_eq!(err.kind(), "ALREADY_PROCESSED");

        assert_eq!(reload(&store, user.id).await.main_balance, dec!(100));
    }

    #[tokio::test]
    async fn test_concurrent_deposit_approvals_apply_once() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let (referrer, user) = referred_pair(&store).await;

        let receipt = engine.create_deposit(deposit_request(&user.email, dec!(300))).await.unwrap();
        let reference = DepositRef::Transaction(receipt.transaction_id);

        let (a, b) = tokio::join!(
            engine.approve_deposit(reference, ApprovalAction::Approve),
            engine.approve_deposit(reference, ApprovalAction::Approve),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let err = a.err().or(b.err()).unwrap();
        assert_eq!(err.kind(), "ALREADY_PROCESSED");

        assert_eq!(reload(&store, user.id).await.main_balance, dec!(300));
        assert_eq!(reload(&store, referrer.id).await.reward_points, 200);
    }

    #[tokio::test]
    async fn test_approve_unknown_or_wrong_kind() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let user = seed_user(&store, "carol@example.com", None).await;

        let err = engine
            .approve_deposit(DepositRef::Transaction(Uuid::new_v4()), ApprovalAction::Approve)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");

        let mut tx = store.begin().await.unwrap();
        let entry = TransactionRecord::new(
            user.id,
            TransactionKind::Withdrawal,
            dec!(10),
            TransactionStatus::Pending,
            "not a deposit",
        );
        tx.insert_transaction(&entry).await.unwrap();
        tx.commit().await.unwrap();

        let err = engine
            .approve_deposit(DepositRef::Transaction(entry.id), ApprovalAction::Approve)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_TYPE");
    }

    #[tokio::test]
    async fn test_create_deposit_validation() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));

        let err = engine.create_deposit(deposit_request("x@example.com", dec!(0))).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");

        let err = engine.create_deposit(deposit_request("x@example.com", dec!(10))).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_amounts_beyond_column_scale_rejected() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let user = seed_user(&store, "fran@example.com", None).await;
        fund(&store, user.id, dec!(5000)).await;

        let err = engine
            .create_deposit(deposit_request(&user.email, dec!(0.000000001)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");

        let err = engine
            .create_withdrawal(withdrawal_request(&user.email, dec!(10.123456789)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");

        let err = engine
            .create_investment(NewInvestment {
                email: user.email.clone(),
                plan_id: 1,
                amount: dec!(1000.000000001),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");

        // Trailing zeros past the eighth place are fine
        engine
            .create_deposit(deposit_request(&user.email, dec!(12.50000000000)))
            .await
            .unwrap();
        assert_eq!(reload(&store, user.id).await.main_balance, dec!(5000));
    }

    // ---- withdrawals ----

    #[tokio::test]
    async fn test_withdrawal_exceeding_available_balance() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let user = seed_user(&store, "dave@example.com", None).await;
        set_balances(&store, user.id, dec!(1000), dec!(600)).await;

        let err = engine
            .create_withdrawal(withdrawal_request(&user.email, dec!(500)))
            .await
            .unwrap_err();
        match err {
            LedgerError::InsufficientBalance { available, requested } => {
                assert_eq!(available, dec!(400));
                assert_eq!(requested, dec!(500));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.withdrawals_for_user(user.id).await.unwrap().is_empty());
        assert!(tx.transactions_for_user(user.id, Page::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_withdrawal_approve_and_reject() {
        let store = MemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(&store, notifier.clone());
        let user = seed_user(&store, "erin@example.com", None).await;
        fund(&store, user.id, dec!(1000)).await;

        let first = engine.create_withdrawal(withdrawal_request(&user.email, dec!(300))).await.unwrap();
        let second = engine.create_withdrawal(withdrawal_request(&user.email, dec!(200))).await.unwrap();
        assert_eq!(reload(&store, user.id).await.main_balance, dec!(1000));

        let decision = engine
            .approve_withdrawal(first.withdrawal.id, ApprovalAction::Approve, &admin())
            .await
            .unwrap();
        assert_eq!(decision.status, WithdrawalStatus::Completed);
        assert_eq!(decision.main_balance, dec!(700));

        engine
            .approve_withdrawal(second.withdrawal.id, ApprovalAction::Reject, &admin())
            .await
            .unwrap();

        let user = reload(&store, user.id).await;
        assert_eq!(user.main_balance, dec!(700));
        assert_eq!(user.total_withdrawals, dec!(300));

        let mut tx = store.begin().await.unwrap();
        let entries = tx.transactions_for_withdrawal(first.withdrawal.id).await.unwrap();
        assert_eq!(entries[0].status, TransactionStatus::Success);
        let entries = tx.transactions_for_withdrawal(second.withdrawal.id).await.unwrap();
        assert_eq!(entries[0].status, TransactionStatus::Failed);
        drop(tx);

        let err = engine
            .approve_withdrawal(first.withdrawal.id, ApprovalAction::Approve, &admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn test_withdrawal_approval_requires_capability() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let user = seed_user(&store, "frank@example.com", None).await;
        fund(&store, user.id, dec!(100)).await;
        let receipt = engine.create_withdrawal(withdrawal_request(&user.email, dec!(50))).await.unwrap();

        let outsider = AccessPolicy::new(&["admin@example.com".to_string()]).resolve("frank@example.com");
        let err = engine
            .approve_withdrawal(receipt.withdrawal.id, ApprovalAction::Approve, &outsider)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UNAUTHORIZED");
        assert_eq!(reload(&store, user.id).await.main_balance, dec!(100));
    }

    #[tokio::test]
    async fn test_withdrawal_approval_rolls_back_when_balance_short() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let user = seed_user(&store, "gina@example.com", None).await;
        fund(&store, user.id, dec!(100)).await;

        let receipt = engine.create_withdrawal(withdrawal_request(&user.email, dec!(80))).await.unwrap();
        set_balances(&store, user.id, dec!(50), Decimal::ZERO).await;

        let err = engine
            .approve_withdrawal(receipt.withdrawal.id, ApprovalAction::Approve, &admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INSUFFICIENT_BALANCE");

        let mut tx = store.begin().await.unwrap();
        let withdrawal = tx.lock_withdrawal(receipt.withdrawal.id).await.unwrap().unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
        assert_eq!(tx.user(user.id).await.unwrap().unwrap().main_balance, dec!(50));
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_approval() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(FailingNotifier));
        let user = seed_user(&store, "hank@example.com", None).await;
        fund(&store, user.id, dec!(100)).await;

        let receipt = engine.create_withdrawal(withdrawal_request(&user.email, dec!(40))).await.unwrap();
        let decision = engine
            .approve_withdrawal(receipt.withdrawal.id, ApprovalAction::Approve, &admin())
            .await
            .unwrap();

        assert_eq!(decision.main_balance, dec!(60));
        assert_eq!(reload(&store, user.id).await.main_balance, dec!(60));
    }

    // ---- investments ----

    #[tokio::test]
    async fn test_investment_conserves_funds() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let (referrer, user) = referred_pair(&store).await;
        fund(&store, user.id, dec!(12000)).await;

        let receipt = engine
            .create_investment(NewInvestment {
                email: user.email.clone(),
                plan_id: 3,
                amount: dec!(10000),
            })
            .await
            .unwrap();

        assert_eq!(receipt.main_balance, dec!(2000));
        assert_eq!(receipt.investment_balance, dec!(10000));
        assert_eq!(receipt.main_balance + receipt.investment_balance, dec!(12000));
        assert_eq!(receipt.investment.roi, dec!(15));
        assert_eq!(receipt.investment.end_date - receipt.investment.created_at, Duration::days(90));
        assert!(receipt.referral_rewarded);
        assert_eq!(reload(&store, referrer.id).await.reward_points, 300);

        let mut tx = store.begin().await.unwrap();
        let entries = tx.transactions_for_user(user.id, Page::all()).await.unwrap();
        let entry = entries.iter().find(|t| t.kind == TransactionKind::Investment).unwrap();
        assert_eq!(entry.investment_id, Some(receipt.investment.id));
        assert_eq!(entry.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_second_investment_earns_no_referral() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let (referrer, user) = referred_pair(&store).await;
        fund(&store, user.id, dec!(3000)).await;

        let request = NewInvestment {
            email: user.email.clone(),
            plan_id: 1,
            amount: dec!(1000),
        };
        assert!(engine.create_investment(request.clone()).await.unwrap().referral_rewarded);
        assert!(!engine.create_investment(request).await.unwrap().referral_rewarded);
        assert_eq!(reload(&store, referrer.id).await.reward_points, 300);
    }

    #[tokio::test]
    async fn test_investment_stamped_earlier_but_committed_later_earns_nothing() {
        let store = MemoryStore::new();
        let (referrer, user) = referred_pair(&store).await;
        fund(&store, user.id, dec!(3000)).await;

        let t1 = Utc::now();
        let a = sample_investment(Uuid::nil(), dec!(1000), t1);
        let b = sample_investment(Uuid::nil(), dec!(1000), t1 + Duration::milliseconds(5));

        let mut tx = store.begin().await.unwrap();
        let receipt_b = insert_investment(&mut tx, &user.email, b).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let receipt_a = insert_investment(&mut tx, &user.email, a).await.unwrap();
        tx.commit().await.unwrap();

        assert!(receipt_b.referral_rewarded);
        assert!(!receipt_a.referral_rewarded);
        assert!(receipt_a.investment.created_at >= receipt_b.investment.created_at);
        assert_eq!(reload(&store, referrer.id).await.reward_points, 300);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.rewards_for_user(referrer.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_investments_reward_referrer_once() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let (referrer, user) = referred_pair(&store).await;
        fund(&store, user.id, dec!(3000)).await;

        let request = NewInvestment {
            email: user.email.clone(),
            plan_id: 1,
            amount: dec!(1000),
        };
        let (a, b) = tokio::join!(
            engine.create_investment(request.clone()),
            engine.create_investment(request.clone()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!([a.referral_rewarded, b.referral_rewarded].iter().filter(|r| **r).count(), 1);
        assert_eq!(reload(&store, referrer.id).await.reward_points, 300);

        let after = reload(&store, user.id).await;
        assert_eq!(after.main_balance, dec!(1000));
        assert_eq!(after.investment_balance, dec!(2000));
    }

    #[tokio::test]
    async fn test_investment_rejections() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let user = seed_user(&store, "ivy@example.com", None).await;
        fund(&store, user.id, dec!(1500)).await;

        let invest = |plan_id, amount| NewInvestment {
            email: user.email.clone(),
            plan_id,
            amount,
        };

        let err = engine.create_investment(invest(9, dec!(1000))).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_PLAN");

        let err = engine.create_investment(invest(1, dec!(999))).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");

        let err = engine.create_investment(invest(2, dec!(5000))).await.unwrap_err();
        assert_eq!(err.kind(), "INSUFFICIENT_BALANCE");

        assert_eq!(reload(&store, user.id).await.main_balance, dec!(1500));
    }

    // ---- redemption ----

    #[tokio::test]
    async fn test_redeem_500_points_for_five_dollars() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let user = seed_user(&store, "jack@example.com", None).await;

        let mut tx = store.begin().await.unwrap();
        tx.adjust_user(user.id, &BalanceDelta::default().points(700)).await.unwrap();
        tx.commit().await.unwrap();

        let receipt = engine.redeem_rewards(&user.email, 500).await.unwrap();
        assert_eq!(receipt.cash_value, dec!(5.00));
        assert_eq!(receipt.cash_value.to_string(), "5.00");
        assert_eq!(receipt.reward_points, 200);
        assert_eq!(receipt.main_balance, dec!(5));

        let mut tx = store.begin().await.unwrap();
        let ledger = tx.rewards_for_user(user.id).await.unwrap();
        assert_eq!(ledger[0].kind, RewardKind::Redeemed);
        assert_eq!(ledger[0].points, -500);
        let entries = tx.transactions_for_user(user.id, Page::all()).await.unwrap();
        assert_eq!(entries[0].kind, TransactionKind::RewardRedemption);
    }

    #[tokio::test]
    async fn test_redeem_rejections() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingNotifier::default()));
        let user = seed_user(&store, "kate@example.com", None).await;

        let mut tx = store.begin().await.unwrap();
        tx.adjust_user(user.id, &BalanceDelta::default().points(150)).await.unwrap();
        tx.commit().await.unwrap();

        let err = engine.redeem_rewards(&user.email, 99).await.unwrap_err();
        assert_eq!(err.kind(), "BELOW_MINIMUM");

        let err = engine.redeem_rewards(&user.email, 200).await.unwrap_err();
        assert_eq!(err.kind(), "INSUFFICIENT_POINTS");

        assert_eq!(reload(&store, user.id).await.reward_points, 150);
    }
}
