//! # Reward Engine
//!
//! Referral rewards for the referrer of a user who deposits or invests.
//!
//! ## Rules
//!
//! | Event | Condition | Referrer receives | `ref_id` |
//! |-------|-----------|-------------------|----------|
//! | Deposit approved | depositor was referred | 200 points | deposit id |
//! | Investment created | referred, amount ≥ $100, no earlier qualifying investment | 300 points | investment id |
//!
//! Awards run inside the caller's unit of work. The earned ledger entry is
//! inserted first and the store refuses a second earned entry for the same
//! `ref_id`; points are only incremented when the insert went through. A
//! repeated or concurrent trigger therefore awards at most once.
//!
//! Redemption lives in the transfer engine; it moves cash.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{
    complete, BalanceDelta, DepositRecord, InvestmentRecord, LedgerStore, LedgerTx, RewardEntry, RewardKind,
    UserRecord,
};
use crate::error::LedgerError;

/// Points for a referred user's approved deposit.
pub const DEPOSIT_REFERRAL_POINTS: i64 = 200;

/// Points for a referred user's first qualifying investment.
pub const INVESTMENT_REFERRAL_POINTS: i64 = 300;

/// Smallest investment that counts as qualifying.
pub fn investment_reward_threshold() -> Decimal {
    Decimal::from(100)
}

/// Fewest points a redemption may convert.
pub const MIN_REDEMPTION_POINTS: i64 = 100;

/// Points per currency unit on redemption.
pub const POINTS_PER_DOLLAR: i64 = 100;

/// Reward balance and history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsSummary {
    pub reward_points: i64,
    pub ledger: Vec<RewardEntry>,
}

/// Insert the earned entry, then credit the points if it was new.
///
/// Returns whether points were awarded.
async fn grant<T: LedgerTx>(
    tx: &mut T,
    referrer_id: Uuid,
    points: i64,
    ref_id: Uuid,
    description: String,
) -> Result<bool, LedgerError> {
    let entry = RewardEntry {
        id: Uuid::new_v4(),
        user_id: referrer_id,
        kind: RewardKind::Earned,
        points,
        description,
        ref_id: Some(ref_id),
        created_at: Utc::now(),
    };

    if !tx.insert_reward(&entry).await? {
        debug!("Reward for {} already granted, skipping", ref_id);
        return Ok(false);
    }

    tx.adjust_user(referrer_id, &BalanceDelta::default().points(points)).await?;
    info!("🎁 Awarded {} points to referrer {} (ref {})", points, referrer_id, ref_id);
    Ok(true)
}

/// Award the deposit referral reward for an approved deposit.
pub async fn award_deposit_referral<T: LedgerTx>(
    tx: &mut T,
    depositor: &UserRecord,
    deposit: &DepositRecord,
) -> Result<bool, LedgerError> {
    let Some(referrer_id) = depositor.referred_by_id else {
        return Ok(false);
    };

    grant(
        tx,
        referrer_id,
        DEPOSIT_REFERRAL_POINTS,
        deposit.id,
        format!("Referral reward for deposit of ${} by referred user", deposit.amount),
    )
    .await
}

/// Award the investment referral reward if `investment` is the investor's
/// first qualifying one. `investment` must already be stored and the
/// investor's row locked in `tx`.
pub async fn award_investment_referral<T: LedgerTx>(
    tx: &mut T,
    investor: &UserRecord,
    investment: &InvestmentRecord,
) -> Result<bool, LedgerError> {
    let Some(referrer_id) = investor.referred_by_id else {
        return Ok(false);
    };
    if investment.amount < investment_reward_threshold() {
        return Ok(false);
    }

    let earlier = tx
        .count_qualifying_investments(investor.id, investment_reward_threshold(), investment.id)
        .await?;
    if earlier > 0 {
        debug!("Investor {} has {} earlier qualifying investments", investor.id, earlier);
        return Ok(false);
    }

    grant(
        tx,
        referrer_id,
        INVESTMENT_REFERRAL_POINTS,
        investment.id,
        format!(
            "Referral reward for first investment of ${} by referred user",
            investment.amount
        ),
    )
    .await
}

/// Read side of the reward ledger.
#[derive(Clone)]
pub struct RewardEngine<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> RewardEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Point balance and ledger, newest first.
    pub async fn rewards_summary(&self, email: &str) -> Result<RewardsSummary, LedgerError> {
        let mut tx = self.store.begin_read().await?;
        let result = load_summary(&mut tx, email).await;
        complete(tx, result).await
    }
}

async fn load_summary<T: LedgerTx>(tx: &mut T, email: &str) -> Result<RewardsSummary, LedgerError> {
    let user = tx
        .user_by_email(email)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("user {}", email)))?;
    let ledger = tx.rewards_for_user(user.id).await?;

    Ok(RewardsSummary {
        reward_points: user.reward_points,
        ledger,
    })
}
