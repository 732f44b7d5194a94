//! # Database Models
//!
//! This module defines the data structures that map to database tables.
//! Each struct represents a row in a table.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `users` | Identity plus balance accumulators |
//! | `referrals` | Referral code owned by each user |
//! | `deposits` | Funding requests |
//! | `withdrawals` | Payout requests |
//! | `investments` | Capital committed to a plan |
//! | `transactions` | Append-only audit ledger |
//! | `reward_ledger` | Append-only reward point grants and redemptions |
//!
//! ## Relationship Diagram
//!
//! ```text
//! ┌─────────────┐       ┌──────────────────┐
//! │    users    │──────<│   transactions   │
//! │             │       │                  │
//! │ id (PK)     │       │ user_id (FK)     │
//! │ main_balance│       │ deposit_id       │──> deposits
//! │ ...         │       │ withdrawal_id    │──> withdrawals
//! └─────────────┘       │ investment_id    │──> investments
//!        │              │ accrual_date     │
//!        │              └──────────────────┘
//!        ▼
//! ┌──────────────────┐
//! │  reward_ledger   │
//! │                  │
//! │ user_id (FK)     │
//! │ ref_id (unique   │
//! │  when earned)    │
//! └──────────────────┘
//! ```
//!
//! Amounts are `Decimal` (NUMERIC(20,8) in PostgreSQL). Reward points are
//! whole numbers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a status enum stored as TEXT, with `as_str`, `Display` and
/// `FromStr` kept in one place.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Database representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// A TEXT column held a value no enum variant maps to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

text_enum! {
    /// Deposit lifecycle. Leaves `Pending` exactly once.
    pub enum DepositStatus {
        Pending => "Pending",
        Completed => "Completed",
        Failed => "Failed",
    }
}

text_enum! {
    /// Withdrawal lifecycle. Leaves `Pending` exactly once.
    pub enum WithdrawalStatus {
        Pending => "Pending",
        Completed => "Completed",
        Rejected => "Rejected",
    }
}

text_enum! {
    /// Investment lifecycle.
    pub enum InvestmentStatus {
        Active => "Active",
        Completed => "Completed",
    }
}

text_enum! {
    /// Ledger entry status. Only `Pending` entries ever change.
    pub enum TransactionStatus {
        Pending => "Pending",
        Success => "Success",
        Failed => "Failed",
        Completed => "Completed",
    }
}

text_enum! {
    /// What a ledger entry records.
    pub enum TransactionKind {
        /// Funding request, credited on approval.
        Deposit => "deposit",
        /// Payout request, debited on approval.
        Withdrawal => "withdrawal",
        /// Capital moved from main to investment balance.
        Investment => "investment",
        /// Daily accrual.
        Roi => "roi",
        /// Interest credit.
        Interest => "interest",
        /// Reward points converted to cash.
        RewardRedemption => "reward_redemption",
        /// Capital released when an investment matures.
        CapitalReturn => "capital_return",
    }
}

text_enum! {
    /// Direction of a reward ledger entry.
    pub enum RewardKind {
        Earned => "earned",
        Redeemed => "redeemed",
    }
}

/// A user and their balance accumulators.
///
/// ## Fields
///
/// | Field | Description |
/// |-------|-------------|
/// | main_balance | Spendable funds, never negative |
/// | investment_balance | Sum of active investment amounts |
/// | total_deposit | Lifetime approved deposits |
/// | total_withdrawals | Lifetime approved withdrawals |
/// | total_earn | Lifetime accrued profit |
/// | reward_points | Referral point balance |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub main_balance: Decimal,
    pub investment_balance: Decimal,
    pub total_deposit: Decimal,
    pub total_withdrawals: Decimal,
    pub total_earn: Decimal,
    pub reward_points: i64,
    /// Referrer, set at signup and never changed.
    pub referred_by_id: Option<Uuid>,
    /// Argon2 PHC string. Never serialized.
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// A fresh user with zeroed accumulators.
    pub fn new(
        email: &str,
        first_name: &str,
        last_name: &str,
        username: &str,
        referred_by_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            username: username.to_string(),
            main_balance: Decimal::ZERO,
            investment_balance: Decimal::ZERO,
            total_deposit: Decimal::ZERO,
            total_withdrawals: Decimal::ZERO,
            total_earn: Decimal::ZERO,
            reward_points: 0,
            referred_by_id,
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Funds not locked in active investments.
    pub fn available_balance(&self) -> Decimal {
        self.main_balance - self.investment_balance
    }
}

/// A referral code owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralRecord {
    pub code: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A funding request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub address: String,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payout request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub address: String,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Capital committed to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: i32,
    pub plan_name: String,
    pub amount: Decimal,
    /// Annual return in percent (15 means 15%).
    pub roi: Decimal,
    pub duration_days: i32,
    pub status: InvestmentStatus,
    pub created_at: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// One entry of the append-only ledger.
///
/// The link fields replace correlation by amount and timestamp: a deposit,
/// withdrawal or investment entry carries the id of the record it audits,
/// and an accrual entry carries `(investment_id, accrual_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub description: String,
    pub transaction_ref: Option<String>,
    pub payment_method: Option<String>,
    pub deposit_id: Option<Uuid>,
    pub withdrawal_id: Option<Uuid>,
    pub investment_id: Option<Uuid>,
    pub accrual_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// A new entry with no links set.
    pub fn new(
        user_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        status: TransactionStatus,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            status,
            description: description.into(),
            transaction_ref: None,
            payment_method: None,
            deposit_id: None,
            withdrawal_id: None,
            investment_id: None,
            accrual_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One reward point movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: RewardKind,
    /// Positive for earned, negative for redeemed.
    pub points: i64,
    pub description: String,
    /// Triggering deposit or investment. Unique among earned entries.
    pub ref_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_text_roundtrip() {
        assert_eq!(TransactionKind::RewardRedemption.as_str(), "reward_redemption");
        assert_eq!("roi".parse::<TransactionKind>().unwrap(), TransactionKind::Roi);
        assert_eq!("Rejected".parse::<WithdrawalStatus>().unwrap(), WithdrawalStatus::Rejected);

        let err = "Approved".parse::<DepositStatus>().unwrap_err();
        assert_eq!(err.kind, "DepositStatus");
    }

    #[test]
    fn test_status_serializes_as_text() {
        let json = serde_json::to_string(&InvestmentStatus::Active).unwrap();
        assert_eq!(json, "\"Active\"");
    }

    #[test]
    fn test_available_balance() {
        let mut user = UserRecord::new(" Alice@Example.com ", "Alice", "A", "alice", None);
        user.main_balance = dec!(1000);
        user.investment_balance = dec!(600);
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.available_balance(), dec!(400));
    }
}
