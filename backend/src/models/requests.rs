//! # API Request Models
//!
//! Structures for incoming API request bodies.
//! Each struct represents the expected JSON body for an endpoint.
//!
//! Money travels as decimal strings or JSON numbers (`"100.50"` or `100.5`).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::services::{ApprovalAction, DepositRef, NewDeposit, NewInvestment, NewUser, NewWithdrawal};

/// Request to register a user.
///
/// ## Example JSON
///
/// ```json
/// {
///     "email": "ada@example.com",
///     "firstName": "Ada",
///     "lastName": "Lovelace",
///     "username": "ada",
///     "password": "correct horse",
///     "referralCode": "9F2C41AB"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,

    #[serde(skip_serializing)]
    pub password: String,

    /// Code of the user who referred this one. Unknown codes are ignored.
    pub referral_code: Option<String>,
}

impl From<RegisterRequest> for NewUser {
    fn from(r: RegisterRequest) -> Self {
        NewUser {
            email: r.email,
            first_name: r.first_name,
            last_name: r.last_name,
            username: r.username,
            password: r.password,
            referral_code: r.referral_code,
        }
    }
}

/// Request to log in.
///
/// ```json
/// { "email": "ada@example.com", "password": "correct horse" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request to deposit funds.
///
/// ## Example JSON
///
/// ```json
/// {
///     "email": "ada@example.com",
///     "amount": "500.00",
///     "currency": "USDT",
///     "address": "TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub email: String,
    pub amount: Decimal,
    pub currency: String,

    /// Address the funds were sent from.
    pub address: String,
}

impl From<DepositRequest> for NewDeposit {
    fn from(r: DepositRequest) -> Self {
        NewDeposit {
            email: r.email,
            amount: r.amount,
            currency: r.currency,
            address: r.address,
        }
    }
}

/// Admin decision on a deposit.
///
/// Exactly one of `transactionId` and `depositId` identifies the deposit.
///
/// ## Example JSON
///
/// ```json
/// {
///     "transactionId": "0b6c…",
///     "action": "approve",
///     "adminEmail": "admin@example.com"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveDepositRequest {
    pub transaction_id: Option<Uuid>,
    pub deposit_id: Option<Uuid>,
    pub action: ApprovalAction,
    pub admin_email: String,
}

impl ApproveDepositRequest {
    pub fn reference(&self) -> Result<DepositRef, LedgerError> {
        match (self.transaction_id, self.deposit_id) {
            (Some(id), None) => Ok(DepositRef::Transaction(id)),
            (None, Some(id)) => Ok(DepositRef::Deposit(id)),
            _ => Err(LedgerError::InvalidInput(
                "exactly one of transactionId and depositId is required".to_string(),
            )),
        }
    }
}

/// Request to withdraw funds.
///
/// ## Example JSON
///
/// ```json
/// {
///     "email": "ada@example.com",
///     "amount": "250",
///     "currency": "USDT",
///     "address": "TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub email: String,
    pub amount: Decimal,
    pub currency: String,

    /// Destination address.
    pub address: String,
}

impl From<WithdrawalRequest> for NewWithdrawal {
    fn from(r: WithdrawalRequest) -> Self {
        NewWithdrawal {
            email: r.email,
            amount: r.amount,
            currency: r.currency,
            address: r.address,
        }
    }
}

/// Admin decision on a withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveWithdrawalRequest {
    pub withdrawal_id: Uuid,
    pub action: ApprovalAction,
    pub admin_email: String,
}

/// Request to invest in a plan.
///
/// ## Example JSON
///
/// ```json
/// {
///     "email": "ada@example.com",
///     "planId": 1,
///     "amount": "1000"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentRequest {
    pub email: String,
    pub plan_id: i32,
    pub amount: Decimal,
}

impl From<InvestmentRequest> for NewInvestment {
    fn from(r: InvestmentRequest) -> Self {
        NewInvestment {
            email: r.email,
            plan_id: r.plan_id,
            amount: r.amount,
        }
    }
}

/// Request to convert reward points into cash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub email: String,
    pub points: i64,
}

/// Query parameters for paged history.
///
/// `GET /transactions/{email}?limit=20&offset=40`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
