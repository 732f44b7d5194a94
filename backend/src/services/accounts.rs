//! # Account Service
//!
//! Registers users, hands each one a referral code of their own, and checks
//! login credentials.
//!
//! ```text
//!   register_user(email, names, password, referral_code?)
//!        │
//!        ├── referral_code given? ── resolve owner ── unknown → warn, no referrer
//!        ├── hash password (argon2)
//!        ├── insert user (email unique → Conflict)
//!        └── insert referral code (8 hex chars, retried on collision)
//! ```
//!
//! The referrer link is fixed here and never changes afterwards.
//!
//! Passwords are stored as argon2 PHC strings. Hashing and verification run
//! on the blocking pool.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{complete, LedgerStore, LedgerTx, ReferralRecord, StoreError, UserRecord};
use crate::error::LedgerError;

/// Attempts at drawing an unused referral code before giving up.
const CODE_ATTEMPTS: usize = 5;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub password: String,
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub user: UserRecord,
    pub referral_code: String,
}

/// Hash a password into a PHC string.
fn hash_password(password: &str) -> Result<String, LedgerError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| LedgerError::DependencyFailure(format!("password salt: {}", e)))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| LedgerError::DependencyFailure(format!("password hash: {}", e)))?;
    Ok(hash.to_string())
}

/// A stored hash that does not parse (users created without a password)
/// never verifies.
fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

async fn blocking<R, F>(work: F) -> Result<R, LedgerError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LedgerError::DependencyFailure(format!("password worker: {}", e)))
}

/// Draw a candidate referral code.
fn generate_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

#[derive(Clone)]
pub struct AccountService<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> AccountService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn register_user(&self, input: NewUser) -> Result<Registration, LedgerError> {
        validate(&input)?;

        let password = input.password.clone();
        let password_hash = blocking(move || hash_password(&password)).await??;

        let mut tx = self.store.begin().await?;
        let result = register(&mut tx, &input, password_hash).await;
        let registration = complete(tx, result).await?;

        info!(
            "👤 Registered {} (referred by {:?})",
            registration.user.email, registration.user.referred_by_id
        );
        Ok(registration)
    }

    /// Look a user up by email.
    pub async fn user(&self, email: &str) -> Result<UserRecord, LedgerError> {
        self.find(email)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("user {}", email)))
    }

    /// Check an email and password pair.
    ///
    /// An unknown email and a wrong password fail the same way.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserRecord, LedgerError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(LedgerError::InvalidInput("email and password are required".to_string()));
        }

        let Some(user) = self.find(email).await? else {
            warn!("Login failed for unknown user {}", email);
            return Err(LedgerError::InvalidCredentials);
        };

        let password = password.to_string();
        let stored = user.password_hash.clone();
        if !blocking(move || verify_password(&password, &stored)).await? {
            warn!("Login failed for {}: wrong password", user.email);
            return Err(LedgerError::InvalidCredentials);
        }

        info!("🔑 {} logged in", user.email);
        Ok(user)
    }

    async fn find(&self, email: &str) -> Result<Option<UserRecord>, LedgerError> {
        let mut tx = self.store.begin_read().await?;
        let result = tx.user_by_email(email).await.map_err(LedgerError::from);
        complete(tx, result).await
    }
}

fn validate(input: &NewUser) -> Result<(), LedgerError> {
    let required = [
        ("email", &input.email),
        ("firstName", &input.first_name),
        ("lastName", &input.last_name),
        ("username", &input.username),
        ("password", &input.password),
    ];
    if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
        return Err(LedgerError::InvalidInput(format!("{} is required", field)));
    }
    if !input.email.contains('@') {
        return Err(LedgerError::InvalidInput(format!("invalid email {}", input.email)));
    }
    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(LedgerError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

async fn register<T: LedgerTx>(
    tx: &mut T,
    input: &NewUser,
    password_hash: String,
) -> Result<Registration, LedgerError> {
    let referred_by = match input.referral_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => match tx.referral_by_code(&code.to_uppercase()).await? {
            Some(referral) => Some(referral.user_id),
            None => {
                warn!("Unknown referral code {} for {}, registering without referrer", code, input.email);
                None
            }
        },
        _ => None,
    };

    let mut user = UserRecord::new(
        &input.email,
        input.first_name.trim(),
        input.last_name.trim(),
        input.username.trim(),
        referred_by,
    );
    user.password_hash = password_hash;
    if tx.user_by_email(&user.email).await?.is_some() {
        return Err(LedgerError::Conflict(format!("user {} already exists", user.email)));
    }
    tx.insert_user(&user).await.map_err(|e| match e {
        StoreError::Duplicate(_) => LedgerError::Conflict(format!("user {} already exists", user.email)),
        other => other.into(),
    })?;

    for _ in 0..CODE_ATTEMPTS {
        let referral = ReferralRecord {
            code: generate_code(),
            user_id: user.id,
            created_at: Utc::now(),
        };
        match tx.insert_referral(&referral).await {
            Ok(()) => {
                return Ok(Registration {
                    user,
                    referral_code: referral.code,
                })
            }
            Err(StoreError::Duplicate(_)) => {
                warn!("Referral code {} taken, drawing another", referral.code);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(LedgerError::Conflict("could not allocate a referral code".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn new_user(email: &str, referral_code: Option<&str>) -> NewUser {
        NewUser {
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            username: "ada".to_string(),
            password: "correct horse".to_string(),
            referral_code: referral_code.map(str::to_string),
        }
    }

    #[test]
    fn test_generated_code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn test_register_with_referral() {
        let accounts = AccountService::new(MemoryStore::new());
        let referrer = accounts.register_user(new_user("ref@example.com", None)).await.unwrap();
        assert!(referrer.user.referred_by_id.is_none());

        let lower = referrer.referral_code.to_lowercase();
        let referred = accounts
            .register_user(new_user("Friend@Example.com", Some(&lower)))
            .await
            .unwrap();
        assert_eq!(referred.user.email, "friend@example.com");
        assert_eq!(referred.user.referred_by_id, Some(referrer.user.id));
        assert_ne!(referred.referral_code, referrer.referral_code);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let accounts = AccountService::new(MemoryStore::new());
        accounts.register_user(new_user("a@example.com", None)).await.unwrap();
        let err = accounts.register_user(new_user("A@example.com", None)).await.unwrap_err();
        assert_eq!(err.kind(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_unknown_referral_code_ignored() {
        let accounts = AccountService::new(MemoryStore::new());
        let registration = accounts
            .register_user(new_user("a@example.com", Some("DEADBEEF")))
            .await
            .unwrap();
        assert!(registration.user.referred_by_id.is_none());

        let stored = accounts.user("a@example.com").await.unwrap();
        assert!(stored.referred_by_id.is_none());
    }

    #[tokio::test]
    async fn test_login_checks_password() {
        let accounts = AccountService::new(MemoryStore::new());
        let registration = accounts.register_user(new_user("a@example.com", None)).await.unwrap();
        assert!(registration.user.password_hash.starts_with("$argon2"));

        let user = accounts.login("A@example.com", "correct horse").await.unwrap();
        assert_eq!(user.id, registration.user.id);

        let err = accounts.login("a@example.com", "wrong horse").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidCredentials));

        let err = accounts.login("ghost@example.com", "correct horse").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidCredentials));

        let err = accounts.login("a@example.com", "").await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[test]
    fn test_password_hash_is_salted() {
        let first = hash_password("correct horse").unwrap();
        let second = hash_password("correct horse").unwrap();
        assert_ne!(first, second);
        assert!(verify_password("correct horse", &first));
        assert!(!verify_password("correct horse", ""));
    }

    #[tokio::test]
    async fn test_short_password_rejected() {
        let accounts = AccountService::new(MemoryStore::new());
        let mut input = new_user("a@example.com", None);
        input.password = "short".to_string();
        let err = accounts.register_user(input).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_missing_fields_rejected() {
        let accounts = AccountService::new(MemoryStore::new());
        let mut input = new_user("a@example.com", None);
        input.username = "  ".to_string();
        let err = accounts.register_user(input).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }
}
