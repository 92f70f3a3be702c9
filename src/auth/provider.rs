use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::prelude::*;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::auth::models::SessionUser;
use crate::error::AppError;

/// Minimum password length accepted on sign-up.
const MIN_PASSWORD_LEN: usize = 6;

/// The hosted authentication collaborator.
///
/// Abstracted as a trait so the session gate can run against a fake.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Feed of session changes. The current value is the signed-in user,
    /// `None` when signed out.
    fn session_changes(&self) -> watch::Receiver<Option<SessionUser>>;

    /// Sign in with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, AppError>;

    /// Register a new account. The new user becomes the current session.
    async fn sign_up(&self, email: &str, password: &str) -> Result<SessionUser, AppError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), AppError>;
}

struct Account {
    uid: String,
    email: String,
    password_digest: String,
}

/// In-process auth provider used by tests and the demo binary.
pub struct MemoryAuthProvider {
    accounts: Mutex<HashMap<String, Account>>,
    session: watch::Sender<Option<SessionUser>>,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            session,
        }
    }

    fn digest(password: &str) -> String {
        BASE64_STANDARD.encode(Sha256::digest(password.as_bytes()).as_slice())
    }

    fn lock_accounts(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Account>>, AppError> {
        self.accounts
            .lock()
            .map_err(|_| AppError::Internal("Account table poisoned".into()))
    }
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    fn session_changes(&self) -> watch::Receiver<Option<SessionUser>> {
        self.session.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, AppError> {
        let user = {
            let accounts = self.lock_accounts()?;
            let account = accounts
                .get(&email.trim().to_lowercase())
                .filter(|a| a.password_digest == Self::digest(password))
                .ok_or_else(|| AppError::Auth("Invalid email or password".into()))?;
            SessionUser::new(account.uid.clone(), account.email.clone())
        };

        self.session.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SessionUser, AppError> {
        let key = email.trim().to_lowercase();
        if key.is_empty() || !key.contains('@') {
            return Err(AppError::Auth(format!("Invalid email '{}'", email)));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Auth(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let user = {
            let mut accounts = self.lock_accounts()?;
            if accounts.contains_key(&key) {
                return Err(AppError::Auth(format!("Email '{}' is already in use", key)));
            }
            let account = Account {
                uid: uuid::Uuid::new_v4().simple().to_string(),
                email: key.clone(),
                password_digest: Self::digest(password),
            };
            let user = SessionUser::new(account.uid.clone(), account.email.clone());
            accounts.insert(key, account);
            user
        };

        self.session.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        self.session.send_replace(None);
        Ok(())
    }
}
