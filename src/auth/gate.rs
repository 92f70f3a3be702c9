use std::sync::Arc;

use tokio::sync::watch;

use crate::auth::models::SessionUser;
use crate::auth::provider::AuthProvider;
use crate::error::AppError;

/// Exposes the current session as an observable value.
///
/// Every screen that depends on the signed-in user holds a clone of the
/// gate (or a receiver from [`AuthGate::subscribe`]) and re-evaluates on
/// each change published by the auth provider.
#[derive(Clone)]
pub struct AuthGate {
    provider: Arc<dyn AuthProvider>,
    session: watch::Receiver<Option<SessionUser>>,
}

impl AuthGate {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        let session = provider.session_changes();
        Self { provider, session }
    }

    /// The signed-in user, if any.
    pub fn current(&self) -> Option<SessionUser> {
        self.session.borrow().clone()
    }

    /// The signed-in user, or `AuthRequired` naming the attempted action.
    pub fn require_user(&self, action: &str) -> Result<SessionUser, AppError> {
        self.current()
            .ok_or_else(|| AppError::AuthRequired(format!("You must sign in to {action}")))
    }

    /// A fresh receiver for session changes. Dropping it unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionUser>> {
        self.session.clone()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, AppError> {
        let user = self.provider.sign_in(email, password).await?;
        tracing::info!(uid = %user.uid, "Signed in");
        Ok(user)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SessionUser, AppError> {
        let user = self.provider.sign_up(email, password).await?;
        tracing::info!(uid = %user.uid, "Registered new account");
        Ok(user)
    }

    pub async fn sign_out(&self) -> Result<(), AppError> {
        self.provider.sign_out().await?;
        tracing::info!("Signed out");
        Ok(())
    }
}
