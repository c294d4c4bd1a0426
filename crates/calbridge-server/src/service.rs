//! Authenticated provider clients from stored credentials.

use std::sync::Arc;

use tracing::{debug, info};

use calbridge_core::UserId;
use calbridge_providers::{AuthorizationServer, CalendarApi, ClientFactory, ProviderError};

use crate::clock::Clock;
use crate::error::{ServerError, ServerResult};
use crate::locks::{LockScope, UserLocks};
use crate::token_store::TokenStore;

/// Turns a user's stored credential into a [`CalendarApi`].
pub struct CalendarServiceFactory {
    tokens: TokenStore,
    auth: Arc<dyn AuthorizationServer>,
    clients: Arc<dyn ClientFactory>,
    clock: Arc<dyn Clock>,
    locks: Arc<UserLocks>,
}

impl CalendarServiceFactory {
    pub fn new(
        tokens: TokenStore,
        auth: Arc<dyn AuthorizationServer>,
        clients: Arc<dyn ClientFactory>,
        clock: Arc<dyn Clock>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            tokens,
            auth,
            clients,
            clock,
            locks,
        }
    }

    /// Returns a client for `user`, refreshing an expired access token first.
    ///
    /// A refreshed credential is written back before the client is handed
    /// out, under the user's credential lock, so concurrent callers refresh
    /// at most once.
    pub async fn get_service(&self, user: &UserId) -> ServerResult<Arc<dyn CalendarApi>> {
        let credential = self
            .tokens
            .load_credential(user)
            .await?
            .ok_or_else(|| ServerError::NotConnected(user.clone()))?;

        if !credential.token.is_expired_at(self.clock.now()) {
            return Ok(self.clients.client(&credential.token.access_token));
        }

        let _guard = self.locks.lock(user, LockScope::Credential).await;

        // Re-read: another request may have refreshed while we waited.
        let mut credential = self
            .tokens
            .load_credential(user)
            .await?
            .ok_or_else(|| ServerError::NotConnected(user.clone()))?;

        let now = self.clock.now();
        if credential.token.is_expired_at(now) {
            let refresh_token = credential.token.refresh_token.clone().ok_or_else(|| {
                ProviderError::authentication("access token expired and no refresh token stored")
            })?;

            debug!(user_id = %user, "refreshing access token");
            let grant = self.auth.refresh_token(&refresh_token).await?;
            credential.token.apply_refresh(grant, now);
            self.tokens.save_credential(&credential).await?;
            info!(user_id = %user, "access token refreshed");
        }

        Ok(self.clients.client(&credential.token.access_token))
    }
}
