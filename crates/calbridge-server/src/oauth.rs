//! OAuth authorization handshake.
//!
//! `connect` issues a single-use CSRF state and returns the consent URL;
//! `complete` validates the state, exchanges the code and brings the user
//! to a connected, synced and watched state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use calbridge_core::UserId;
use calbridge_providers::{AuthorizationServer, ProviderError, TokenInfo};

use crate::clock::Clock;
use crate::error::{ServerError, ServerResult};
use crate::locks::{LockScope, UserLocks};
use crate::notify::Notifier;
use crate::scheduler::RenewalScheduler;
use crate::sync::SyncEngine;
use crate::token_store::{CalendarCredential, CsrfState, TokenStore};
use crate::watch::WatchManager;

pub const WELCOME_MESSAGE: &str = "#### Welcome to the Google Calendar integration!\n\
     You've successfully connected your account to your Google Calendar.\n\
     Event changes will be posted here as they happen.";

/// Drives connect, complete and disconnect.
pub struct OAuthFlow {
    tokens: TokenStore,
    auth: Arc<dyn AuthorizationServer>,
    sync: Arc<dyn SyncEngine>,
    watch: Arc<WatchManager>,
    scheduler: Arc<dyn RenewalScheduler>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    locks: Arc<UserLocks>,
}

impl OAuthFlow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tokens: TokenStore,
        auth: Arc<dyn AuthorizationServer>,
        sync: Arc<dyn SyncEngine>,
        watch: Arc<WatchManager>,
        scheduler: Arc<dyn RenewalScheduler>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            tokens,
            auth,
            sync,
            watch,
            scheduler,
            notifier,
            clock,
            locks,
        }
    }

    /// Starts a flow for `user_id` and returns the consent URL.
    ///
    /// Every call issues a new state; earlier unconsumed states stay valid
    /// until used or expired.
    pub async fn connect(&self, user_id: &str) -> ServerResult<String> {
        let user = UserId::parse(user_id).ok_or(ServerError::Unauthorized)?;

        let state = CsrfState::generate(&user, self.clock.now());
        self.tokens.save_state(&state).await?;
        debug!(user_id = %user, "issued authorization state");

        Ok(self.auth.authorization_url(state.value()))
    }

    /// Finishes a flow.
    ///
    /// Steps fail in order with distinct errors: user mismatch
    /// (`Unauthorized`), unknown or replayed state (`InvalidState`), code
    /// rejected (`ExchangeFailure`), then `SyncFailure` and
    /// `WatchSetupFailure`. The credential is stored before the sync, so a
    /// failure after that point leaves the user connected and the whole
    /// call can be retried with a new state.
    pub async fn complete(&self, user_id: &str, state: &str, code: &str) -> ServerResult<()> {
        let user = UserId::parse(user_id).ok_or(ServerError::Unauthorized)?;
        match CsrfState::embedded_user(state) {
            Some(ref embedded) if *embedded == user => {}
            _ => {
                warn!(user_id = %user, "authorization state belongs to another user");
                return Err(ServerError::Unauthorized);
            }
        }

        self.tokens.consume_state(state, self.clock.now()).await?;

        if code.is_empty() {
            return Err(ServerError::ExchangeFailure(ProviderError::authentication(
                "missing authorization code",
            )));
        }
        let grant = self
            .auth
            .exchange_code(code)
            .await
            .map_err(ServerError::ExchangeFailure)?;

        {
            let _guard = self.locks.lock(&user, LockScope::Credential).await;
            let mut token = TokenInfo::from_grant(grant, self.clock.now());
            if token.refresh_token.is_none()
                && let Some(previous) = self.tokens.load_credential(&user).await?
            {
                token.refresh_token = previous.token.refresh_token;
            }
            self.tokens
                .save_credential(&CalendarCredential {
                    user_id: user.clone(),
                    token,
                })
                .await?;
        }
        info!(user_id = %user, "calendar connected");

        self.sync.sync(&user).await.map_err(|e| match e {
            ServerError::SyncFailure { .. } => e,
            other => ServerError::sync_failure(other.to_string()),
        })?;

        self.watch.setup_watch(&user).await.map_err(|e| match e {
            ServerError::WatchSetupFailure { .. } => e,
            other => ServerError::watch_setup(other.to_string()),
        })?;

        if let Err(e) = self.scheduler.schedule(&user) {
            warn!(user_id = %user, error = %e, "failed to schedule watch renewal");
        }

        if let Err(e) = self.notifier.notify(&user, WELCOME_MESSAGE).await {
            warn!(user_id = %user, error = %e, "failed to send welcome message");
        }

        Ok(())
    }

    /// Removes everything stored for the user and stops their channel.
    ///
    /// Disconnecting a user that is not connected succeeds.
    pub async fn disconnect(&self, user_id: &str) -> ServerResult<()> {
        let user = UserId::parse(user_id).ok_or(ServerError::Unauthorized)?;

        self.scheduler.cancel(&user);

        match self.watch.stop_current(&user).await {
            Ok(()) | Err(ServerError::NotConnected(_)) => {}
            Err(e) => warn!(user_id = %user, error = %e, "failed to stop watch channel"),
        }

        {
            let _guard = self.locks.lock(&user, LockScope::Watch).await;
            self.tokens.delete_watch(&user).await?;
        }
        {
            let _guard = self.locks.lock(&user, LockScope::Sync).await;
            self.tokens.delete_sync_state(&user).await?;
        }
        {
            let _guard = self.locks.lock(&user, LockScope::Credential).await;
            self.tokens.delete_credential(&user).await?;
        }

        info!(user_id = %user, "calendar disconnected");
        Ok(())
    }
}
