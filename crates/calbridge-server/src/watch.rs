//! Push-notification channel lifecycle.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use tracing::{debug, info, warn};

use calbridge_core::UserId;
use calbridge_providers::{CalendarApi, ChannelRequest, ProviderErrorCode};

use crate::error::{ServerError, ServerResult};
use crate::locks::{LockScope, UserLocks};
use crate::service::CalendarServiceFactory;
use crate::token_store::{TokenStore, WatchChannel};

/// Random bytes in a watch secret.
const SECRET_BYTES: usize = 32;

/// Creates, renews and stops watch channels.
pub struct WatchManager {
    tokens: TokenStore,
    services: Arc<CalendarServiceFactory>,
    locks: Arc<UserLocks>,
    callback_url: String,
    ttl: Option<Duration>,
}

impl WatchManager {
    /// `callback_url` is the public address of the `/watch` route.
    pub fn new(
        tokens: TokenStore,
        services: Arc<CalendarServiceFactory>,
        locks: Arc<UserLocks>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            services,
            locks,
            callback_url: callback_url.into(),
            ttl: None,
        }
    }

    /// Requested channel lifetime; the provider default applies otherwise.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Registers a fresh channel on the user's primary calendar.
    ///
    /// A previously stored channel is stopped first so the provider does
    /// not keep delivering under a superseded secret.
    pub async fn setup_watch(&self, user: &UserId) -> ServerResult<WatchChannel> {
        let _guard = self.locks.lock(user, LockScope::Watch).await;
        let client = self.services.get_service(user).await?;

        if let Some((_, previous)) = self.tokens.load_watch(user).await? {
            debug!(user_id = %user, "stopping superseded channel");
            self.stop_locked(client.as_ref(), user, &previous.channel_id, &previous.resource_id)
                .await
                .unwrap_or_else(|e| warn!(user_id = %user, error = %e, "failed to stop previous channel"));
        }

        let calendar_id = client
            .primary_calendar_id()
            .await
            .map_err(|e| ServerError::watch_setup(format!("primary calendar lookup: {}", e)))?;

        let secret = generate_secret();
        let request = ChannelRequest {
            id: secret.clone(),
            address: format!(
                "{}?userId={}",
                self.callback_url,
                urlencoding::encode(user.as_str())
            ),
            ttl: self.ttl,
        };

        let registered = client
            .watch_events(&calendar_id, &request)
            .await
            .map_err(|e| ServerError::watch_setup(e.to_string()))?;

        let channel = WatchChannel {
            channel_id: registered.id,
            resource_id: registered.resource_id,
            calendar_id,
            user_id: user.clone(),
            expiration: registered.expiration,
        };
        self.tokens.save_watch(&secret, &channel).await?;

        info!(
            user_id = %user,
            resource_id = %channel.resource_id,
            expiration = ?channel.expiration,
            "watch channel registered"
        );
        Ok(channel)
    }

    /// Unsubscribes `channel_id` at the provider and forgets it locally.
    ///
    /// The local record is only removed when it describes this channel, so
    /// tearing down a stale channel leaves the current one intact.
    pub async fn stop_watch(
        &self,
        user: &UserId,
        channel_id: &str,
        resource_id: &str,
    ) -> ServerResult<()> {
        let _guard = self.locks.lock(user, LockScope::Watch).await;
        let client = self.services.get_service(user).await?;
        self.stop_locked(client.as_ref(), user, channel_id, resource_id)
            .await
    }

    /// Stops whatever channel is currently stored for `user`.
    pub async fn stop_current(&self, user: &UserId) -> ServerResult<()> {
        let Some((_, channel)) = self.tokens.load_watch(user).await? else {
            return Ok(());
        };
        self.stop_watch(user, &channel.channel_id, &channel.resource_id)
            .await
    }

    /// Replaces the user's channel before it expires.
    pub async fn renew(&self, user: &UserId) -> ServerResult<()> {
        self.setup_watch(user).await.map(|_| ())
    }

    async fn stop_locked(
        &self,
        client: &dyn CalendarApi,
        user: &UserId,
        channel_id: &str,
        resource_id: &str,
    ) -> ServerResult<()> {
        let stopped = match client.stop_channel(channel_id, resource_id).await {
            Ok(()) => Ok(()),
            // Already gone on the provider side.
            Err(e) if e.code() == ProviderErrorCode::NotFound => Ok(()),
            Err(e) => Err(ServerError::Provider(e)),
        };

        let stored = self.tokens.load_watch(user).await?;
        if stored.is_some_and(|(_, channel)| channel.channel_id == channel_id) {
            self.tokens.delete_watch(user).await?;
            debug!(user_id = %user, "local watch record removed");
        }

        if stopped.is_ok() {
            info!(user_id = %user, resource_id, "watch channel stopped");
        }
        stopped
    }
}

/// A URL-safe secret usable as a channel id.
fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
