//! Inbound push notifications.
//!
//! The provider calls without any user session. A notification is trusted
//! only if its channel id equals the watch secret stored for the user it
//! names. Only a trusted `exists` resyncs; any other notification for a
//! connected user gets its channel torn down.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use calbridge_core::{ResourceState, UserId};

use crate::sync::SyncEngine;
use crate::token_store::TokenStore;
use crate::watch::WatchManager;

/// A push notification as received on `/watch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    /// From the `userId` query parameter.
    pub user_id: String,
    /// `X-Goog-Channel-ID`
    pub channel_id: String,
    /// `X-Goog-Resource-ID`
    pub resource_id: String,
    /// `X-Goog-Resource-State`
    pub resource_state: ResourceState,
}

/// What the handler did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Authentic change; a sync ran (successfully or not).
    Resynced,
    /// Untrusted or stale; the channel was stopped (or stopping was tried).
    TornDown,
    /// No usable user id, or the user has no credential to stop a channel with.
    Ignored,
}

pub struct WebhookHandler {
    tokens: TokenStore,
    watch: Arc<WatchManager>,
    sync: Arc<dyn SyncEngine>,
}

impl WebhookHandler {
    pub fn new(tokens: TokenStore, watch: Arc<WatchManager>, sync: Arc<dyn SyncEngine>) -> Self {
        Self {
            tokens,
            watch,
            sync,
        }
    }

    /// Validates and dispatches one notification. Never fails; problems
    /// are logged.
    pub async fn handle(&self, notification: &PushNotification) -> WebhookOutcome {
        let Some(user) = UserId::parse(&notification.user_id) else {
            warn!(channel_id = %notification.channel_id, "notification without user id");
            return WebhookOutcome::Ignored;
        };

        let secret = match self.tokens.load_watch_secret(&user).await {
            Ok(secret) => secret,
            Err(e) => {
                error!(user_id = %user, error = %e, "failed to load watch secret");
                None
            }
        };

        let authentic = secret
            .as_deref()
            .is_some_and(|s| constant_time_eq(s.as_bytes(), notification.channel_id.as_bytes()));

        if authentic && notification.resource_state.is_change() {
            debug!(user_id = %user, "change notification");
            match self.sync.sync(&user).await {
                Ok(report) => debug!(user_id = %user, ?report, "resync finished"),
                Err(e) => error!(user_id = %user, error = %e, "resync failed"),
            }
            return WebhookOutcome::Resynced;
        }

        if !authentic && !self.is_connected(&user).await {
            debug!(user_id = %user, "notification for unconnected user");
            return WebhookOutcome::Ignored;
        }

        info!(
            user_id = %user,
            trusted = authentic,
            resource_state = %notification.resource_state,
            "tearing down channel"
        );
        if let Err(e) = self
            .watch
            .stop_watch(&user, &notification.channel_id, &notification.resource_id)
            .await
        {
            warn!(user_id = %user, error = %e, "failed to stop channel");
        }
        WebhookOutcome::TornDown
    }

    async fn is_connected(&self, user: &UserId) -> bool {
        match self.tokens.load_credential(user).await {
            Ok(credential) => credential.is_some(),
            Err(e) => {
                error!(user_id = %user, error = %e, "failed to load credential");
                false
            }
        }
    }
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_plain_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(constant_time_eq(b"", b""));
    }
}
