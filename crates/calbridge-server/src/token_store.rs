//! Typed access to a user's persisted records.
//!
//! | Key | Value |
//! |---|---|
//! | `<state value>` | [`CsrfState`] (JSON) |
//! | `<userId>calendarToken` | [`CalendarCredential`] (JSON) |
//! | `<userId>watchToken` | watch secret (raw) |
//! | `<userId>watchChannel` | [`WatchChannel`] (JSON) |
//! | `<userId>syncToken` | provider sync token (raw) |
//! | `<userId>syncDigests` | fingerprints of reported changes (JSON) |
//!
//! [`TokenStore`] is the only writer of these keys.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use calbridge_core::UserId;
use calbridge_providers::TokenInfo;

use crate::error::{ServerError, ServerResult};
use crate::store::KvStore;

/// Length of the random part of a CSRF state value.
const STATE_NONCE_LEN: usize = 32;

/// Lifetime of an unconsumed CSRF state.
pub const STATE_TTL_MINUTES: i64 = 10;

pub fn credential_key(user: &UserId) -> String {
    format!("{}calendarToken", user)
}

pub fn watch_token_key(user: &UserId) -> String {
    format!("{}watchToken", user)
}

pub fn watch_channel_key(user: &UserId) -> String {
    format!("{}watchChannel", user)
}

pub fn sync_token_key(user: &UserId) -> String {
    format!("{}syncToken", user)
}

pub fn sync_digests_key(user: &UserId) -> String {
    format!("{}syncDigests", user)
}

/// A user's OAuth credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarCredential {
    pub user_id: UserId,
    #[serde(flatten)]
    pub token: TokenInfo,
}

/// Single-use anti-replay token for one authorization flow.
///
/// The value is `<nonce>_<userId>`; it is stored under itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfState {
    value: String,
    user_id: UserId,
    created_at: DateTime<Utc>,
}

impl CsrfState {
    /// Issues a fresh state for `user`.
    pub fn generate(user: &UserId, now: DateTime<Utc>) -> Self {
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_NONCE_LEN)
            .map(char::from)
            .collect();
        Self {
            value: format!("{}_{}", nonce, user),
            user_id: user.clone(),
            created_at: now,
        }
    }

    /// The user id embedded in a presented state value.
    ///
    /// Everything after the first `_`, so user ids may themselves contain
    /// underscores.
    pub fn embedded_user(value: &str) -> Option<UserId> {
        let (_, user) = value.split_once('_')?;
        UserId::parse(user)
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::minutes(STATE_TTL_MINUTES)
    }
}

/// A registered push-notification channel.
///
/// The channel id is the watch secret itself; it is random and shares
/// nothing with the resource id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchChannel {
    pub channel_id: String,
    pub resource_id: String,
    pub calendar_id: String,
    pub user_id: UserId,
    pub expiration: Option<DateTime<Utc>>,
}

/// Typed view over the [`KvStore`].
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KvStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> ServerResult<Option<T>> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> ServerResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, bytes).await?;
        Ok(())
    }

    async fn get_string(&self, key: &str) -> ServerResult<Option<String>> {
        Ok(self
            .store
            .get(key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub async fn load_credential(&self, user: &UserId) -> ServerResult<Option<CalendarCredential>> {
        self.get_json(&credential_key(user)).await
    }

    pub async fn save_credential(&self, credential: &CalendarCredential) -> ServerResult<()> {
        self.set_json(&credential_key(&credential.user_id), credential)
            .await
    }

    pub async fn delete_credential(&self, user: &UserId) -> ServerResult<()> {
        self.store.delete(&credential_key(user)).await?;
        Ok(())
    }

    pub async fn save_state(&self, state: &CsrfState) -> ServerResult<()> {
        self.set_json(state.value(), state).await
    }

    /// Consumes the state stored under `value`.
    ///
    /// The record is deleted before any check beyond its existence, so a
    /// value can be presented successfully at most once. Unknown, already
    /// consumed, tampered and expired values all fail with
    /// [`ServerError::InvalidState`].
    pub async fn consume_state(&self, value: &str, now: DateTime<Utc>) -> ServerResult<CsrfState> {
        let Some(raw) = self.store.get(value).await? else {
            return Err(ServerError::InvalidState);
        };

        if !self.store.compare_and_delete(value, &raw).await? {
            debug!("state consumed concurrently");
            return Err(ServerError::InvalidState);
        }

        let state: CsrfState =
            serde_json::from_slice(&raw).map_err(|_| ServerError::InvalidState)?;

        if state.value != value || state.is_expired_at(now) {
            return Err(ServerError::InvalidState);
        }
        Ok(state)
    }

    /// Returns the watch secret and channel descriptor, if both exist.
    pub async fn load_watch(&self, user: &UserId) -> ServerResult<Option<(String, WatchChannel)>> {
        let secret = self.get_string(&watch_token_key(user)).await?;
        let channel: Option<WatchChannel> = self.get_json(&watch_channel_key(user)).await?;
        Ok(secret.zip(channel))
    }

    pub async fn load_watch_secret(&self, user: &UserId) -> ServerResult<Option<String>> {
        self.get_string(&watch_token_key(user)).await
    }

    pub async fn save_watch(&self, secret: &str, channel: &WatchChannel) -> ServerResult<()> {
        self.store
            .set(&watch_token_key(&channel.user_id), secret.as_bytes().to_vec())
            .await?;
        self.set_json(&watch_channel_key(&channel.user_id), channel)
            .await
    }

    pub async fn delete_watch(&self, user: &UserId) -> ServerResult<()> {
        self.store.delete(&watch_token_key(user)).await?;
        self.store.delete(&watch_channel_key(user)).await?;
        Ok(())
    }

    pub async fn load_sync_token(&self, user: &UserId) -> ServerResult<Option<String>> {
        self.get_string(&sync_token_key(user)).await
    }

    pub async fn save_sync_token(&self, user: &UserId, token: &str) -> ServerResult<()> {
        self.store
            .set(&sync_token_key(user), token.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    pub async fn delete_sync_token(&self, user: &UserId) -> ServerResult<()> {
        self.store.delete(&sync_token_key(user)).await?;
        Ok(())
    }

    /// Fingerprints of already reported changes, oldest first.
    pub async fn load_digests(&self, user: &UserId) -> ServerResult<Option<Vec<String>>> {
        self.get_json(&sync_digests_key(user)).await
    }

    pub async fn save_digests(&self, user: &UserId, digests: &[String]) -> ServerResult<()> {
        self.set_json(&sync_digests_key(user), &digests).await
    }

    /// Drops sync token and digests.
    pub async fn delete_sync_state(&self, user: &UserId) -> ServerResult<()> {
        self.store.delete(&sync_token_key(user)).await?;
        self.store.delete(&sync_digests_key(user)).await?;
        Ok(())
    }
}
