//! Calendar synchronization.
//!
//! [`SyncEngine`] is the contract the OAuth flow and the webhook rely on:
//! safe to run repeatedly over overlapping windows without repeating any
//! user-visible output. [`DigestSync`] is the default engine.

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use calbridge_core::UserId;
use calbridge_providers::{BoxFuture, CalendarEvent, EventPage, ProviderErrorCode};

use crate::error::{ServerError, ServerResult};
use crate::locks::{LockScope, UserLocks};
use crate::notify::Notifier;
use crate::service::CalendarServiceFactory;
use crate::token_store::TokenStore;

/// Fingerprints kept per user.
const DEFAULT_MAX_DIGESTS: usize = 2048;

/// What a sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Events returned by the provider.
    pub listed: usize,
    /// Changes not reported before.
    pub new_changes: usize,
    /// Whether a digest was posted.
    pub posted: bool,
    /// Whether the provider forced a full listing.
    pub full_resync: bool,
}

pub trait SyncEngine: Send + Sync {
    fn sync<'a>(&'a self, user: &'a UserId) -> BoxFuture<'a, ServerResult<SyncReport>>;
}

/// Incremental sync that posts a digest of unseen changes.
///
/// The first pass for a user only records a baseline.
pub struct DigestSync {
    tokens: TokenStore,
    services: Arc<CalendarServiceFactory>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<UserLocks>,
    max_digests: usize,
}

impl DigestSync {
    pub fn new(
        tokens: TokenStore,
        services: Arc<CalendarServiceFactory>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            tokens,
            services,
            notifier,
            locks,
            max_digests: DEFAULT_MAX_DIGESTS,
        }
    }

    pub fn with_max_digests(mut self, max: usize) -> Self {
        self.max_digests = max.max(1);
        self
    }

    async fn run(&self, user: &UserId) -> ServerResult<SyncReport> {
        let _guard = self.locks.lock(user, LockScope::Sync).await;
        let client = self.services.get_service(user).await?;

        let sync_token = self.tokens.load_sync_token(user).await?;
        let mut full_resync = false;
        let page: EventPage = match client.list_changes("primary", sync_token.as_deref()).await {
            Err(e) if e.code() == ProviderErrorCode::Gone => {
                info!(user_id = %user, "sync token expired, running full listing");
                self.tokens.delete_sync_token(user).await?;
                full_resync = true;
                client.list_changes("primary", None).await?
            }
            other => other?,
        };

        let stored = self.tokens.load_digests(user).await?;
        let baseline = stored.is_none();
        let mut digests = stored.unwrap_or_default();
        let mut seen: HashSet<String> = digests.iter().cloned().collect();

        let mut fresh = Vec::new();
        for event in &page.events {
            let fingerprint = fingerprint(event);
            if seen.insert(fingerprint.clone()) {
                digests.push(fingerprint);
                fresh.push(event);
            }
        }
        if digests.len() > self.max_digests {
            let excess = digests.len() - self.max_digests;
            digests.drain(..excess);
        }

        // Bookkeeping first: a crash after this point loses a digest
        // rather than posting it twice.
        self.tokens.save_digests(user, &digests).await?;
        if let Some(ref token) = page.next_sync_token {
            self.tokens.save_sync_token(user, token).await?;
        }

        let mut report = SyncReport {
            listed: page.events.len(),
            new_changes: fresh.len(),
            posted: false,
            full_resync,
        };

        if baseline {
            debug!(user_id = %user, events = report.listed, "recorded sync baseline");
            return Ok(report);
        }

        if !fresh.is_empty() {
            self.notifier
                .notify(user, &digest_message(&fresh))
                .await?;
            report.posted = true;
        }

        debug!(
            user_id = %user,
            listed = report.listed,
            new_changes = report.new_changes,
            "sync finished"
        );
        Ok(report)
    }
}

impl SyncEngine for DigestSync {
    fn sync<'a>(&'a self, user: &'a UserId) -> BoxFuture<'a, ServerResult<SyncReport>> {
        Box::pin(async move {
            self.run(user).await.map_err(|e| match e {
                ServerError::NotConnected(_) => e,
                other => ServerError::sync_failure(other.to_string()),
            })
        })
    }
}

/// Identifies one observed version of an event.
fn fingerprint(event: &CalendarEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.id.as_bytes());
    hasher.update([0]);
    hasher.update(event.etag.as_deref().unwrap_or("").as_bytes());
    hasher.update([0]);
    hasher.update(event.status.as_deref().unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn digest_message(events: &[&CalendarEvent]) -> String {
    let mut message = String::from("#### Calendar updates\n");
    for event in events {
        if event.is_cancelled() {
            message.push_str(&format!("- _{}_ was cancelled\n", event.title()));
        } else {
            message.push_str(&format!("- _{}_ was created or updated\n", event.title()));
        }
    }
    message
}
