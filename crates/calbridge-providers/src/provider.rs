//! Provider seams.
//!
//! [`CalendarApi`] is an authenticated handle on one user's calendars,
//! [`ClientFactory`] builds one from an access token, and
//! [`AuthorizationServer`] drives the OAuth authorization-code grant.
//! The server crate only ever talks to these traits, so tests can swap
//! in in-memory fakes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use calbridge_core::ResponseStatus;

use crate::error::ProviderResult;
use crate::tokens::TokenGrant;

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An attendee entry of an event.
///
/// Fields this crate does not interpret are kept in `extra` so a fetched
/// event can be written back without losing data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Set by the provider on the entry that represents the token owner.
    #[serde(rename = "self", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_self: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Attendee {
    /// Parsed response status, if the provider sent a known value.
    pub fn status(&self) -> Option<ResponseStatus> {
        self.response_status.as_deref()?.parse().ok()
    }

    pub fn set_status(&mut self, status: ResponseStatus) {
        self.response_status = Some(status.as_str().to_string());
    }
}

/// A calendar event as exchanged with the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Concurrency token; sent back as `If-Match` on update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CalendarEvent {
    /// Summary for display, falling back to a placeholder.
    pub fn title(&self) -> &str {
        match self.summary.as_deref() {
            Some(s) if !s.trim().is_empty() => s,
            _ => "(no title)",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    /// Sets the response status of every self-attendee entry.
    ///
    /// Returns how many entries were changed; other attendees are untouched.
    pub fn set_self_response(&mut self, status: ResponseStatus) -> usize {
        let mut changed = 0;
        for attendee in self.attendees.iter_mut().filter(|a| a.is_self) {
            attendee.set_status(status);
            changed += 1;
        }
        changed
    }
}

/// One incremental listing of a calendar.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    /// Events changed since the sync token (or all events on a full listing).
    pub events: Vec<CalendarEvent>,
    /// Token to present on the next incremental listing.
    pub next_sync_token: Option<String>,
}

/// A push-notification subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Channel id; echoed by the provider in every notification.
    pub id: String,
    /// HTTPS address the provider will POST notifications to.
    pub address: String,
    /// Requested lifetime; the provider may shorten it.
    pub ttl: Option<Duration>,
}

/// A registered push-notification subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    /// Provider-side id of the watched resource; needed to stop the channel.
    pub resource_id: String,
    pub expiration: Option<DateTime<Utc>>,
}

/// Authenticated access to one user's calendars.
pub trait CalendarApi: Send + Sync {
    /// Id of the user's primary calendar.
    fn primary_calendar_id(&self) -> BoxFuture<'_, ProviderResult<String>>;

    fn get_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>>;

    /// Replaces the event. Fails with `PreconditionFailed` if `event.etag`
    /// no longer matches the provider's copy.
    fn update_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event: &'a CalendarEvent,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>>;

    fn delete_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Lists changes since `sync_token`, or upcoming events when `None`.
    ///
    /// Fails with `Gone` when the provider invalidated the token.
    fn list_changes<'a>(
        &'a self,
        calendar_id: &'a str,
        sync_token: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<EventPage>>;

    fn watch_events<'a>(
        &'a self,
        calendar_id: &'a str,
        request: &'a ChannelRequest,
    ) -> BoxFuture<'a, ProviderResult<Channel>>;

    fn stop_channel<'a>(
        &'a self,
        channel_id: &'a str,
        resource_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>>;
}

/// Builds [`CalendarApi`] handles from access tokens.
pub trait ClientFactory: Send + Sync {
    fn client(&self, access_token: &str) -> Arc<dyn CalendarApi>;
}

/// The provider's OAuth authorization server.
pub trait AuthorizationServer: Send + Sync {
    /// Consent URL carrying `state`, requesting offline access and forced
    /// re-consent so a refresh token is always issued.
    fn authorization_url(&self, state: &str) -> String;

    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, ProviderResult<TokenGrant>>;

    fn refresh_token<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenGrant>>;
}
