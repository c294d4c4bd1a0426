//! In-memory fakes and a harness wiring them into a full [`App`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};

use calbridge_core::UserId;
use calbridge_providers::{
    Attendee, AuthorizationServer, BoxFuture, CalendarApi, CalendarEvent, Channel,
    ChannelRequest, ClientFactory, EventPage, ProviderError, ProviderErrorCode, ProviderResult,
    TokenGrant,
};
use calbridge_server::{
    App, AppBuilder, Collaborators, ManualClock, MemoryStore, Notifier, PushNotification,
    RenewalScheduler, ServerResult,
};

pub const GOOD_CODE: &str = "good-code";
pub const PRIMARY_CALENDAR: &str = "me@example.com";
pub const CALLBACK_URL: &str = "https://chat.example.com/plugins/calendar/watch";

/// A single shared calendar recording every call made to it.
#[derive(Default)]
pub struct FakeCalendar {
    pub events: Mutex<HashMap<String, CalendarEvent>>,
    /// Returned by every `list_changes` call.
    pub changes: Mutex<Vec<CalendarEvent>>,
    /// Incremental listings fail with `Gone` while set.
    pub sync_token_gone: Mutex<bool>,
    pub list_calls: Mutex<Vec<Option<String>>>,
    pub watch_requests: Mutex<Vec<ChannelRequest>>,
    pub stopped: Mutex<Vec<(String, String)>>,
    pub updates: Mutex<Vec<CalendarEvent>>,
    pub deleted: Mutex<Vec<String>>,
    /// Number of upcoming updates rejected as concurrent edits.
    pub conflicts: Mutex<usize>,
    pub fail_watch: Mutex<bool>,
}

impl FakeCalendar {
    pub fn insert_event(&self, event: CalendarEvent) {
        self.events.lock().unwrap().insert(event.id.clone(), event);
    }

    pub fn set_changes(&self, events: Vec<CalendarEvent>) {
        *self.changes.lock().unwrap() = events;
    }

    pub fn watch_requests(&self) -> Vec<ChannelRequest> {
        self.watch_requests.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<(String, String)> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<CalendarEvent> {
        self.updates.lock().unwrap().clone()
    }
}

impl CalendarApi for FakeCalendar {
    fn primary_calendar_id(&self) -> BoxFuture<'_, ProviderResult<String>> {
        Box::pin(async { Ok(PRIMARY_CALENDAR.to_string()) })
    }

    fn get_event<'a>(
        &'a self,
        _calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>> {
        Box::pin(async move {
            self.events
                .lock()
                .unwrap()
                .get(event_id)
                .cloned()
                .ok_or_else(|| ProviderError::not_found("event not found"))
        })
    }

    fn update_event<'a>(
        &'a self,
        _calendar_id: &'a str,
        event: &'a CalendarEvent,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>> {
        Box::pin(async move {
            {
                let mut conflicts = self.conflicts.lock().unwrap();
                if *conflicts > 0 {
                    *conflicts -= 1;
                    return Err(ProviderError::precondition_failed("etag mismatch"));
                }
            }
            self.updates.lock().unwrap().push(event.clone());
            self.insert_event(event.clone());
            Ok(event.clone())
        })
    }

    fn delete_event<'a>(
        &'a self,
        _calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            match self.events.lock().unwrap().remove(event_id) {
                Some(_) => {
                    self.deleted.lock().unwrap().push(event_id.to_string());
                    Ok(())
                }
                None => Err(ProviderError::not_found("event not found")),
            }
        })
    }

    fn list_changes<'a>(
        &'a self,
        _calendar_id: &'a str,
        sync_token: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<EventPage>> {
        Box::pin(async move {
            let call = {
                let mut calls = self.list_calls.lock().unwrap();
                calls.push(sync_token.map(str::to_string));
                calls.len()
            };
            if sync_token.is_some() && *self.sync_token_gone.lock().unwrap() {
                return Err(ProviderError::gone("sync token is no longer valid"));
            }
            Ok(EventPage {
                events: self.changes.lock().unwrap().clone(),
                next_sync_token: Some(format!("sync-{}", call)),
            })
        })
    }

    fn watch_events<'a>(
        &'a self,
        _calendar_id: &'a str,
        request: &'a ChannelRequest,
    ) -> BoxFuture<'a, ProviderResult<Channel>> {
        Box::pin(async move {
            if *self.fail_watch.lock().unwrap() {
                return Err(ProviderError::new(
                    ProviderErrorCode::ServerError,
                    "push notifications unavailable",
                ));
            }
            let mut requests = self.watch_requests.lock().unwrap();
            requests.push(request.clone());
            Ok(Channel {
                id: request.id.clone(),
                resource_id: format!("resource-{}", requests.len()),
                expiration: None,
            })
        })
    }

    fn stop_channel<'a>(
        &'a self,
        channel_id: &'a str,
        resource_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.stopped
                .lock()
                .unwrap()
                .push((channel_id.to_string(), resource_id.to_string()));
            Ok(())
        })
    }
}

/// Hands out the shared calendar and records the access tokens used.
pub struct FakeClients {
    pub calendar: Arc<FakeCalendar>,
    pub tokens: Mutex<Vec<String>>,
}

impl FakeClients {
    pub fn last_token(&self) -> Option<String> {
        self.tokens.lock().unwrap().last().cloned()
    }
}

impl ClientFactory for FakeClients {
    fn client(&self, access_token: &str) -> Arc<dyn CalendarApi> {
        self.tokens.lock().unwrap().push(access_token.to_string());
        self.calendar.clone()
    }
}

#[derive(Default)]
pub struct FakeAuth {
    pub exchanges: Mutex<usize>,
    pub refreshes: Mutex<usize>,
}

impl FakeAuth {
    pub fn refreshes(&self) -> usize {
        *self.refreshes.lock().unwrap()
    }
}

fn grant(access_token: String, refresh_token: Option<&str>) -> TokenGrant {
    TokenGrant {
        access_token,
        refresh_token: refresh_token.map(str::to_string),
        expires_in: Some(3600),
        token_type: Some("Bearer".to_string()),
        scope: Some("https://www.googleapis.com/auth/calendar".to_string()),
    }
}

impl AuthorizationServer for FakeAuth {
    fn authorization_url(&self, state: &str) -> String {
        format!(
            "https://accounts.example.com/o/oauth2/auth?access_type=offline&state={}",
            state
        )
    }

    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(async move {
            if code != GOOD_CODE {
                return Err(ProviderError::authentication("invalid_grant"));
            }
            let n = {
                let mut exchanges = self.exchanges.lock().unwrap();
                *exchanges += 1;
                *exchanges
            };
            Ok(grant(format!("access-{}", n), Some("refresh-token")))
        })
    }

    fn refresh_token<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(async move {
            if refresh_token != "refresh-token" {
                return Err(ProviderError::authentication("invalid_grant"));
            }
            let n = {
                let mut refreshes = self.refreshes.lock().unwrap();
                *refreshes += 1;
                *refreshes
            };
            Ok(grant(format!("refreshed-{}", n), None))
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(UserId, String)>>,
}

impl RecordingNotifier {
    pub fn messages_for(&self, user: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u.as_str() == user)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn digests_for(&self, user: &str) -> Vec<String> {
        self.messages_for(user)
            .into_iter()
            .filter(|m| m.starts_with("#### Calendar updates"))
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, user: &'a UserId, message: &'a str) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async move {
            self.messages
                .lock()
                .unwrap()
                .push((user.clone(), message.to_string()));
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    pub scheduled: Mutex<Vec<UserId>>,
    pub cancelled: Mutex<Vec<UserId>>,
}

impl RenewalScheduler for RecordingScheduler {
    fn schedule(&self, user: &UserId) -> ServerResult<()> {
        self.scheduled.lock().unwrap().push(user.clone());
        Ok(())
    }

    fn cancel(&self, user: &UserId) {
        self.cancelled.lock().unwrap().push(user.clone());
    }
}

pub struct TestHarness {
    pub app: App,
    pub store: Arc<MemoryStore>,
    pub calendar: Arc<FakeCalendar>,
    pub clients: Arc<FakeClients>,
    pub auth: Arc<FakeAuth>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Arc<RecordingScheduler>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let calendar = Arc::new(FakeCalendar::default());
        let clients = Arc::new(FakeClients {
            calendar: calendar.clone(),
            tokens: Mutex::new(Vec::new()),
        });
        let auth = Arc::new(FakeAuth::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap(),
        ));

        let app = AppBuilder::new(
            Collaborators {
                store: store.clone(),
                auth: auth.clone(),
                clients: clients.clone(),
                notifier: notifier.clone(),
                clock: clock.clone(),
            },
            CALLBACK_URL,
        )
        .scheduler(scheduler.clone())
        .channel_ttl(Duration::from_secs(3600))
        .build();

        Self {
            app,
            store,
            calendar,
            clients,
            auth,
            notifier,
            scheduler,
            clock,
        }
    }

    /// Starts a flow and returns the issued state.
    pub async fn start(&self, user: &str) -> String {
        let url = self.app.state.flow.connect(user).await.unwrap();
        state_from_url(&url)
    }

    /// Runs a complete connect for `user`.
    pub async fn connect(&self, user: &str) {
        let state = self.start(user).await;
        self.app
            .state
            .flow
            .complete(user, &state, GOOD_CODE)
            .await
            .unwrap();
    }

    /// A notification carrying the user's current channel id.
    pub async fn authentic_notification(&self, user: &str, state: &str) -> PushNotification {
        let (secret, channel) = self
            .app
            .tokens
            .load_watch(&user_id(user))
            .await
            .unwrap()
            .expect("user has a watch channel");
        PushNotification {
            user_id: user.to_string(),
            channel_id: secret,
            resource_id: channel.resource_id,
            resource_state: calbridge_core::ResourceState::from_header(state),
        }
    }
}

pub fn user_id(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

pub fn state_from_url(url: &str) -> String {
    let (_, state) = url.split_once("state=").expect("url carries a state");
    state.to_string()
}

pub fn event(id: &str, etag: &str, summary: &str) -> CalendarEvent {
    CalendarEvent {
        id: id.to_string(),
        summary: Some(summary.to_string()),
        status: Some("confirmed".to_string()),
        etag: Some(etag.to_string()),
        ..Default::default()
    }
}

pub fn attendee(email: &str, is_self: bool, status: &str) -> Attendee {
    Attendee {
        email: Some(email.to_string()),
        is_self,
        response_status: Some(status.to_string()),
        ..Default::default()
    }
}
