//! Google Calendar API v3 client.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::provider::{
    BoxFuture, CalendarApi, CalendarEvent, Channel, ChannelRequest, ClientFactory, EventPage,
};

use super::config::GoogleConfig;

/// Page size for event listings.
const PAGE_SIZE: usize = 250;

/// Google Calendar API client bound to one access token.
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    api_base: String,
    access_token: String,
}

impl GoogleCalendarClient {
    pub fn new(
        http_client: reqwest::Client,
        api_base: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/calendars/{}/events/{}",
            self.api_base,
            urlencoding::encode(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ProviderResult<reqwest::Response> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ProviderError::from(e).with_provider("google"))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(ProviderError::new(
                ProviderErrorCode::RateLimited,
                format!(
                    "rate limit exceeded{}",
                    retry_after
                        .map(|s| format!(", retry after {} seconds", s))
                        .unwrap_or_default()
                ),
            )
            .with_provider("google"));
        }

        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status.as_u16(), &body).with_provider("google"))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> ProviderResult<T> {
        let response = self.send(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse response: {}", e))
                .with_provider("google")
        })
    }

    async fn primary_calendar(&self) -> ProviderResult<String> {
        let url = format!("{}/users/me/calendarList/primary", self.api_base);
        let entry: CalendarListEntry = self.send_json(self.http_client.get(&url)).await?;
        Ok(entry.id)
    }

    async fn fetch_event(&self, calendar_id: &str, event_id: &str) -> ProviderResult<CalendarEvent> {
        let url = self.event_url(calendar_id, event_id);
        self.send_json(self.http_client.get(&url)).await
    }

    async fn put_event(
        &self,
        calendar_id: &str,
        event: &CalendarEvent,
    ) -> ProviderResult<CalendarEvent> {
        let url = self.event_url(calendar_id, &event.id);
        let mut request = self.http_client.put(&url).json(event);
        if let Some(ref etag) = event.etag {
            request = request.header("If-Match", etag);
        }
        self.send_json(request).await
    }

    async fn remove_event(&self, calendar_id: &str, event_id: &str) -> ProviderResult<()> {
        let url = self.event_url(calendar_id, event_id);
        self.send(self.http_client.delete(&url)).await?;
        Ok(())
    }

    async fn list(&self, calendar_id: &str, sync_token: Option<&str>) -> ProviderResult<EventPage> {
        let url = format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(calendar_id)
        );

        let mut page = EventPage::default();
        let mut page_token: Option<String> = None;

        loop {
            // Incremental requests must repeat the initial listing's
            // expansion mode.
            let mut request = self.http_client.get(&url).query(&[
                ("maxResults", PAGE_SIZE.to_string()),
                ("singleEvents", "true".to_string()),
            ]);

            // The provider rejects time bounds next to a sync token.
            request = match sync_token {
                Some(token) => request.query(&[("syncToken", token)]),
                None => request.query(&[("timeMin", Utc::now().to_rfc3339())]),
            };

            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let result: EventListResponse = self.send_json(request).await?;
            page.events.extend(result.items);

            match result.next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    page.next_sync_token = result.next_sync_token;
                    break;
                }
            }
        }

        debug!(
            calendar_id,
            count = page.events.len(),
            incremental = sync_token.is_some(),
            "listed events"
        );
        Ok(page)
    }

    async fn watch(&self, calendar_id: &str, request: &ChannelRequest) -> ProviderResult<Channel> {
        let url = format!(
            "{}/calendars/{}/events/watch",
            self.api_base,
            urlencoding::encode(calendar_id)
        );

        let body = WatchBody {
            id: &request.id,
            kind: "web_hook",
            address: &request.address,
            params: request.ttl.map(|ttl| WatchParams {
                ttl: ttl.as_secs().to_string(),
            }),
        };

        let response: ChannelResponse = self.send_json(self.http_client.post(&url).json(&body)).await?;
        Ok(Channel {
            id: response.id,
            resource_id: response.resource_id,
            expiration: response.expiration.as_deref().and_then(parse_expiration),
        })
    }

    async fn stop(&self, channel_id: &str, resource_id: &str) -> ProviderResult<()> {
        let url = format!("{}/channels/stop", self.api_base);
        let body = StopBody {
            id: channel_id,
            resource_id,
        };
        self.send(self.http_client.post(&url).json(&body)).await?;
        Ok(())
    }
}

impl CalendarApi for GoogleCalendarClient {
    fn primary_calendar_id(&self) -> BoxFuture<'_, ProviderResult<String>> {
        Box::pin(async move { self.primary_calendar().await })
    }

    fn get_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>> {
        Box::pin(async move { self.fetch_event(calendar_id, event_id).await })
    }

    fn update_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event: &'a CalendarEvent,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>> {
        Box::pin(async move { self.put_event(calendar_id, event).await })
    }

    fn delete_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.remove_event(calendar_id, event_id).await })
    }

    fn list_changes<'a>(
        &'a self,
        calendar_id: &'a str,
        sync_token: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<EventPage>> {
        Box::pin(async move { self.list(calendar_id, sync_token).await })
    }

    fn watch_events<'a>(
        &'a self,
        calendar_id: &'a str,
        request: &'a ChannelRequest,
    ) -> BoxFuture<'a, ProviderResult<Channel>> {
        Box::pin(async move { self.watch(calendar_id, request).await })
    }

    fn stop_channel<'a>(
        &'a self,
        channel_id: &'a str,
        resource_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.stop(channel_id, resource_id).await })
    }
}

/// Builds [`GoogleCalendarClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct GoogleClientFactory {
    http_client: reqwest::Client,
    api_base: String,
}

impl GoogleClientFactory {
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProviderError::configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base: config.endpoints.api_base.clone(),
        })
    }
}

impl ClientFactory for GoogleClientFactory {
    fn client(&self, access_token: &str) -> Arc<dyn CalendarApi> {
        Arc::new(GoogleCalendarClient::new(
            self.http_client.clone(),
            self.api_base.clone(),
            access_token,
        ))
    }
}

/// Channel expirations arrive as Unix milliseconds in a string.
fn parse_expiration(raw: &str) -> Option<DateTime<Utc>> {
    match raw.parse::<i64>() {
        Ok(millis) => Utc.timestamp_millis_opt(millis).single(),
        Err(e) => {
            warn!("unparseable channel expiration {:?}: {}", raw, e);
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<CalendarEvent>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListEntry {
    id: String,
}

#[derive(Debug, Serialize)]
struct WatchBody<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<WatchParams>,
}

#[derive(Debug, Serialize)]
struct WatchParams {
    ttl: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopBody<'a> {
    id: &'a str,
    resource_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResponse {
    id: String,
    resource_id: String,
    expiration: Option<String>,
}
