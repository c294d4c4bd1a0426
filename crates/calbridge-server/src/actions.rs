//! Single-event actions triggered from message links.
//!
//! Results go back to the user as notifications; the HTTP caller is a
//! popup that closes itself and never sees an error.

use std::sync::Arc;

use tracing::{debug, warn};

use calbridge_core::{EventAction, EventActionRequest, ResponseStatus, UserId};
use calbridge_providers::{CalendarApi, ProviderErrorCode};

use crate::notify::Notifier;
use crate::service::CalendarServiceFactory;

/// Attempts at a response update before giving up on concurrent edits.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// The message posted for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReport {
    Succeeded(String),
    Failed(String),
}

impl ActionReport {
    pub fn message(&self) -> &str {
        match self {
            Self::Succeeded(m) | Self::Failed(m) => m,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

pub struct EventActions {
    services: Arc<CalendarServiceFactory>,
    notifier: Arc<dyn Notifier>,
}

impl EventActions {
    pub fn new(services: Arc<CalendarServiceFactory>, notifier: Arc<dyn Notifier>) -> Self {
        Self { services, notifier }
    }

    /// Runs `request` and notifies the user of the outcome.
    pub async fn perform(&self, request: &EventActionRequest) -> ActionReport {
        let report = match request.action {
            EventAction::Delete => {
                self.delete_event(&request.user_id, &request.calendar_id, &request.event_id)
                    .await
            }
            EventAction::Respond(status) => {
                self.handle_event_response(
                    &request.user_id,
                    &request.calendar_id,
                    &request.event_id,
                    status,
                )
                .await
            }
        };

        if let Err(e) = self.notifier.notify(&request.user_id, report.message()).await {
            warn!(user_id = %request.user_id, error = %e, "failed to deliver action result");
        }
        report
    }

    /// Deletes an event. Fetches it first only to name it in the report.
    pub async fn delete_event(
        &self,
        user: &UserId,
        calendar_id: &str,
        event_id: &str,
    ) -> ActionReport {
        let client = match self.services.get_service(user).await {
            Ok(client) => client,
            Err(e) => return failed_delete(user, &e),
        };
        let calendar_id = resolve_calendar(client.as_ref(), calendar_id).await;

        // Another actor may delete the event between these two calls; the
        // delete then fails and is reported like any other failure.
        let title = match client.get_event(&calendar_id, event_id).await {
            Ok(event) => event.title().to_string(),
            Err(e) => {
                debug!(user_id = %user, event_id, error = %e, "event lookup failed");
                event_id.to_string()
            }
        };

        match client.delete_event(&calendar_id, event_id).await {
            Ok(()) => ActionReport::Succeeded(format!("Success! Event _{}_ has been deleted.", title)),
            Err(e) => failed_delete(user, &e),
        }
    }

    /// Sets the acting user's response on an event.
    ///
    /// Only attendee entries flagged as the token owner are changed. An
    /// event without such an entry is reported as a failure and left
    /// untouched. Updates carry the fetched ETag; on a conflicting
    /// concurrent edit the event is refetched and the change reapplied.
    pub async fn handle_event_response(
        &self,
        user: &UserId,
        calendar_id: &str,
        event_id: &str,
        status: ResponseStatus,
    ) -> ActionReport {
        let client = match self.services.get_service(user).await {
            Ok(client) => client,
            Err(e) => return failed_response(user, event_id, &e),
        };
        let calendar_id = resolve_calendar(client.as_ref(), calendar_id).await;

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let mut event = match client.get_event(&calendar_id, event_id).await {
                Ok(event) => event,
                Err(e) => return failed_response(user, event_id, &e),
            };

            if event.set_self_response(status) == 0 {
                warn!(user_id = %user, event_id, "no self attendee on event");
                return ActionReport::Failed(format!(
                    "Error! You are not an attendee of _{}_, so no response was recorded.",
                    event.title()
                ));
            }

            match client.update_event(&calendar_id, &event).await {
                Ok(updated) => {
                    return ActionReport::Succeeded(format!(
                        "Success! Event _{}_ response has been updated to {}.",
                        updated.title(),
                        status
                    ));
                }
                Err(e)
                    if e.code() == ProviderErrorCode::PreconditionFailed
                        && attempt < MAX_UPDATE_ATTEMPTS =>
                {
                    debug!(user_id = %user, event_id, attempt, "event changed concurrently, retrying");
                }
                Err(e) => {
                    return ActionReport::Failed(format!(
                        "Error! Failed to update the response of _{}_ event. Error: {}",
                        event.title(),
                        e
                    ));
                }
            }
        }

        ActionReport::Failed(format!(
            "Error! Failed to update the response of _{}_ event.",
            event_id
        ))
    }
}

/// Resolves the `primary` alias to the calendar's real id, keeping the
/// alias if the lookup fails.
async fn resolve_calendar(client: &dyn CalendarApi, calendar_id: &str) -> String {
    if calendar_id != "primary" {
        return calendar_id.to_string();
    }
    match client.primary_calendar_id().await {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "primary calendar lookup failed, using alias");
            calendar_id.to_string()
        }
    }
}

fn failed_delete(user: &UserId, error: &dyn std::fmt::Display) -> ActionReport {
    warn!(user_id = %user, error = %error, "delete failed");
    ActionReport::Failed(format!("Unable to delete event. Error: {}", error))
}

fn failed_response(user: &UserId, event_id: &str, error: &dyn std::fmt::Display) -> ActionReport {
    warn!(user_id = %user, event_id, error = %error, "response update failed");
    ActionReport::Failed(format!(
        "Error! Failed to update the response of _{}_ event. Error: {}",
        event_id, error
    ))
}

