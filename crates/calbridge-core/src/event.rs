//! Event-level vocabulary shared between the provider and server crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::user::UserId;

/// Error returned when a wire value does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

impl ParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// An attendee's response to an invitation.
///
/// Serialized with the provider's camelCase spelling (`needsAction`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStatus {
    /// The attendee has accepted the invitation.
    Accepted,
    /// The attendee has declined the invitation.
    Declined,
    /// The attendee has tentatively accepted.
    Tentative,
    /// The attendee has not responded.
    NeedsAction,
}

impl ResponseStatus {
    /// Returns the provider wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Tentative => "tentative",
            Self::NeedsAction => "needsAction",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "tentative" => Ok(Self::Tentative),
            "needsAction" => Ok(Self::NeedsAction),
            other => Err(ParseError::new("response status", other)),
        }
    }
}

/// The provider's description of what a push notification represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Channel creation handshake.
    Sync,
    /// The watched resource changed.
    Exists,
    /// The watched resource no longer exists.
    NotExists,
    /// Anything the provider may add later.
    Other(String),
}

impl ResourceState {
    /// Parses the raw header value. Never fails; unknown values are kept.
    pub fn from_header(value: &str) -> Self {
        match value {
            "sync" => Self::Sync,
            "exists" => Self::Exists,
            "not_exists" => Self::NotExists,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns true when the notification reports a real change.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Exists)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => f.write_str("sync"),
            Self::Exists => f.write_str("exists"),
            Self::NotExists => f.write_str("not_exists"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// A single-event mutation requested through an action link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Delete the event.
    Delete,
    /// Set the acting user's response status.
    Respond(ResponseStatus),
}

/// A request to act on one event of the user's primary calendar.
///
/// Lives only for the duration of one HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventActionRequest {
    pub user_id: UserId,
    pub event_id: String,
    pub calendar_id: String,
    pub action: EventAction,
}

impl EventActionRequest {
    /// Creates a request against the user's primary calendar.
    pub fn new(user_id: UserId, event_id: impl Into<String>, action: EventAction) -> Self {
        Self {
            user_id,
            event_id: event_id.into(),
            calendar_id: "primary".to_string(),
            action,
        }
    }

    /// Overrides the calendar the action targets.
    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_status_round_trips_wire_values() {
        for status in [
            ResponseStatus::Accepted,
            ResponseStatus::Declined,
            ResponseStatus::Tentative,
            ResponseStatus::NeedsAction,
        ] {
            assert_eq!(status.as_str().parse::<ResponseStatus>().unwrap(), status);
        }
    }

    #[test]
    fn response_status_rejects_unknown() {
        let err = "maybe".parse::<ResponseStatus>().unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn response_status_serde_uses_camel_case() {
        let json = serde_json::to_string(&ResponseStatus::NeedsAction).unwrap();
        assert_eq!(json, "\"needsAction\"");
    }

    #[test]
    fn resource_state_parsing() {
        assert_eq!(ResourceState::from_header("sync"), ResourceState::Sync);
        assert_eq!(ResourceState::from_header("exists"), ResourceState::Exists);
        assert_eq!(
            ResourceState::from_header("not_exists"),
            ResourceState::NotExists
        );
        assert_eq!(
            ResourceState::from_header("weird"),
            ResourceState::Other("weird".to_string())
        );
    }

    #[test]
    fn only_exists_is_a_change() {
        assert!(ResourceState::Exists.is_change());
        assert!(!ResourceState::Sync.is_change());
        assert!(!ResourceState::NotExists.is_change());
        assert!(!ResourceState::Other(String::new()).is_change());
    }

    #[test]
    fn action_request_defaults_to_primary() {
        let user = UserId::parse("U1").unwrap();
        let req = EventActionRequest::new(user, "evt", EventAction::Delete);
        assert_eq!(req.calendar_id, "primary");
        let req = req.with_calendar_id("me@example.com");
        assert_eq!(req.calendar_id, "me@example.com");
    }
}
