//! Authenticated user identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a user id is empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("user id must not be empty")]
pub struct EmptyUserId;

/// The id of an authenticated end user.
///
/// Every persisted record is keyed on this value, so an empty id is never
/// representable: construction goes through [`UserId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct UserId(String);

impl UserId {
    /// Returns a user id if `raw` is non-empty after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = EmptyUserId;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or(EmptyUserId)
    }
}

impl From<UserId> for String {
    fn from(user: UserId) -> Self {
        user.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_empty() {
        assert!(UserId::parse("").is_none());
        assert!(UserId::parse("   ").is_none());
    }

    #[test]
    fn parse_trims() {
        let user = UserId::parse(" U1 ").unwrap();
        assert_eq!(user.as_str(), "U1");
        assert_eq!(user.to_string(), "U1");
    }

    #[test]
    fn serializes_as_plain_string() {
        let user = UserId::parse("abc").unwrap();
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"abc\"");
    }

    #[test]
    fn deserialize_goes_through_parse() {
        let user: UserId = serde_json::from_str("\" U1 \"").unwrap();
        assert_eq!(user.as_str(), "U1");
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
        assert!(serde_json::from_str::<UserId>("\"  \"").is_err());
    }
}
