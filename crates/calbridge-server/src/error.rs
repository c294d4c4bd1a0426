//! Server error types.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use calbridge_core::UserId;
use calbridge_providers::ProviderError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors from the key-value store contract.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The acting user is missing or does not match the flow's user.
    #[error("Not authorized")]
    Unauthorized,

    /// The CSRF state was never issued, already consumed or expired.
    #[error("Invalid state")]
    InvalidState,

    /// The provider rejected the authorization code.
    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailure(#[source] ProviderError),

    /// A record could not be serialized or read back.
    #[error("Failed to encode record: {0}")]
    MarshalFailure(#[from] serde_json::Error),

    /// The sync engine failed.
    #[error("Calendar sync failed: {message}")]
    SyncFailure { message: String },

    /// The push-notification channel could not be registered.
    #[error("Watch setup failed: {message}")]
    WatchSetupFailure { message: String },

    /// Any other failure of a provider call.
    #[error("Calendar provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The user has no stored credential.
    #[error("Calendar not connected for user {0}")]
    NotConnected(UserId),

    /// The notification collaborator failed.
    #[error("Notification failed: {message}")]
    Notify { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error (listener, config file).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    pub fn sync_failure(message: impl Into<String>) -> Self {
        Self::SyncFailure {
            message: message.into(),
        }
    }

    pub fn watch_setup(message: impl Into<String>) -> Self {
        Self::WatchSetupFailure {
            message: message.into(),
        }
    }

    pub fn notify(message: impl Into<String>) -> Self {
        Self::Notify {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// HTTP status for a browser-facing failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidState | Self::ExchangeFailure(_) => StatusCode::BAD_REQUEST,
            Self::NotConnected(_) => StatusCode::NOT_FOUND,
            Self::WatchSetupFailure { .. } | Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::MarshalFailure(_)
            | Self::SyncFailure { .. }
            | Self::Notify { .. }
            | Self::Store(_)
            | Self::Config { .. }
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
