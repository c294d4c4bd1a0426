//! Out-of-band messages to users.
//!
//! Action links and sync digests report back through a [`Notifier`]
//! rather than through HTTP responses; the delivery mechanism (a chat
//! bot's direct message, typically) lives outside this crate.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use calbridge_core::UserId;
use calbridge_providers::BoxFuture;

use crate::error::{ServerError, ServerResult};

/// Delivers a message to a user.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, user: &'a UserId, message: &'a str)
    -> BoxFuture<'a, ServerResult<()>>;
}

/// Writes messages to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(
        &'a self,
        user: &'a UserId,
        message: &'a str,
    ) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async move {
            info!(user_id = %user, message, "notification");
            Ok(())
        })
    }
}

#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    user_id: &'a str,
    message: &'a str,
}

/// POSTs `{"user_id": ..., "message": ...}` to a relay endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    http_client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> ServerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServerError::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }

    async fn post(&self, user: &UserId, message: &str) -> ServerResult<()> {
        let payload = NotificationPayload {
            user_id: user.as_str(),
            message,
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServerError::notify(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServerError::notify(format!(
                "relay returned {}: {}",
                status,
                body.trim()
            )));
        }

        debug!(user_id = %user, "notification delivered");
        Ok(())
    }
}

impl Notifier for HttpNotifier {
    fn notify<'a>(
        &'a self,
        user: &'a UserId,
        message: &'a str,
    ) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async move { self.post(user, message).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn user() -> UserId {
        UserId::parse("U1").unwrap()
    }

    #[tokio::test]
    async fn log_notifier_accepts_everything() {
        LogNotifier.notify(&user(), "hello").await.unwrap();
    }

    #[tokio::test]
    async fn http_notifier_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .and(body_json(serde_json::json!({"user_id": "U1", "message": "hi"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier =
            HttpNotifier::new(format!("{}/notify", server.uri()), Duration::from_secs(5)).unwrap();
        notifier.notify(&user(), "hi").await.unwrap();
    }

    #[tokio::test]
    async fn http_notifier_reports_relay_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = notifier.notify(&user(), "hi").await.unwrap_err();
        assert!(matches!(err, ServerError::Notify { .. }));
        assert!(err.to_string().contains("503"));
    }
}
