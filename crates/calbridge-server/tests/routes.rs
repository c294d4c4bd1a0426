//! HTTP routes through the axum router.

mod common;

use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use tower::ServiceExt;

use common::{GOOD_CODE, TestHarness};

const USER_HEADER: &str = "Mattermost-User-Id";

async fn send(harness: &TestHarness, request: Request<Body>) -> Response {
    harness.app.router().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn healthz() {
    let harness = TestHarness::new();
    let response = send(&harness, get("/healthz", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

#[tokio::test]
async fn connect_requires_user_header() {
    let harness = TestHarness::new();
    let response = send(&harness, get("/oauth/connect", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(response).await, "Not authorized");
}

#[tokio::test]
async fn connect_redirects_to_consent() {
    let harness = TestHarness::new();
    let response = send(&harness, get("/oauth/connect", Some("U1"))).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://accounts.example.com/"));
    let state = common::state_from_url(location);
    assert!(harness.store.contains_key(&state).await);
}

#[tokio::test]
async fn complete_over_get_and_replay() {
    let harness = TestHarness::new();
    let state = harness.start("U1").await;
    let uri = format!("/oauth/complete?state={}&code={}", state, GOOD_CODE);

    let response = send(&harness, get(&uri, Some("U1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Completed connecting to Google Calendar"));

    let response = send(&harness, get(&uri, Some("U1"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Invalid state");
}

#[tokio::test]
async fn complete_over_form_post() {
    let harness = TestHarness::new();
    let state = harness.start("U1").await;

    let request = Request::builder()
        .method("POST")
        .uri("/oauth/complete")
        .header(USER_HEADER, "U1")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("state={}&code={}", state, GOOD_CODE)))
        .unwrap();
    let response = send(&harness, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.store.contains_key("U1calendarToken").await);
}

#[tokio::test]
async fn complete_by_other_user_is_unauthorized() {
    let harness = TestHarness::new();
    let state = harness.start("U1").await;
    let uri = format!("/oauth/complete?state={}&code={}", state, GOOD_CODE);

    let response = send(&harness, get(&uri, Some("U2"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn declined_consent_is_an_exchange_failure() {
    let harness = TestHarness::new();
    let state = harness.start("U1").await;
    let uri = format!("/oauth/complete?state={}&error=access_denied", state);

    let response = send(&harness, get(&uri, Some("U1"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!harness.store.contains_key("U1calendarToken").await);
}

#[tokio::test]
async fn disconnect_route() {
    let harness = TestHarness::new();
    harness.connect("U1").await;

    let response = send(&harness, get("/oauth/disconnect", Some("U1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.store.is_empty().await);
}

#[tokio::test]
async fn delete_route_closes_window() {
    let harness = TestHarness::new();
    harness.connect("U1").await;
    harness
        .calendar
        .insert_event(common::event("e1", "\"1\"", "Standup"));

    let response = send(&harness, get("/delete?evtid=e1", Some("U1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("window.close()"));
    assert_eq!(*harness.calendar.deleted.lock().unwrap(), vec!["e1".to_string()]);
}

#[tokio::test]
async fn action_link_without_event_id_reports_by_notification() {
    let harness = TestHarness::new();
    harness.connect("U1").await;

    let response = send(&harness, get("/delete", Some("U1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("window.close()"));

    let last = harness.notifier.messages_for("U1").pop().unwrap();
    assert!(last.starts_with("Unable to delete event."));
    assert!(harness.calendar.deleted.lock().unwrap().is_empty());

    let response = send(&harness, get("/handleresponse?response=accepted", Some("U1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let last = harness.notifier.messages_for("U1").pop().unwrap();
    assert!(last.starts_with("Error! Failed to update the response of"));
}

#[tokio::test]
async fn invalid_response_value_is_reported() {
    let harness = TestHarness::new();
    harness.connect("U1").await;

    let response = send(
        &harness,
        get("/handleresponse?evtid=e1&response=maybe", Some("U1")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let last = harness.notifier.messages_for("U1").pop().unwrap();
    assert!(last.starts_with("Error! Failed to update the response of _e1_ event."));
    assert!(harness.calendar.updates().is_empty());
}

#[tokio::test]
async fn watch_acknowledges_and_tears_down_forged_channel() {
    let harness = TestHarness::new();
    harness.connect("U1").await;

    let request = Request::builder()
        .method("POST")
        .uri("/watch?userId=U1")
        .header("X-Goog-Channel-ID", "forged")
        .header("X-Goog-Resource-ID", "resource-x")
        .header("X-Goog-Resource-State", "exists")
        .body(Body::empty())
        .unwrap();
    let response = send(&harness, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Handling continues after the response.
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stopped = harness.calendar.stopped();
            if !stopped.is_empty() {
                return stopped;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(stopped, vec![("forged".to_string(), "resource-x".to_string())]);
}
