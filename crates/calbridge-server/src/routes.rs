//! HTTP surface.
//!
//! Every route except `/watch` and `/healthz` acts for the user named in the
//! configured identity header, which the fronting host sets after its own
//! authentication.

use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, Redirect};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use tracing::{debug, warn};

use calbridge_core::{EventAction, EventActionRequest, ResourceState, ResponseStatus, UserId};

use crate::app::AppState;
use crate::error::{ServerError, ServerResult};
use crate::html::{CLOSE_PAGE, CONNECTED_PAGE};
use crate::webhook::PushNotification;

const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
const RESOURCE_ID_HEADER: &str = "x-goog-resource-id";
const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/oauth/connect", get(connect))
        .route("/oauth/complete", get(complete_query).post(complete_form))
        .route("/oauth/disconnect", get(disconnect).post(disconnect))
        .route("/delete", get(delete_event))
        .route("/handleresponse", get(handle_response))
        .route("/watch", post(watch))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// The user the request acts for.
pub struct ActingUser(pub UserId);

impl FromRequestParts<AppState> for ActingUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(&state.user_header)
            .and_then(|value| value.to_str().ok())
            .and_then(UserId::parse)
            .map(ActingUser)
            .ok_or(ServerError::Unauthorized)
    }
}

async fn connect(State(state): State<AppState>, ActingUser(user): ActingUser) -> ServerResult<Redirect> {
    let url = state.flow.connect(user.as_str()).await?;
    Ok(Redirect::temporary(&url))
}

#[derive(Debug, Deserialize)]
struct CompleteParams {
    #[serde(default)]
    state: String,
    #[serde(default)]
    code: String,
    error: Option<String>,
}

async fn complete_query(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Query(params): Query<CompleteParams>,
) -> ServerResult<Html<&'static str>> {
    complete(state, user, params).await
}

async fn complete_form(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Form(params): Form<CompleteParams>,
) -> ServerResult<Html<&'static str>> {
    complete(state, user, params).await
}

async fn complete(state: AppState, user: UserId, params: CompleteParams) -> ServerResult<Html<&'static str>> {
    if let Some(ref error) = params.error {
        warn!(user_id = %user, error = %error, "authorization was declined");
    }
    state
        .flow
        .complete(user.as_str(), &params.state, &params.code)
        .await?;
    Ok(Html(CONNECTED_PAGE))
}

async fn disconnect(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
) -> ServerResult<Html<&'static str>> {
    state.flow.disconnect(user.as_str()).await?;
    Ok(Html(CLOSE_PAGE))
}

#[derive(Debug, Deserialize)]
struct ActionParams {
    #[serde(default)]
    evtid: String,
    #[serde(default)]
    response: String,
}

async fn delete_event(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Query(params): Query<ActionParams>,
) -> Html<&'static str> {
    let request = EventActionRequest::new(user, params.evtid, EventAction::Delete);
    state.actions.perform(&request).await;
    Html(CLOSE_PAGE)
}

async fn handle_response(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Query(params): Query<ActionParams>,
) -> Html<&'static str> {
    match params.response.parse::<ResponseStatus>() {
        Ok(status) => {
            let request = EventActionRequest::new(user, params.evtid, EventAction::Respond(status));
            state.actions.perform(&request).await;
        }
        Err(e) => {
            debug!(user_id = %user, error = %e, "rejected response value");
            let message = format!("Error! Failed to update the response of _{}_ event. Error: {}", params.evtid, e);
            if let Err(e) = state.notifier.notify(&user, &message).await {
                warn!(user_id = %user, error = %e, "failed to deliver action result");
            }
        }
    }
    Html(CLOSE_PAGE)
}

#[derive(Debug, Default, Deserialize)]
struct WatchParams {
    #[serde(rename = "userId", default)]
    user_id: String,
}

/// Acknowledges at once; validation and sync run after the response.
async fn watch(
    State(state): State<AppState>,
    Query(params): Query<WatchParams>,
    headers: HeaderMap,
) -> StatusCode {
    let notification = PushNotification {
        user_id: params.user_id,
        channel_id: header(&headers, CHANNEL_ID_HEADER),
        resource_id: header(&headers, RESOURCE_ID_HEADER),
        resource_state: ResourceState::from_header(&header(&headers, RESOURCE_STATE_HEADER)),
    };
    let handler = state.webhook.clone();
    tokio::spawn(async move {
        let outcome = handler.handle(&notification).await;
        debug!(?outcome, "push notification handled");
    });
    StatusCode::OK
}

async fn healthz() -> &'static str {
    "ok"
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
