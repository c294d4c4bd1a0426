//! Google Calendar implementation of the provider seams.
//!
//! - [`OAuthClient`] drives the authorization-code grant with offline access
//!   and forced consent, so every completed flow yields a refresh token.
//! - [`GoogleClientFactory`] hands out [`GoogleCalendarClient`]s bound to one
//!   access token, all sharing a single connection pool.

mod client;
mod config;
mod oauth;

pub use client::{GoogleCalendarClient, GoogleClientFactory};
pub use config::{GoogleConfig, GoogleEndpoints, OAuthCredentials};
pub use oauth::OAuthClient;
