//! Google Calendar bridge server.
//!
//! Connects chat users to their Google Calendar over OAuth, keeps a push
//! channel open per user, posts digests of calendar changes and lets users
//! delete events or answer invitations from action links.
//!
//! - [`oauth`] - connect, complete and disconnect
//! - [`watch`] and [`webhook`] - push channels and inbound notifications
//! - [`sync`] - incremental sync with de-duplicated digests
//! - [`actions`] - single-event delete and response updates
//! - [`routes`] - the axum router
//! - [`app`] - wiring of all of the above

pub mod actions;
pub mod app;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod html;
pub mod locks;
pub mod notify;
pub mod oauth;
pub mod routes;
pub mod scheduler;
pub mod secret;
pub mod service;
pub mod store;
pub mod sync;
pub mod token_store;
pub mod watch;
pub mod webhook;

pub use actions::{ActionReport, EventActions};
pub use app::{App, AppBuilder, AppState, Collaborators};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ServerError, ServerResult, StoreError};
pub use notify::{HttpNotifier, LogNotifier, Notifier};
pub use oauth::OAuthFlow;
pub use scheduler::{RenewalConfig, RenewalScheduler, TokioRenewalScheduler};
pub use store::{KvStore, MemoryStore};
pub use sync::{DigestSync, SyncEngine, SyncReport};
pub use token_store::{CalendarCredential, CsrfState, TokenStore, WatchChannel};
pub use watch::WatchManager;
pub use webhook::{PushNotification, WebhookHandler, WebhookOutcome};
