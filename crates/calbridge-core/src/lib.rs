//! Core types shared by the calbridge crates.
//!
//! - [`UserId`] - the authenticated end-user identity the whole system keys on
//! - [`ResponseStatus`] - an attendee's answer to an invitation
//! - [`ResourceState`] - what a provider push notification says changed
//! - [`EventAction`] - the single-event mutations a user can request
//! - [`tracing`] - logging bootstrap used by the server binary

pub mod event;
pub mod tracing;
pub mod user;

pub use event::{EventAction, EventActionRequest, ParseError, ResourceState, ResponseStatus};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
pub use user::{EmptyUserId, UserId};
