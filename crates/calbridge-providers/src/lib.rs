//! Calendar provider seams and the Google implementation.
//!
//! - [`CalendarApi`] - authenticated access to one user's calendars
//! - [`ClientFactory`] - builds a [`CalendarApi`] from an access token
//! - [`AuthorizationServer`] - the OAuth authorization-code grant
//! - [`TokenInfo`] - the persisted credential, with expiry bookkeeping
//! - [`ProviderError`] - error taxonomy for everything that leaves the process

pub mod error;
pub mod google;
pub mod provider;
pub mod tokens;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use provider::{
    Attendee, AuthorizationServer, BoxFuture, CalendarApi, CalendarEvent, Channel, ChannelRequest,
    ClientFactory, EventPage,
};
pub use tokens::{TokenGrant, TokenInfo};
