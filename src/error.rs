//! Crate-level error types.

use thiserror::Error;

use crate::api::ApiError;
use crate::auth::AuthError;
use crate::socket::SocketError;

/// A user input problem caught before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors returned by the ride and planner trackers.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The tracker's event loop has stopped.
    #[error("Session tracker is closed")]
    Closed,
}

impl Error {
    /// Message suitable for showing to the user verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Error::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
