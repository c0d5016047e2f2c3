use crate::transport::TransportError;
use thiserror::Error;

/// Errors surfaced by `Session`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session has no local participant: either `connect` has not
    /// succeeded yet, or an event was routed to a session that already left.
    #[error("Session is not connected")]
    NotConnected,
}
