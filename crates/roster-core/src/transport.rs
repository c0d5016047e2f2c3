//! Transport trait for session runners.
//!
//! Implementations:
//! - In-process: `LocalHub` (tests and the daemon harness)
//!
//! A transport owns session membership and the remote-procedure primitive.
//! It reports raw joins/leaves and inbound payloads as `TransportEvent`s on
//! the channel it was constructed with, so every event is routed to exactly
//! one session without any global lookup.

use crate::{MetadataChannel, PeerId, PeerMetadata, SessionConfig};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport is not running")]
    NotRunning,

    #[error("Transport error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Inbound event delivered by a transport to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A participant joined at the transport level (no metadata yet)
    Joined(PeerId),
    /// A participant left the session
    Left(PeerId),
    /// Metadata advertised by `sender`
    Metadata {
        sender: PeerId,
        metadata: PeerMetadata,
    },
    /// Bytes sent point-to-point by `sender`
    Data { sender: PeerId, data: Vec<u8> },
    /// Bytes `sender` addressed to the authority
    AuthorityData { sender: PeerId, data: Vec<u8> },
}

/// Session runner used by a `Session`.
///
/// Everything except `start`/`shutdown` must answer without blocking.
#[async_trait]
pub trait Transport: MetadataChannel {
    /// Join a session. Resolves once the transport has succeeded or failed.
    async fn start(&self, config: &SessionConfig) -> Result<()>;

    /// Leave the session.
    async fn shutdown(&self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Our own participant ID, once started
    fn local_peer(&self) -> Option<PeerId>;

    /// Participants currently in the session, ourselves included
    fn active_participants(&self) -> Vec<PeerId>;

    /// Whether this node currently holds the authority role
    fn is_authority(&self) -> bool;

    /// Round-trip time to `peer`, in seconds
    fn round_trip_time(&self, peer: PeerId) -> f64;

    /// Shared session clock, in seconds
    fn session_time(&self) -> f64;

    /// Opaque timing value advertised alongside our role
    fn latency_sample(&self) -> i64;
}
