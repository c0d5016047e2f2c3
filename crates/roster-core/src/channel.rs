//! Metadata channel: the remote-procedure delivery contract the registry
//! protocol is built on.
//!
//! Every call is fire-and-forget. A call's payload reaches each addressed
//! recipient intact, but nothing is promised about the relative order of two
//! different calls, even from the same sender.

use crate::transport::TransportError;
use crate::{PeerId, PeerMetadata};
use serde::{Deserialize, Serialize};

/// Payloads carried by the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Payload {
    /// Role and latency of the sender.
    Metadata(PeerMetadata),
    /// Application bytes for a specific peer.
    Data { data: Vec<u8> },
    /// Application bytes meant for whoever currently holds authority.
    AuthorityData { data: Vec<u8> },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Metadata(_) => "metadata",
            Payload::Data { .. } => "data",
            Payload::AuthorityData { .. } => "authorityData",
        }
    }
}

/// The four addressing modes of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Every participant, the sender included
    AllIncludingSelf,
    /// Every participant except the sender
    AllExcludingSelf,
    /// Only the target; delivered locally when the target is the sender
    Unicast(PeerId),
    /// Only the target; never delivered locally
    UnicastSilent(PeerId),
}

impl Route {
    /// Resolve which participants receive a call from `sender`.
    ///
    /// Recipients keep the order of `participants`. A unicast to a peer that
    /// is not a participant resolves to nobody.
    pub fn recipients(&self, sender: PeerId, participants: &[PeerId]) -> Vec<PeerId> {
        match *self {
            Route::AllIncludingSelf => participants.to_vec(),
            Route::AllExcludingSelf => participants
                .iter()
                .copied()
                .filter(|p| *p != sender)
                .collect(),
            Route::Unicast(target) => participants
                .iter()
                .copied()
                .filter(|p| *p == target)
                .collect(),
            Route::UnicastSilent(target) => participants
                .iter()
                .copied()
                .filter(|p| *p == target && *p != sender)
                .collect(),
        }
    }
}

/// Outbound side of the channel.
///
/// Implementations must not block: they enqueue the payload for delivery and
/// return. An `Err` means the call was refused outright (sender not in a
/// session, unknown target), not that a delivery was lost.
pub trait MetadataChannel: Send + Sync {
    /// Deliver to a route. The four named operations below forward here.
    fn send(&self, route: Route, sender: PeerId, payload: Payload) -> Result<(), TransportError>;

    fn broadcast_including_self(
        &self,
        sender: PeerId,
        payload: Payload,
    ) -> Result<(), TransportError> {
        self.send(Route::AllIncludingSelf, sender, payload)
    }

    fn broadcast_excluding_self(
        &self,
        sender: PeerId,
        payload: Payload,
    ) -> Result<(), TransportError> {
        self.send(Route::AllExcludingSelf, sender, payload)
    }

    fn unicast(
        &self,
        target: PeerId,
        sender: PeerId,
        payload: Payload,
    ) -> Result<(), TransportError> {
        self.send(Route::Unicast(target), sender, payload)
    }

    fn unicast_silent(
        &self,
        target: PeerId,
        sender: PeerId,
        payload: Payload,
    ) -> Result<(), TransportError> {
        self.send(Route::UnicastSilent(target), sender, payload)
    }
}
