//! Peer records and the metadata exchanged to build them.

use crate::PeerId;
use serde::{Deserialize, Serialize};

/// Role a participant holds in the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Metadata for this peer has not arrived yet
    #[default]
    Unknown,
    /// Holds decision-making precedence for shared state (assigned by the transport)
    Authority,
    /// Any other participant
    Member,
}

/// Metadata a node advertises about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMetadata {
    pub role: Role,
    /// Opaque timing value supplied by the transport
    pub latency_sample: i64,
}

impl PeerMetadata {
    pub fn new(role: Role, latency_sample: i64) -> Self {
        Self {
            role,
            latency_sample,
        }
    }
}

/// What the local node knows about one participant.
///
/// Replaced wholesale whenever new metadata arrives; never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub id: PeerId,
    pub is_local: bool,
    pub role: Role,
    pub latency_sample: i64,
}

impl PeerRecord {
    /// Build a record from received metadata.
    pub fn from_metadata(id: PeerId, is_local: bool, metadata: PeerMetadata) -> Self {
        Self {
            id,
            is_local,
            role: metadata.role,
            latency_sample: metadata.latency_sample,
        }
    }

    /// Placeholder for a peer whose metadata has never been observed.
    pub fn unknown(id: PeerId) -> Self {
        Self {
            id,
            is_local: false,
            role: Role::Unknown,
            latency_sample: -1,
        }
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_record_defaults() {
        let record = PeerRecord::unknown(PeerId::new(9));
        assert_eq!(record.id, PeerId::new(9));
        assert!(!record.is_local);
        assert_eq!(record.role, Role::Unknown);
        assert_eq!(record.latency_sample, -1);
    }

    #[test]
    fn test_from_metadata_copies_fields() {
        let record = PeerRecord::from_metadata(
            PeerId::new(3),
            true,
            PeerMetadata::new(Role::Authority, 1200),
        );
        assert!(record.is_local);
        assert!(record.is_authority());
        assert_eq!(record.latency_sample, 1200);
    }

    #[test]
    fn test_record_serialization() {
        let record = PeerRecord::from_metadata(
            PeerId::new(1),
            false,
            PeerMetadata::new(Role::Member, 5),
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"isLocal\":false"));
        assert!(json.contains("\"role\":\"member\""));
        assert!(json.contains("\"latencySample\":5"));
    }
}
