//! roster-core: peer metadata synchronization for session-based transports.
//!
//! This crate provides:
//! - A per-node registry of session participants and their roles
//! - Ordered "peer ready" notifications gated on metadata arrival
//! - A session facade that exchanges metadata over a `MetadataChannel`
//! - `Transport` trait abstraction plus an in-process `LocalHub` implementation

pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod hub;
pub mod memo;
pub mod peer_id;
pub mod record;
pub mod registry;
pub mod session;
pub mod transport;

pub use channel::{MetadataChannel, Payload, Route};
pub use config::{ConfigError, PendingPolicy, SessionConfig};
pub use driver::drive;
pub use error::SessionError;
pub use events::{EventBus, PeerEvent, Subscription};
pub use hub::{HubTransport, LocalHub};
pub use memo::Memoized;
pub use peer_id::{PeerId, PeerIdError};
pub use record::{PeerMetadata, PeerRecord, Role};
pub use registry::{JoinKind, PeerRegistry};
pub use session::Session;
pub use transport::{Transport, TransportError, TransportEvent};
