//! Session facade.
//!
//! Ties a `Transport` to a `PeerRegistry`: runs the metadata exchange on
//! every join, dispatches inbound payloads, and watches the local role so
//! authority changes propagate without a dedicated transport event.

use crate::registry::JoinKind;
use crate::{
    Payload, PeerEvent, PeerId, PeerMetadata, PeerRecord, PeerRegistry, Role, SessionConfig,
    SessionError, Subscription, Transport, TransportEvent,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub struct Session<T: Transport> {
    transport: Arc<T>,
    registry: PeerRegistry,
    config: SessionConfig,
    /// Role we last advertised; `Unknown` until our own join is observed
    last_role: Mutex<Role>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: Arc<T>, config: SessionConfig) -> Self {
        let registry = PeerRegistry::new(config.pending_policy);
        Self {
            transport,
            registry,
            config,
            last_role: Mutex::new(Role::Unknown),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Join the session. Failures are returned as-is; nothing is retried.
    ///
    /// Transport events may be handled while `start` is still in flight, so
    /// state from a previous session is cleared before starting, never after.
    pub async fn connect(&self) -> Result<PeerId, SessionError> {
        info!("Connecting to session {}", self.config.session_name);
        self.registry.reset();
        *self.last_role() = Role::Unknown;
        self.transport.start(&self.config).await?;

        let local = self.local_id()?;
        self.bind_local(local);
        info!("Connected to {} as {}", self.config.session_name, local);
        Ok(local)
    }

    /// Leave the session. Completes immediately when not connected.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        if !self.transport.is_running() {
            return Ok(());
        }
        self.transport.shutdown().await?;
        *self.last_role() = Role::Unknown;
        info!("Disconnected from {}", self.config.session_name);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_running() && self.transport.local_peer().is_some()
    }

    fn local_id(&self) -> Result<PeerId, SessionError> {
        match self.transport.local_peer() {
            Some(local) if self.transport.is_running() => Ok(local),
            _ => Err(SessionError::NotConnected),
        }
    }

    fn bind_local(&self, local: PeerId) {
        if self.registry.local() != Some(local) {
            self.registry.bind_local(local);
        }
    }

    fn last_role(&self) -> std::sync::MutexGuard<'_, Role> {
        self.last_role.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Role this node would advertise right now.
    pub fn local_role(&self) -> Role {
        if self.transport.is_authority() {
            Role::Authority
        } else {
            Role::Member
        }
    }

    fn local_metadata(&self) -> PeerMetadata {
        PeerMetadata::new(self.local_role(), self.transport.latency_sample())
    }

    /// Send bytes to one peer. Does nothing if the peer is no longer in the
    /// session.
    pub fn send_to(&self, target: PeerId, data: Vec<u8>) -> Result<(), SessionError> {
        let local = self.local_id()?;
        if !self.transport.active_participants().contains(&target) {
            debug!("Dropping {} bytes for {}: not in session", data.len(), target);
            return Ok(());
        }
        self.transport
            .unicast(target, local, Payload::Data { data })?;
        Ok(())
    }

    /// Send bytes to whichever peer holds authority.
    pub fn broadcast_to_authority(&self, data: Vec<u8>) -> Result<(), SessionError> {
        let local = self.local_id()?;
        self.transport
            .broadcast_excluding_self(local, Payload::AuthorityData { data })?;
        Ok(())
    }

    /// Periodic role watcher. Re-advertises our metadata when our role has
    /// changed since it was last sent.
    ///
    /// Returns whether a re-broadcast was issued.
    pub fn tick(&self) -> bool {
        let Ok(local) = self.local_id() else {
            return false;
        };

        let current = self.local_role();
        {
            let mut last = self.last_role();
            // Baseline is captured when our own join arrives
            if *last == Role::Unknown || *last == current {
                return false;
            }
            info!("Local role changed {:?} -> {:?}", *last, current);
            *last = current;
        }

        let metadata = PeerMetadata::new(current, self.transport.latency_sample());
        if let Err(e) = self
            .transport
            .broadcast_including_self(local, Payload::Metadata(metadata))
        {
            warn!("Failed to broadcast role change: {}", e);
        }
        true
    }

    /// Handle one inbound event from the transport.
    pub fn handle_event(&self, event: TransportEvent) -> Result<(), SessionError> {
        let local = self.local_id()?;
        // `connect` may not have returned yet
        self.bind_local(local);

        match event {
            TransportEvent::Joined(peer) => self.on_peer_joined(local, peer),
            TransportEvent::Left(peer) => {
                let record = self.registry.on_peer_left(peer);
                debug!("Peer {} left ({:?})", peer, record.role);
            }
            TransportEvent::Metadata { sender, metadata } => {
                let drained = self.registry.on_metadata_received(sender, metadata);
                debug!(
                    "Metadata from {} ({:?}), {} peer(s) ready",
                    sender, metadata.role, drained
                );
            }
            TransportEvent::Data { sender, data } => {
                self.registry.publish(PeerEvent::BytesReceived {
                    sender: self.registry.resolve(sender),
                    data,
                });
            }
            TransportEvent::AuthorityData { sender, data } => {
                if self.local_role() == Role::Authority {
                    self.registry.publish(PeerEvent::BytesReceived {
                        sender: self.registry.resolve(sender),
                        data,
                    });
                } else {
                    debug!(
                        "Ignoring {} authority bytes from {}: not authority",
                        data.len(),
                        sender
                    );
                }
            }
        }
        Ok(())
    }

    fn on_peer_joined(&self, local: PeerId, peer: PeerId) {
        let kind = self.registry.on_peer_joined(peer);

        let result = match kind {
            JoinKind::Local => {
                let metadata = {
                    let mut last = self.last_role();
                    let metadata = self.local_metadata();
                    *last = metadata.role;
                    metadata
                };
                // Our own record is created by receiving this, like anyone else's
                self.transport
                    .broadcast_including_self(local, Payload::Metadata(metadata))
            }
            JoinKind::Remote => self.transport.unicast_silent(
                peer,
                local,
                Payload::Metadata(self.local_metadata()),
            ),
        };

        if let Err(e) = result {
            warn!("Failed to send metadata after join of {}: {}", peer, e);
        }
    }

    /// Our own record, once our metadata has come back to us.
    pub fn local_peer(&self) -> Option<PeerRecord> {
        self.transport
            .local_peer()
            .map(|local| self.registry.resolve(local))
    }

    pub fn peers(&self) -> Arc<[PeerRecord]> {
        self.registry.peers()
    }

    pub fn resolve(&self, peer: PeerId) -> PeerRecord {
        self.registry.resolve(peer)
    }

    /// Round-trip time to the session, in seconds.
    pub fn ping(&self) -> f64 {
        match self.transport.local_peer() {
            Some(local) => self.transport.round_trip_time(local),
            None => 0.0,
        }
    }

    pub fn session_time(&self) -> f64 {
        self.transport.session_time()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(PeerEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.registry.subscribe(callback)
    }
}
