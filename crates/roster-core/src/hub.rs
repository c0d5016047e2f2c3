//! In-process session runner.
//!
//! `LocalHub` plays the role of the networked session service: it tracks who
//! is in the session, who holds authority, and fans channel calls out to the
//! participants' event queues. Each `HubTransport` is bound to one receiver
//! at construction, so deliveries never go through a lookup by session.

use crate::transport::Result;
use crate::{
    MetadataChannel, Payload, PeerId, Route, SessionConfig, Transport, TransportError,
    TransportEvent,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info, warn};

struct HubState {
    max_participants: usize,
    /// Event queue of every transport created by this hub
    queues: HashMap<PeerId, UnboundedSender<TransportEvent>>,
    /// Current participants, in join order
    participants: Vec<PeerId>,
    authority: Option<PeerId>,
    /// Payload deliveries buffered by `hold`
    held: Option<Vec<(PeerId, TransportEvent)>>,
}

impl HubState {
    fn deliver(&self, recipient: PeerId, event: TransportEvent) {
        let Some(queue) = self.queues.get(&recipient) else {
            return;
        };
        if queue.send(event).is_err() {
            warn!("Failed to deliver to {}: receiver dropped", recipient);
        }
    }

    fn is_participant(&self, peer: PeerId) -> bool {
        self.participants.contains(&peer)
    }
}

struct HubInner {
    state: Mutex<HubState>,
    round_trip: f64,
    created_at: Instant,
}

impl HubInner {
    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared in-memory session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    pub fn new(max_participants: usize) -> Self {
        Self::with_round_trip(max_participants, 0.0)
    }

    /// Hub reporting a fixed round-trip time, in seconds.
    pub fn with_round_trip(max_participants: usize, round_trip: f64) -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState {
                    max_participants,
                    queues: HashMap::new(),
                    participants: Vec::new(),
                    authority: None,
                    held: None,
                }),
                round_trip,
                created_at: Instant::now(),
            }),
        }
    }

    /// Create a transport with a fresh ID, plus the queue its events
    /// arrive on.
    pub fn transport(&self) -> (HubTransport, UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = unbounded_channel();
        let mut state = self.inner.state();

        let mut id = PeerId::generate();
        while state.queues.contains_key(&id) {
            id = PeerId::generate();
        }
        state.queues.insert(id, tx);

        let transport = HubTransport {
            hub: Arc::clone(&self.inner),
            id,
        };
        (transport, rx)
    }

    pub fn participants(&self) -> Vec<PeerId> {
        self.inner.state().participants.clone()
    }

    pub fn authority(&self) -> Option<PeerId> {
        self.inner.state().authority
    }

    /// Hand authority to a current participant.
    pub fn set_authority(&self, peer: PeerId) -> Result<()> {
        let mut state = self.inner.state();
        if !state.is_participant(peer) {
            return Err(TransportError::PeerNotFound(peer));
        }
        if state.authority != Some(peer) {
            info!("Authority moved to {}", peer);
            state.authority = Some(peer);
        }
        Ok(())
    }

    /// Buffer channel deliveries until `release` or `release_reversed`.
    /// Membership events are never held.
    pub fn hold(&self) {
        let mut state = self.inner.state();
        if state.held.is_none() {
            state.held = Some(Vec::new());
        }
    }

    /// Deliver held payloads in send order and stop holding.
    pub fn release(&self) -> usize {
        self.release_with(|_| {})
    }

    /// Deliver held payloads newest first and stop holding.
    pub fn release_reversed(&self) -> usize {
        self.release_with(|held| held.reverse())
    }

    fn release_with(&self, reorder: impl FnOnce(&mut Vec<(PeerId, TransportEvent)>)) -> usize {
        let mut state = self.inner.state();
        let Some(mut held) = state.held.take() else {
            return 0;
        };
        reorder(&mut held);

        let count = held.len();
        for (recipient, event) in held {
            // Participants that left meanwhile get nothing
            if state.is_participant(recipient) {
                state.deliver(recipient, event);
            }
        }
        debug!("Released {} held deliveries", count);
        count
    }
}

/// One participant's view of a `LocalHub`.
pub struct HubTransport {
    hub: Arc<HubInner>,
    id: PeerId,
}

impl HubTransport {
    pub fn id(&self) -> PeerId {
        self.id
    }
}

impl MetadataChannel for HubTransport {
    fn send(&self, route: Route, sender: PeerId, payload: Payload) -> Result<()> {
        let mut state = self.hub.state();
        if sender != self.id || !state.is_participant(sender) {
            return Err(TransportError::NotRunning);
        }
        match route {
            Route::Unicast(target) | Route::UnicastSilent(target)
                if !state.is_participant(target) =>
            {
                return Err(TransportError::PeerNotFound(target));
            }
            _ => {}
        }

        let recipients = route.recipients(sender, &state.participants);
        let event = match payload {
            Payload::Metadata(metadata) => TransportEvent::Metadata { sender, metadata },
            Payload::Data { data } => TransportEvent::Data { sender, data },
            Payload::AuthorityData { data } => TransportEvent::AuthorityData { sender, data },
        };

        let state = &mut *state;
        for recipient in recipients {
            match &mut state.held {
                Some(held) => held.push((recipient, event.clone())),
                None => state.deliver(recipient, event.clone()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HubTransport {
    async fn start(&self, config: &SessionConfig) -> Result<()> {
        let mut state = self.hub.state();
        if state.is_participant(self.id) {
            return Err(TransportError::ConnectionFailed(format!(
                "{} is already in the session",
                self.id
            )));
        }
        if state.participants.len() >= state.max_participants {
            return Err(TransportError::ConnectionFailed(format!(
                "session {} is full ({} participants)",
                config.session_name, state.max_participants
            )));
        }

        for existing in &state.participants {
            state.deliver(self.id, TransportEvent::Joined(*existing));
            state.deliver(*existing, TransportEvent::Joined(self.id));
        }
        state.deliver(self.id, TransportEvent::Joined(self.id));

        state.participants.push(self.id);
        if state.authority.is_none() {
            state.authority = Some(self.id);
        }
        info!(
            "{} joined {} ({} participants)",
            self.id,
            config.session_name,
            state.participants.len()
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = self.hub.state();
        let Some(index) = state.participants.iter().position(|p| *p == self.id) else {
            return Ok(());
        };
        state.participants.remove(index);

        if state.authority == Some(self.id) {
            state.authority = state.participants.first().copied();
            if let Some(next) = state.authority {
                info!("Authority moved to {} after {} left", next, self.id);
            }
        }
        for remaining in &state.participants {
            state.deliver(*remaining, TransportEvent::Left(self.id));
        }
        info!("{} left the session", self.id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.hub.state().is_participant(self.id)
    }

    fn local_peer(&self) -> Option<PeerId> {
        self.is_running().then_some(self.id)
    }

    fn active_participants(&self) -> Vec<PeerId> {
        self.hub.state().participants.clone()
    }

    fn is_authority(&self) -> bool {
        self.hub.state().authority == Some(self.id)
    }

    fn round_trip_time(&self, _peer: PeerId) -> f64 {
        self.hub.round_trip
    }

    fn session_time(&self) -> f64 {
        self.hub.created_at.elapsed().as_secs_f64()
    }

    fn latency_sample(&self) -> i64 {
        (self.hub.round_trip * 1_000_000.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PeerMetadata, Role};

    fn drain(rx: &mut UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn started(hub: &LocalHub) -> (HubTransport, UnboundedReceiver<TransportEvent>) {
        let (transport, rx) = hub.transport();
        transport.start(&SessionConfig::default()).await.unwrap();
        (transport, rx)
    }

    #[tokio::test]
    async fn test_join_announces_existing_then_self() {
        let hub = LocalHub::new(4);
        let (a, mut rx_a) = started(&hub).await;
        let (b, mut rx_b) = started(&hub).await;

        let expected = vec![TransportEvent::Joined(a.id()), TransportEvent::Joined(b.id())];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
        assert_eq!(hub.participants(), vec![a.id(), b.id()]);
    }

    #[tokio::test]
    async fn test_first_participant_is_authority() {
        let hub = LocalHub::new(4);
        let (a, _rx_a) = started(&hub).await;
        let (b, _rx_b) = started(&hub).await;

        assert!(a.is_authority());
        assert!(!b.is_authority());
        assert_eq!(hub.authority(), Some(a.id()));
    }

    #[tokio::test]
    async fn test_full_session_refuses_join() {
        let hub = LocalHub::new(1);
        let (_a, _rx_a) = started(&hub).await;
        let (b, _rx_b) = hub.transport();

        let result = b.start(&SessionConfig::default()).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!b.is_running());
        assert_eq!(b.local_peer(), None);
    }

    #[tokio::test]
    async fn test_double_start_is_refused() {
        let hub = LocalHub::new(4);
        let (a, _rx) = started(&hub).await;

        let result = a.start(&SessionConfig::default()).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_shutdown_migrates_authority_and_notifies() {
        let hub = LocalHub::new(4);
        let (a, _rx_a) = started(&hub).await;
        let (b, mut rx_b) = started(&hub).await;
        let (c, mut rx_c) = started(&hub).await;
        drain(&mut rx_b);
        drain(&mut rx_c);

        a.shutdown().await.unwrap();

        assert_eq!(hub.authority(), Some(b.id()));
        assert!(b.is_authority());
        assert_eq!(drain(&mut rx_b), vec![TransportEvent::Left(a.id())]);
        assert_eq!(drain(&mut rx_c), vec![TransportEvent::Left(a.id())]);
        assert_eq!(hub.participants(), vec![b.id(), c.id()]);
        assert!(!a.is_running());
    }

    #[tokio::test]
    async fn test_routes_fan_out_to_participants() {
        let hub = LocalHub::new(4);
        let (a, mut rx_a) = started(&hub).await;
        let (b, mut rx_b) = started(&hub).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let metadata = PeerMetadata::new(Role::Member, 7);
        a.broadcast_excluding_self(a.id(), Payload::Metadata(metadata))
            .unwrap();
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![TransportEvent::Metadata {
                sender: a.id(),
                metadata
            }]
        );

        a.unicast_silent(a.id(), a.id(), Payload::Metadata(metadata))
            .unwrap();
        assert!(drain(&mut rx_a).is_empty());

        a.unicast(a.id(), a.id(), Payload::Data { data: vec![1] })
            .unwrap();
        assert_eq!(
            drain(&mut rx_a),
            vec![TransportEvent::Data {
                sender: a.id(),
                data: vec![1]
            }]
        );
    }

    #[tokio::test]
    async fn test_send_requires_running_sender() {
        let hub = LocalHub::new(4);
        let (a, _rx) = hub.transport();

        let result = a.broadcast_including_self(a.id(), Payload::Data { data: vec![] });
        assert!(matches!(result, Err(TransportError::NotRunning)));
    }

    #[tokio::test]
    async fn test_unicast_to_stranger_is_peer_not_found() {
        let hub = LocalHub::new(4);
        let (a, _rx) = started(&hub).await;
        let stranger = PeerId::new(0xdead);

        let result = a.unicast(stranger, a.id(), Payload::Data { data: vec![] });
        assert!(matches!(result, Err(TransportError::PeerNotFound(p)) if p == stranger));
    }

    #[tokio::test]
    async fn test_release_reversed_inverts_delivery_order() {
        let hub = LocalHub::new(4);
        let (a, _rx_a) = started(&hub).await;
        let (b, mut rx_b) = started(&hub).await;
        drain(&mut rx_b);

        hub.hold();
        a.unicast(b.id(), a.id(), Payload::Data { data: vec![1] })
            .unwrap();
        a.unicast(b.id(), a.id(), Payload::Data { data: vec![2] })
            .unwrap();
        assert!(drain(&mut rx_b).is_empty());

        assert_eq!(hub.release_reversed(), 2);
        let data: Vec<_> = drain(&mut rx_b)
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Data { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(data, vec![vec![2], vec![1]]);
    }

    #[tokio::test]
    async fn test_held_delivery_to_departed_peer_is_dropped() {
        let hub = LocalHub::new(4);
        let (a, _rx_a) = started(&hub).await;
        let (b, mut rx_b) = started(&hub).await;
        drain(&mut rx_b);

        hub.hold();
        a.unicast(b.id(), a.id(), Payload::Data { data: vec![1] })
            .unwrap();
        b.shutdown().await.unwrap();
        hub.release();

        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_set_authority_requires_participant() {
        let hub = LocalHub::new(4);
        let (a, _rx_a) = started(&hub).await;
        let (b, _rx_b) = started(&hub).await;

        hub.set_authority(b.id()).unwrap();
        assert!(b.is_authority());
        assert!(!a.is_authority());

        let result = hub.set_authority(PeerId::new(1));
        assert!(matches!(result, Err(TransportError::PeerNotFound(_))));
    }

    #[test]
    fn test_latency_sample_is_round_trip_in_micros() {
        let hub = LocalHub::with_round_trip(2, 0.042);
        let (a, _rx) = hub.transport();
        assert_eq!(a.latency_sample(), 42_000);
        assert_eq!(a.round_trip_time(a.id()), 0.042);
    }
}
