//! Peer registry for tracking session participants.
//!
//! Reconciles two independent inputs: raw transport joins/leaves, which carry
//! no metadata, and metadata messages, which may arrive before or after the
//! matching join. A joined peer is parked in a FIFO pending queue and only
//! announced (`PeerReady`) once its record exists *and* every peer queued
//! before it has been announced.
//!
//! The record mapping, the cached peer list and the pending queue share one
//! `RwLock`, so a mutation, its cache invalidation and the drain it triggers
//! are observed together. Notifications are queued on the event bus while
//! the lock is held and delivered after it is released, so listeners may
//! read the registry.

use crate::{
    EventBus, Memoized, PeerEvent, PeerId, PeerMetadata, PeerRecord, PendingPolicy, Subscription,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

/// Whether a transport join refers to this node or to someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Local,
    Remote,
}

#[derive(Default)]
struct RegistryState {
    local: Option<PeerId>,
    peers: HashMap<PeerId, PeerRecord>,
    view: Memoized<Arc<[PeerRecord]>>,
    pending: VecDeque<PeerId>,
}

impl RegistryState {
    /// Pop pending entries from the head for as long as their records exist.
    /// Stops at the first entry still waiting for metadata.
    fn drain_ready(&mut self) -> Vec<PeerRecord> {
        let mut ready = Vec::new();
        while let Some(head) = self.pending.front() {
            match self.peers.get(head) {
                Some(record) => {
                    ready.push(*record);
                    self.pending.pop_front();
                }
                None => break,
            }
        }
        ready
    }

    fn project(peers: &HashMap<PeerId, PeerRecord>) -> Arc<[PeerRecord]> {
        let mut records: Vec<PeerRecord> = peers.values().copied().collect();
        records.sort_by_key(|r| r.id);
        records.into()
    }
}

/// Registry of participants as seen from the local node.
///
/// Thread-safe; transport callbacks and the periodic tick may call into it
/// from different threads.
pub struct PeerRegistry {
    state: RwLock<RegistryState>,
    events: Arc<EventBus>,
    policy: PendingPolicy,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(PendingPolicy::default())
    }
}

impl PeerRegistry {
    pub fn new(policy: PendingPolicy) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            events: Arc::new(EventBus::new()),
            policy,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn policy(&self) -> PendingPolicy {
        self.policy
    }

    /// Record which participant is this node. Records already stored are
    /// re-flagged against the new ID; nothing else is touched.
    pub fn bind_local(&self, local: PeerId) {
        let mut state = self.write();
        if state.local == Some(local) {
            return;
        }
        state.local = Some(local);
        for record in state.peers.values_mut() {
            record.is_local = record.id == local;
        }
        state.view.invalidate();
    }

    /// Forget the local ID and every record and pending entry.
    pub fn reset(&self) {
        let mut state = self.write();
        state.local = None;
        state.peers.clear();
        state.pending.clear();
        state.view.invalidate();
    }

    pub fn local(&self) -> Option<PeerId> {
        self.read().local
    }

    /// Record a transport-level join. The peer is queued until its metadata
    /// arrives; if the metadata came first, it is announced right away once
    /// everyone ahead of it has been.
    pub fn on_peer_joined(&self, peer: PeerId) -> JoinKind {
        let kind = {
            let mut state = self.write();
            state.view.invalidate();
            state.pending.push_back(peer);
            debug!("Peer {} joined, {} pending", peer, state.pending.len());

            for ready in state.drain_ready() {
                self.events.enqueue(PeerEvent::PeerReady { peer: ready });
            }
            if state.local == Some(peer) {
                JoinKind::Local
            } else {
                JoinKind::Remote
            }
        };

        self.events.flush();
        kind
    }

    /// Record a transport-level leave and announce the disconnect.
    ///
    /// Returns the best-known record for the peer (a placeholder if its
    /// metadata never arrived).
    pub fn on_peer_left(&self, peer: PeerId) -> PeerRecord {
        let record = {
            let mut state = self.write();
            state.view.invalidate();
            let record = state
                .peers
                .remove(&peer)
                .unwrap_or_else(|| PeerRecord::unknown(peer));
            self.events
                .enqueue(PeerEvent::PeerDisconnected { peer: record });

            match self.policy {
                PendingPolicy::Purge => {
                    let before = state.pending.len();
                    state.pending.retain(|p| *p != peer);
                    if state.pending.len() != before {
                        debug!("Purged pending entry for departed peer {}", peer);
                    }
                    for ready in state.drain_ready() {
                        self.events.enqueue(PeerEvent::PeerReady { peer: ready });
                    }
                }
                PendingPolicy::Retain => {
                    if state.pending.contains(&peer) {
                        debug!("Peer {} left before its metadata arrived; entry retained", peer);
                    }
                }
            }
            record
        };

        self.events.flush();
        record
    }

    /// Store metadata received from `sender` and announce every pending peer
    /// that is now ready, in join order.
    ///
    /// Returns how many peers were announced.
    pub fn on_metadata_received(&self, sender: PeerId, metadata: PeerMetadata) -> usize {
        let drained = {
            let mut state = self.write();
            state.view.invalidate();
            let is_local = state.local == Some(sender);
            let record = PeerRecord::from_metadata(sender, is_local, metadata);
            if let Some(previous) = state.peers.insert(sender, record) {
                trace!(
                    "Replacing record for {} ({:?} -> {:?})",
                    sender, previous.role, record.role
                );
            }

            let ready = state.drain_ready();
            if ready.is_empty() && !state.pending.is_empty() {
                debug!(
                    "Metadata from {} stored; queue blocked on {:?}",
                    sender,
                    state.pending.front()
                );
            }
            for peer in &ready {
                self.events.enqueue(PeerEvent::PeerReady { peer: *peer });
            }
            ready.len()
        };

        self.events.flush();
        drained
    }

    /// All known records, ordered by peer ID.
    ///
    /// Cheap when nothing changed since the last call: the same shared slice
    /// is returned under a read lock.
    pub fn peers(&self) -> Arc<[PeerRecord]> {
        if let Some(view) = self.read().view.peek() {
            return Arc::clone(view);
        }

        let mut guard = self.write();
        let state = &mut *guard;
        let peers = &state.peers;
        Arc::clone(state.view.get(|| RegistryState::project(peers)))
    }

    /// The stored record for `peer`, or a placeholder if none exists.
    pub fn resolve(&self, peer: PeerId) -> PeerRecord {
        self.read()
            .peers
            .get(&peer)
            .copied()
            .unwrap_or_else(|| PeerRecord::unknown(peer))
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.read().peers.contains_key(&peer)
    }

    /// Peers joined at the transport level but not yet announced, in order.
    pub fn pending(&self) -> Vec<PeerId> {
        self.read().pending.iter().copied().collect()
    }

    /// How many times the cached peer list has been rebuilt.
    pub fn view_computations(&self) -> u64 {
        self.read().view.computations()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(PeerEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }

    /// Publish an event that does not change registry state.
    pub fn publish(&self, event: PeerEvent) {
        self.events.emit(event);
    }
}
