//! Event infrastructure for roster-core.
//!
//! Provides `PeerEvent` for application notifications and `EventBus` for
//! subscriptions. Listeners are invoked in subscription order, and events
//! reach every listener in the order they were queued, regardless of which
//! thread queued them.

use crate::PeerRecord;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Notifications raised by a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PeerEvent {
    /// Peer joined and its metadata has arrived.
    PeerReady { peer: PeerRecord },
    /// Peer left the session. Carries the best-known record.
    PeerDisconnected { peer: PeerRecord },
    /// Application bytes received from a peer.
    BytesReceived { sender: PeerRecord, data: Vec<u8> },
}

impl PeerEvent {
    /// The peer this event is about.
    pub fn peer(&self) -> &PeerRecord {
        match self {
            PeerEvent::PeerReady { peer } | PeerEvent::PeerDisconnected { peer } => peer,
            PeerEvent::BytesReceived { sender, .. } => sender,
        }
    }
}

type Callback = Arc<dyn Fn(PeerEvent) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing peer events to subscribers.
///
/// Thread-safe; wrap in `Arc` to enable subscriptions.
///
/// Publishing is split into `enqueue` and `flush` so a caller can fix the
/// position of an event in the global order while holding its own lock, and
/// run the listeners only after releasing it. At most one thread runs
/// listeners at a time; a thread that finds delivery already in progress
/// leaves its events to the delivering thread.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
    outbox: Mutex<VecDeque<PeerEvent>>,
    delivering: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            outbox: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
        }
    }
}

/// Clears the delivering flag even if a listener panics.
struct DeliveryGuard<'a>(&'a AtomicBool);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(PeerEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Listeners never run under this lock, so waiting here cannot deadlock
        // even when a listener drops its own subscription.
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Queue an event without running listeners.
    pub fn enqueue(&self, event: PeerEvent) {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(event);
    }

    /// Deliver queued events, unless another thread is already doing so.
    pub fn flush(&self) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            {
                let _guard = DeliveryGuard(&self.delivering);
                while let Some(event) = self.pop() {
                    self.deliver(event);
                }
            }

            // Something may have been queued between the last pop and the
            // flag being cleared; its publisher saw us delivering and left.
            if self.is_idle() {
                return;
            }
        }
    }

    /// Queue an event and deliver it.
    pub fn emit(&self, event: PeerEvent) {
        self.enqueue(event);
        self.flush();
    }

    fn pop(&self) -> Option<PeerEvent> {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn is_idle(&self) -> bool {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    fn deliver(&self, event: PeerEvent) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
