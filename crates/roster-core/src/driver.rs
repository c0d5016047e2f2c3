//! Event loop binding a transport's event queue and the role watcher to a
//! session.

use crate::{Session, Transport, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Run a session until `shutdown` flips to `true` or the event queue closes.
///
/// May be started before or after `connect`.
pub async fn drive<T: Transport>(
    session: Arc<Session<T>>,
    mut events: UnboundedReceiver<TransportEvent>,
    tick_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Event queue closed");
                    break;
                };
                if let Err(e) = session.handle_event(event) {
                    error!("Failed to handle transport event: {}", e);
                }
            }
            _ = ticker.tick() => {
                session.tick();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Driver shutting down");
                    break;
                }
            }
        }
    }
}
