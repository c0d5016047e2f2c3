//! In-process session simulation.
//!
//! Every node is a `Session` over its own `HubTransport`, driven by its own
//! task. Nodes join one after another, in the order they were created.

use anyhow::{Context, Result, ensure};
use futures::future::join_all;
use roster_core::{
    HubTransport, LocalHub, PeerEvent, PeerId, PeerRecord, Role, Session, SessionConfig,
    Subscription, drive,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What one node knows about the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub local_id: PeerId,
    pub role: Role,
    /// Roster as seen by this node, sorted by ID
    pub peers: Vec<PeerRecord>,
    /// Peers announced ready, in announcement order
    pub ready: Vec<PeerId>,
    pub disconnected: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_name: String,
    pub authority: Option<PeerId>,
    pub participants: Vec<PeerId>,
    pub session_time: f64,
    pub nodes: Vec<NodeReport>,
}

#[derive(Default)]
struct Seen {
    ready: Vec<PeerId>,
    disconnected: Vec<PeerId>,
}

struct SimNode {
    id: PeerId,
    session: Arc<Session<HubTransport>>,
    seen: Arc<Mutex<Seen>>,
    _subscription: Subscription,
}

impl SimNode {
    fn report(&self) -> NodeReport {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        NodeReport {
            local_id: self.id,
            role: self.session.local_role(),
            peers: self.session.peers().to_vec(),
            ready: seen.ready.clone(),
            disconnected: seen.disconnected.clone(),
        }
    }
}

pub struct Simulation {
    config: SessionConfig,
    hub: LocalHub,
    nodes: Vec<SimNode>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Simulation {
    /// Create `nodes` sessions on a fresh hub and connect them in order.
    pub async fn start(config: SessionConfig, nodes: usize, round_trip: Duration) -> Result<Self> {
        config.validate()?;
        ensure!(nodes > 0, "at least one node is required");
        ensure!(
            nodes <= config.max_participants,
            "{} nodes exceed maxParticipants ({})",
            nodes,
            config.max_participants
        );

        info!(
            "Starting {} node(s) in session {}",
            nodes, config.session_name
        );
        let hub = LocalHub::with_round_trip(config.max_participants, round_trip.as_secs_f64());
        let (stop, stop_rx) = watch::channel(false);

        let mut simulation = Self {
            config,
            hub,
            nodes: Vec::with_capacity(nodes),
            stop,
            tasks: Vec::with_capacity(nodes),
        };
        for _ in 0..nodes {
            simulation.add_node(stop_rx.clone()).await?;
        }
        Ok(simulation)
    }

    async fn add_node(&mut self, stop_rx: watch::Receiver<bool>) -> Result<()> {
        let (transport, events) = self.hub.transport();
        let id = transport.id();
        let session = Arc::new(Session::new(Arc::new(transport), self.config.clone()));

        let seen = Arc::new(Mutex::new(Seen::default()));
        let seen_clone = Arc::clone(&seen);
        let subscription = session.subscribe(move |event| {
            let mut seen = seen_clone.lock().unwrap_or_else(|e| e.into_inner());
            match event {
                PeerEvent::PeerReady { peer } => {
                    info!("[{}] peer ready: {} ({:?})", id, peer.id, peer.role);
                    seen.ready.push(peer.id);
                }
                PeerEvent::PeerDisconnected { peer } => {
                    info!("[{}] peer disconnected: {}", id, peer.id);
                    seen.disconnected.push(peer.id);
                }
                PeerEvent::BytesReceived { sender, data } => {
                    debug!("[{}] {} bytes from {}", id, data.len(), sender.id);
                }
            }
        });

        session
            .connect()
            .await
            .with_context(|| format!("node {} failed to connect", id))?;

        let task = tokio::spawn(drive(
            Arc::clone(&session),
            events,
            self.config.tick_interval(),
            stop_rx,
        ));

        self.nodes.push(SimNode {
            id,
            session,
            seen,
            _subscription: subscription,
        });
        self.tasks.push(task);
        Ok(())
    }

    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }

    pub fn node_ids(&self) -> Vec<PeerId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    /// Hand authority to the participant after the current one, in join
    /// order. Returns the new authority.
    pub fn migrate_authority(&self) -> Result<Option<PeerId>> {
        let participants = self.hub.participants();
        if participants.is_empty() {
            return Ok(None);
        }

        let next = match self.hub.authority() {
            Some(current) => {
                let index = participants.iter().position(|p| *p == current).unwrap_or(0);
                participants[(index + 1) % participants.len()]
            }
            None => participants[0],
        };
        self.hub.set_authority(next)?;
        info!("Migrated authority to {}", next);
        Ok(Some(next))
    }

    pub fn snapshot(&self) -> SessionReport {
        SessionReport {
            session_name: self.config.session_name.clone(),
            authority: self.hub.authority(),
            participants: self.hub.participants(),
            session_time: self
                .nodes
                .first()
                .map(|n| n.session.session_time())
                .unwrap_or_default(),
            nodes: self.nodes.iter().map(SimNode::report).collect(),
        }
    }

    /// Whether every node lists every participant, with the hub's authority
    /// as the only `Authority` record.
    pub fn is_converged(&self) -> bool {
        let mut participants = self.hub.participants();
        participants.sort();
        let authority = self.hub.authority();

        self.nodes.iter().all(|node| {
            let peers = node.session.peers();
            let ids: Vec<_> = peers.iter().map(|p| p.id).collect();
            ids == participants
                && peers
                    .iter()
                    .all(|p| p.is_authority() == (Some(p.id) == authority))
        })
    }

    /// Poll until converged or `timeout` elapses.
    pub async fn wait_converged(&self, timeout: Duration) -> bool {
        let poll = async {
            while !self.is_converged() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// Disconnect every node, stop the drivers and return the final report.
    pub async fn shutdown(self) -> Result<SessionReport> {
        let report = self.snapshot();

        for node in &self.nodes {
            if let Err(e) = node.session.disconnect().await {
                warn!("Failed to disconnect {}: {}", node.id, e);
            }
        }

        // Fails only if every driver already exited
        let _ = self.stop.send(true);
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!("Driver task failed: {}", e);
            }
        }

        info!("Simulation stopped");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            session_name: "sim-test".into(),
            max_participants: 4,
            tick_interval_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_rejects_more_nodes_than_participants() {
        let result = Simulation::start(config(), 5, Duration::ZERO).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rejects_zero_nodes() {
        let result = Simulation::start(config(), 0, Duration::ZERO).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_migrate_authority_round_robin() {
        let sim = Simulation::start(config(), 3, Duration::ZERO).await.unwrap();
        let ids = sim.node_ids();

        assert_eq!(sim.hub().authority(), Some(ids[0]));
        assert_eq!(sim.migrate_authority().unwrap(), Some(ids[1]));
        assert_eq!(sim.migrate_authority().unwrap(), Some(ids[2]));
        assert_eq!(sim.migrate_authority().unwrap(), Some(ids[0]));

        sim.shutdown().await.unwrap();
    }
}
