//! End-to-end tests for roster-daemon.
//!
//! Runs whole simulations with live driver tasks and checks what every node
//! converges to.

use std::io::Write;
use std::time::Duration;

use roster_core::{Role, SessionConfig};
use roster_daemon::Simulation;

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

fn config(name: &str) -> SessionConfig {
    SessionConfig {
        session_name: name.into(),
        max_participants: 8,
        tick_interval_ms: 5,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_nodes_converge_on_full_roster() {
    let sim = Simulation::start(config("converge"), 4, Duration::from_millis(20))
        .await
        .expect("Failed to start");

    assert!(sim.wait_converged(CONVERGE_TIMEOUT).await, "Nodes should converge");

    let report = sim.snapshot();
    assert_eq!(report.nodes.len(), 4);
    for node in &report.nodes {
        assert_eq!(node.peers.len(), 4);
        assert_eq!(node.ready, report.participants, "Ready order should follow joins");

        let local: Vec<_> = node.peers.iter().filter(|p| p.is_local).collect();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, node.local_id);
        assert!(node.peers.iter().all(|p| p.latency_sample == 20_000));
    }

    sim.shutdown().await.expect("Failed to shut down");
}

#[tokio::test]
async fn test_authority_migration_converges() {
    let sim = Simulation::start(config("migrate"), 3, Duration::ZERO)
        .await
        .expect("Failed to start");
    assert!(sim.wait_converged(CONVERGE_TIMEOUT).await);

    let ids = sim.node_ids();
    let next = sim.migrate_authority().unwrap();
    assert_eq!(next, Some(ids[1]));
    assert!(
        sim.wait_converged(CONVERGE_TIMEOUT).await,
        "Role change should reach every node"
    );

    let report = sim.snapshot();
    for node in &report.nodes {
        let authorities: Vec<_> = node
            .peers
            .iter()
            .filter(|p| p.role == Role::Authority)
            .map(|p| p.id)
            .collect();
        assert_eq!(authorities, vec![ids[1]]);
    }
    assert_eq!(report.nodes[1].role, Role::Authority);

    sim.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_report_serializes_as_camel_case_json() {
    let sim = Simulation::start(config("report"), 2, Duration::ZERO)
        .await
        .expect("Failed to start");
    assert!(sim.wait_converged(CONVERGE_TIMEOUT).await);

    let report = sim.shutdown().await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["sessionName"], "report");
    assert_eq!(json["nodes"].as_array().map(Vec::len), Some(2));
    let first = &json["nodes"][0];
    assert!(first["localId"].as_str().is_some_and(|id| id.len() == 16));
    assert_eq!(first["role"], "authority");
    assert_eq!(first["peers"][0]["latencySample"], 0);
}

#[tokio::test]
async fn test_starts_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "sessionName: from-file").unwrap();
    writeln!(file, "maxParticipants: 2").unwrap();
    writeln!(file, "tickIntervalMs: 5").unwrap();

    let config = SessionConfig::from_file(file.path()).unwrap();
    let too_many = Simulation::start(config.clone(), 3, Duration::ZERO).await;
    assert!(too_many.is_err(), "Should refuse more nodes than participants");

    let sim = Simulation::start(config, 2, Duration::ZERO).await.unwrap();
    assert!(sim.wait_converged(CONVERGE_TIMEOUT).await);
    assert_eq!(sim.snapshot().session_name, "from-file");
    sim.shutdown().await.unwrap();
}
