//! roster-daemon library: Exposes the simulation harness for testing.
//!
//! The binary runs a whole session in one process over a `LocalHub`; the
//! same harness is used by the integration tests.

pub mod simulation;

pub use simulation::{NodeReport, SessionReport, Simulation};
