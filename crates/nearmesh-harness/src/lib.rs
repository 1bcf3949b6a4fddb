//! NearMesh Test Harness
//!
//! An in-memory radio medium that implements [`nearmesh_core::Transport`] for
//! any number of devices in one process, with link control, fault injection
//! and canned topologies. Used by the runtime integration tests and by the
//! CLI's `simulate` command.

pub mod radio;
pub mod topology;

pub use radio::{endpoint_of, RadioStats, VirtualRadio, VirtualTransport};
pub use topology::Topology;
