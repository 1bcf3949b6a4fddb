//! Mesh Logic Module
//!
//! - `state`: observable views the logic task publishes
//! - `task`: the serialized loop that owns the `MeshEngine`
//!
//! Every command, transport event and maintenance tick is processed by one
//! task in arrival order. Registry updates, duplicate detection and log appends
//! therefore never interleave, and a fan-out always reads the registry between
//! two whole events.

pub mod state;
pub mod task;

pub use state::{Changes, MeshPublisher, MeshViews, RuntimeStats};
pub use task::MeshLogicTask;
