//! NearMesh Runtime
//!
//! Runs a `MeshEngine` behind the facade the rest of an application talks to:
//! - `MeshLogicTask`: serialized loop owning all relay state
//! - `EffectExecutor`: performs transport calls requested by the logic
//! - `RuntimeBuilder` / `MeshHandle`: wiring and the facade API
//!
//! ```text
//! MeshHandle ──Command──▶ MeshLogicTask ──Effect──▶ EffectExecutor ──▶ Transport
//!     ▲                        │  ▲                        │               │
//!     └── watch / broadcast ◀──┘  └──── TransportEvent ◀────┴───────────────┘
//! ```

pub mod builder;
pub mod executor;
pub mod handle;
pub mod logic;

pub use builder::RuntimeBuilder;
pub use executor::EffectExecutor;
pub use handle::MeshHandle;
pub use logic::{MeshLogicTask, MeshViews, RuntimeStats};

// Re-export core types for convenience
pub use nearmesh_core::{
    AppEvent, Command, EventSink, LogEntry, MeshConfig, MeshError, MeshResult, MeshStatus,
    PeerSnapshot, PeerState, Transport, TransportEvent,
};
