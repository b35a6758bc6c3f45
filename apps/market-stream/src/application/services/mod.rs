//! Application Services
//!
//! Services that coordinate the data source port and the publish port.
//!
//! - `StreamingOrchestrator`: lifecycle and the three polling loops
//! - `LoopHealth`: per-loop failure tracking and degraded signal

mod loop_health;
mod orchestrator;

pub use loop_health::{LoopHealth, LoopHealthSnapshot, LoopName};
pub use orchestrator::{
    OrchestratorError, OrchestratorState, PollingSettings, SharedOrchestrator,
    StreamingOrchestrator,
};
