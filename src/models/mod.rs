//! Data models module
//!
//! Contains run result structures and the per-operation statistics
//! workers collect while running.

pub mod result;
pub mod stats;

// Re-export commonly used types
pub use result::{
    LatencyStats, OpDelta, OpSummary, PeriodicStats, PhaseResult, RunResult, SystemInfo,
};
pub use stats::{Latency, Op, Ops};
