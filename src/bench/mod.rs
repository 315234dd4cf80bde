//! Benchmark engine module
//!
//! Contains the workload generators, worker management, the per-profile
//! runner and the batch driver.

pub mod driver;
pub mod generator;
pub mod runner;
pub mod worker;

// Re-export commonly used types
pub use driver::{list_profiles, run_batch, Launcher, ProcessLauncher};
pub use generator::{Cmd, GenOptions};
pub use runner::run;
pub use worker::{WorkerManager, WorkerRole, WorkerStatus};
