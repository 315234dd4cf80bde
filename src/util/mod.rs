//! Utility functions module
//!
//! Contains helper functions for units formatting used by the run report.

pub mod units;

// Re-export commonly used functions
pub use units::{
    calculate_rate, format_count, format_elapsed, format_footprint, format_latency, format_rate,
};
