//! Units formatting utilities
//!
//! Human-readable formatting for the run report: footprints, phase
//! times, operation counts, rates and latencies.

use std::time::Duration;

const KIB: f64 = 1024.0;

/// Binary steps for index footprints, largest first.
const FOOTPRINT_STEPS: [(f64, &str); 4] = [
    (KIB * KIB * KIB * KIB, "TiB"),
    (KIB * KIB * KIB, "GiB"),
    (KIB * KIB, "MiB"),
    (KIB, "KiB"),
];

/// Decimal steps for operation counts and rates, largest first.
const COUNT_STEPS: [(f64, &str); 3] = [(1e9, "G"), (1e6, "M"), (1e3, "K")];

/// First step `value` reaches, with `value` expressed in that step.
fn scale(value: f64, steps: &[(f64, &'static str)]) -> Option<(f64, &'static str)> {
    steps
        .iter()
        .find(|(unit, _)| value >= *unit)
        .map(|(unit, suffix)| (value / unit, *suffix))
}

/// Format key or value footprint, and memory sizes, in binary units.
///
/// # Examples
/// ```
/// use ixperf::util::units::format_footprint;
///
/// assert_eq!(format_footprint(16), "16 B");
/// assert_eq!(format_footprint(3 * 1024 * 1024), "3.0 MiB");
/// ```
pub fn format_footprint(bytes: u64) -> String {
    match scale(bytes as f64, &FOOTPRINT_STEPS) {
        Some((v, unit)) => format!("{:.1} {}", v, unit),
        None => format!("{} B", bytes),
    }
}

/// Format phase wall time. Sub-minute phases keep millisecond precision,
/// longer ones are rounded to whole seconds.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use ixperf::util::units::format_elapsed;
///
/// assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.500s");
/// assert_eq!(format_elapsed(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(60) {
        return format!("{:.3}s", elapsed.as_secs_f64());
    }
    humantime::format_duration(Duration::from_secs(elapsed.as_secs())).to_string()
}

/// Operations per second over `duration`, zero for an empty interval
pub fn calculate_rate(ops: u64, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 0.0;
    }
    ops as f64 / duration.as_secs_f64()
}

/// Format an operation count with K/M suffixes
///
/// # Examples
/// ```
/// use ixperf::util::units::format_count;
///
/// assert_eq!(format_count(999), "999");
/// assert_eq!(format_count(1500), "1.5K");
/// assert_eq!(format_count(2_500_000), "2.5M");
/// ```
pub fn format_count(count: u64) -> String {
    match scale(count as f64, &COUNT_STEPS) {
        Some((v, suffix)) => format!("{:.1}{}", v, suffix),
        None => count.to_string(),
    }
}

/// Format an operation rate
///
/// # Examples
/// ```
/// use ixperf::util::units::format_rate;
///
/// assert_eq!(format_rate(1500.0), "1.5K ops/s");
/// assert_eq!(format_rate(12.0), "12 ops/s");
/// ```
pub fn format_rate(ops_per_sec: f64) -> String {
    match scale(ops_per_sec, &COUNT_STEPS) {
        Some((v, suffix)) => format!("{:.1}{} ops/s", v, suffix),
        None => format!("{:.0} ops/s", ops_per_sec),
    }
}

/// Format latency with a precision fitting in-memory index operations
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use ixperf::util::units::format_latency;
///
/// assert_eq!(format_latency(Duration::from_nanos(800)), "800ns");
/// assert_eq!(format_latency(Duration::from_micros(500)), "500.0μs");
/// assert_eq!(format_latency(Duration::from_millis(5)), "5.00ms");
/// ```
pub fn format_latency(duration: Duration) -> String {
    let nanos = duration.as_nanos();

    if nanos >= 1_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else if nanos >= 1_000 {
        format!("{:.1}μs", nanos as f64 / 1_000.0)
    } else {
        format!("{}ns", nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_footprint() {
        assert_eq!(format_footprint(0), "0 B");
        assert_eq!(format_footprint(1023), "1023 B");
        assert_eq!(format_footprint(1536), "1.5 KiB");
        assert_eq!(format_footprint(5 << 30), "5.0 GiB");
        assert_eq!(format_footprint(2 << 40), "2.0 TiB");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), "0.000s");
        assert_eq!(format_elapsed(Duration::from_micros(2600)), "0.003s");
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "59.999s");
        assert_eq!(format_elapsed(Duration::from_millis(3_661_700)), "1h 1m 1s");
    }

    #[test]
    fn test_calculate_rate() {
        let rate = calculate_rate(500, Duration::from_millis(500));
        assert!((rate - 1000.0).abs() < 0.01);
        assert_eq!(calculate_rate(1000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_format_count_and_rate() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(1_000), "1.0K");
        assert_eq!(format_count(3_200_000_000), "3.2G");
        assert_eq!(format_rate(500.4), "500 ops/s");
        assert_eq!(format_rate(2_500_000.0), "2.5M ops/s");
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(format_latency(Duration::from_nanos(100)), "100ns");
        assert_eq!(format_latency(Duration::from_nanos(1500)), "1.5μs");
        assert_eq!(format_latency(Duration::from_micros(1500)), "1.50ms");
    }
}
