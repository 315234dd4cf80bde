//! SVG charts of saved runs
//!
//! The newest selected run gets a throughput and a latency chart per phase,
//! drawn from its per second timeline. When more than one run is selected,
//! trend charts show each operation kind across those runs.

use std::fs;
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use tracing::{debug, info};

use crate::models::stats::PERCENTILES;
use crate::models::{OpSummary, PhaseResult, RunResult};
use crate::{IxperfError, Result};

const SIZE: (u32, u32) = (1024, 768);

/// Y axis of a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Throughput,
    /// Latency at this percentile
    Latency(u8),
}

impl Metric {
    fn slug(&self) -> &'static str {
        match self {
            Metric::Throughput => "throughput",
            Metric::Latency(_) => "latency",
        }
    }

    fn describe(&self) -> String {
        match self {
            Metric::Throughput => "Throughput kilo-ops / sec".to_string(),
            Metric::Latency(p) => format!("Latency in ns, {}th percentile", p),
        }
    }

    pub fn value(&self, op: &OpSummary) -> f64 {
        match self {
            Metric::Throughput => op.ops_per_sec / 1000.0,
            Metric::Latency(p) => op.latency.at(*p).as_nanos() as f64,
        }
    }
}

/// One line on a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub op: String,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub out_dir: PathBuf,
    pub percentile: u8,
}

fn plot_err(err: impl std::fmt::Display) -> IxperfError {
    IxperfError::PlotError(err.to_string())
}

/// Only recorded percentiles can be plotted.
pub fn check_percentile(p: u8) -> Result<u8> {
    if PERCENTILES.contains(&p) {
        Ok(p)
    } else {
        Err(IxperfError::PlotError(format!(
            "percentile {} is not recorded, pick one of {:?}",
            p, PERCENTILES
        )))
    }
}

fn color(op: &str) -> RGBColor {
    match op {
        "load" => BLUE,
        "set" => GREEN,
        "delete" => RED,
        "get" => BLACK,
        "range" => MAGENTA,
        "reverse" => CYAN,
        _ => RGBColor(255, 140, 0),
    }
}

/// One series per operation kind over the seconds of `phase`.
pub fn phase_series(phase: &PhaseResult, metric: Metric) -> Vec<Series> {
    phase
        .ops
        .iter()
        .map(|op| {
            let points = phase
                .timeline
                .iter()
                .filter_map(|t| {
                    let o = t.ops.iter().find(|o| o.name == op.name)?;
                    Some((t.sec as f64, metric.value(o)))
                })
                .collect();
            Series {
                op: op.name.clone(),
                points,
            }
        })
        .filter(|s: &Series| !s.points.is_empty())
        .collect()
}

/// One series per operation kind of phase `name`, one point per run.
/// `runs` are oldest first.
pub fn trend_series(runs: &[RunResult], name: &str, metric: Metric) -> Vec<Series> {
    let mut series: Vec<Series> = Vec::new();
    for (x, run) in runs.iter().enumerate() {
        let phase = match run.phases.iter().find(|p| p.name == name) {
            Some(phase) => phase,
            None => continue,
        };
        for op in phase.ops.iter() {
            let point = (x as f64, metric.value(op));
            match series.iter_mut().find(|s| s.op == op.name) {
                Some(s) => s.points.push(point),
                None => series.push(Series {
                    op: op.name.clone(),
                    points: vec![point],
                }),
            }
        }
    }
    series
}

fn draw(path: &Path, title: &str, x_desc: &str, metric: Metric, series: &[Series]) -> Result<()> {
    let points = series.iter().flat_map(|s| s.points.iter());
    let (x_max, y_max) = points.fold((1.0_f64, 0.0_f64), |(x, y), p| (x.max(p.0), y.max(p.1)));
    let y_max = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28).into_font())
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d(0.0..x_max, 0.0..y_max)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc(metric.describe())
        .draw()
        .map_err(plot_err)?;

    for s in series {
        let c = color(&s.op);
        chart
            .draw_series(LineSeries::new(s.points.iter().copied(), &c))
            .map_err(plot_err)?
            .label(s.op.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], c));
    }
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    debug!(target: "ixperf", "plotted {}", path.display());
    Ok(())
}

/// Render charts for `runs`, oldest first, into `opts.out_dir`. Returns the
/// files written.
pub fn render(runs: &[RunResult], opts: &PlotOptions) -> Result<Vec<PathBuf>> {
    let percentile = check_percentile(opts.percentile)?;
    let latest = runs
        .last()
        .ok_or_else(|| IxperfError::PlotError("no saved runs to plot".to_string()))?;
    fs::create_dir_all(&opts.out_dir)?;

    let metrics = [Metric::Throughput, Metric::Latency(percentile)];
    let mut files = Vec::new();
    for phase in latest.phases.iter() {
        for metric in metrics {
            let series = phase_series(phase, metric);
            if series.is_empty() {
                continue;
            }
            let path = opts
                .out_dir
                .join(format!("{}-{}.svg", phase.name, metric.slug()));
            let title = format!("{} {} {}", latest.profile.index, phase.name, metric.slug());
            draw(&path, &title, "Seconds", metric, &series)?;
            files.push(path);
        }
    }

    if runs.len() > 1 {
        for phase in latest.phases.iter() {
            for metric in metrics {
                let series = trend_series(runs, &phase.name, metric);
                if series.is_empty() {
                    continue;
                }
                let path = opts
                    .out_dir
                    .join(format!("trend-{}-{}.svg", phase.name, metric.slug()));
                let title = format!("{} {} across {} runs", phase.name, metric.slug(), runs.len());
                draw(&path, &title, "Run", metric, &series)?;
                files.push(path);
            }
        }
    }

    info!(
        target: "ixperf",
        "{} charts written to {}", files.len(), opts.out_dir.display()
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, ProfileSummary};
    use crate::models::{LatencyStats, PeriodicStats};
    use std::time::Duration;
    use tempfile::TempDir;

    fn op(name: &str, ops_per_sec: f64, p99_nanos: u64) -> OpSummary {
        OpSummary {
            name: name.to_string(),
            ops: 10,
            items: 0,
            ops_per_sec,
            latency: LatencyStats {
                max: Duration::from_nanos(p99_nanos * 2),
                percentiles: [(99, Duration::from_nanos(p99_nanos))].into_iter().collect(),
                ..LatencyStats::default()
            },
        }
    }

    fn run(seed: u64, rate: f64) -> RunResult {
        let summary = ProfileSummary {
            path: PathBuf::from("profiles/llrb.toml"),
            index: "rdms/llrb".to_string(),
            key_type: DataType::I64,
            value_type: DataType::I64,
            loads: 20,
            sets: 10,
            deletes: 0,
            gets: 10,
            ranges: 0,
            reverses: 0,
            initial: 1,
            readers: 1,
            writers: 1,
        };
        let mut result = RunResult::new(summary, seed);
        result.phases.push(PhaseResult {
            name: "incremental".to_string(),
            threads: 2,
            elapsed: Duration::from_secs(2),
            ops: vec![op("set", rate, 400), op("get", rate * 2.0, 200)],
            timeline: vec![
                PeriodicStats {
                    sec: 0,
                    ops: vec![op("set", rate, 300), op("get", rate, 100)],
                },
                PeriodicStats {
                    sec: 1,
                    ops: vec![op("get", rate * 3.0, 300)],
                },
            ],
        });
        result
    }

    #[test]
    fn test_check_percentile() {
        assert_eq!(check_percentile(99).unwrap(), 99);
        assert_eq!(check_percentile(80).unwrap(), 80);
        assert!(matches!(check_percentile(50), Err(IxperfError::PlotError(_))));
    }

    #[test]
    fn test_phase_series_follows_timeline() {
        let result = run(1, 1000.0);
        let phase = &result.phases[0];

        let throughput = phase_series(phase, Metric::Throughput);
        assert_eq!(throughput.len(), 2);
        assert_eq!(throughput[0].op, "set");
        assert_eq!(throughput[0].points, vec![(0.0, 1.0)]);
        assert_eq!(throughput[1].points, vec![(0.0, 1.0), (1.0, 3.0)]);

        let latency = phase_series(phase, Metric::Latency(99));
        assert_eq!(latency[1].points, vec![(0.0, 100.0), (1.0, 300.0)]);
        // unrecorded percentiles fall back to the maximum
        let p90 = phase_series(phase, Metric::Latency(90));
        assert_eq!(p90[0].points, vec![(0.0, 600.0)]);
    }

    #[test]
    fn test_trend_series_one_point_per_run() {
        let runs = vec![run(1, 1000.0), run(2, 2000.0), run(3, 500.0)];
        let trend = trend_series(&runs, "incremental", Metric::Throughput);
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].points, vec![(0.0, 1.0), (1.0, 2.0), (2.0, 0.5)]);
        assert!(trend_series(&runs, "initial-load", Metric::Throughput).is_empty());
    }

    #[test]
    fn test_render_writes_svg_files() {
        let dir = TempDir::new().unwrap();
        let opts = PlotOptions {
            out_dir: dir.path().join("plot"),
            percentile: 99,
        };
        let runs = vec![run(1, 1000.0), run(2, 1500.0)];
        let files = render(&runs, &opts).unwrap();

        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "incremental-throughput.svg",
                "incremental-latency.svg",
                "trend-incremental-throughput.svg",
                "trend-incremental-latency.svg",
            ]
        );
        for f in files.iter() {
            let svg = fs::read_to_string(f).unwrap();
            assert!(svg.contains("<svg"));
        }
        let latency = fs::read_to_string(&files[1]).unwrap();
        assert!(latency.contains("99th percentile"));
    }

    #[test]
    fn test_render_needs_runs_and_a_recorded_percentile() {
        let dir = TempDir::new().unwrap();
        let mut opts = PlotOptions {
            out_dir: dir.path().to_path_buf(),
            percentile: 99,
        };
        assert!(matches!(render(&[], &opts), Err(IxperfError::PlotError(_))));

        opts.percentile = 42;
        assert!(matches!(
            render(&[run(1, 1.0)], &opts),
            Err(IxperfError::PlotError(_))
        ));
    }
}
