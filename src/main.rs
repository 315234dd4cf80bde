//! IXPERF - index performance harness
//!
//! Usage:
//!   ixperf -v --profile profiles/llrb.toml       # run one profile
//!   ixperf batch --dir profiles                  # run every profile in a directory
//!   ixperf history --limit 5 --index rdms/llrb   # list saved results
//!   ixperf plot --profile llrb.toml --percentile 98

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ixperf::bench::{self, ProcessLauncher};
use ixperf::config::{HistoryFilter, Profile, ResultHistory};
use ixperf::error::user_friendly_message;
use ixperf::models::RunResult;
use ixperf::plot::{self, PlotOptions};
use ixperf::util::{format_count, format_elapsed, format_footprint, format_latency, format_rate};
use ixperf::{IxperfError, Result, DEFAULT_PROFILES_DIR};

#[derive(Parser)]
#[command(
    name = "ixperf",
    about = "Profile driven performance harness for storage indexes",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log periodic stats while the run progresses.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the TOML profile to run.
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Generator seed, the larger of this and the profile seed is used.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Append the result to the result history, comparing it with the
    /// previous run of the same profile.
    #[arg(long)]
    save: bool,

    /// Result history file, defaults to the user data directory.
    #[arg(long)]
    results: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run every profile in a directory, stopping at the first failure.
    Batch {
        /// Directory holding the profiles.
        #[arg(short, long, default_value = DEFAULT_PROFILES_DIR)]
        dir: PathBuf,
        /// Benchmark binary to launch, defaults to this executable.
        #[arg(long)]
        bin: Option<PathBuf>,
    },
    /// List or clear saved results.
    History {
        /// Number of results to list, newest first.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Remove every saved result.
        #[arg(long)]
        clear: bool,
        #[command(flatten)]
        select: Select,
    },
    /// Chart saved results as SVG files.
    Plot {
        /// Number of runs in the trend charts.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Latency percentile to chart.
        #[arg(long, default_value_t = 99)]
        percentile: u8,
        /// Directory for the charts.
        #[arg(short, long, default_value = "plot")]
        out: PathBuf,
        #[command(flatten)]
        select: Select,
    },
}

/// Which saved results a subcommand looks at.
#[derive(clap::Args)]
struct Select {
    /// Result history file, defaults to the user data directory.
    #[arg(long)]
    results: Option<PathBuf>,
    /// Only runs of this profile file.
    #[arg(long)]
    profile: Option<PathBuf>,
    /// Only runs of this index, e.g. rdms/llrb.
    #[arg(long)]
    index: Option<String>,
    /// Skip history lines that do not parse instead of failing.
    #[arg(long)]
    ignore_error: bool,
}

impl Select {
    fn filter(&self) -> HistoryFilter {
        HistoryFilter {
            profile: self.profile.clone(),
            index: self.index.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let res = match cli.command {
        Some(Command::Batch { dir, bin }) => run_batch(dir, bin).await,
        Some(Command::History {
            limit,
            clear,
            select,
        }) => run_history(limit, clear, select),
        Some(Command::Plot {
            limit,
            percentile,
            out,
            select,
        }) => run_plot(limit, percentile, out, select),
        None => match cli.profile {
            Some(profile) => {
                run_profile(profile, cli.verbose, cli.seed, cli.save, cli.results).await
            }
            None => Err(IxperfError::ProfileError(
                "no profile given, use --profile FILE or a subcommand".to_string(),
            )),
        },
    };

    if let Err(err) = res {
        error!(error = %err, "ixperf failed");
        eprintln!("{}", user_friendly_message(&err));
        std::process::exit(err.exit_code());
    }
}

fn history(results: Option<PathBuf>) -> Result<ResultHistory> {
    match results {
        Some(path) => Ok(ResultHistory::at(path)),
        None => ResultHistory::open_default(),
    }
}

async fn run_profile(
    path: PathBuf,
    verbose: bool,
    seed: u64,
    save: bool,
    results: Option<PathBuf>,
) -> Result<()> {
    let mut profile = Profile::from_file(&path)?;
    profile.verbose = verbose;
    let seed = profile.resolve_seed(seed);
    info!(target: "ixperf", "{}: seed {}", path.display(), seed);

    let result = bench::run(&profile).await?;
    print_report(&result);

    if save {
        let history = history(results)?;
        if let Some(baseline) = history.baseline(&result)? {
            println!("\n  against {}", baseline.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
            for delta in result.compare(&baseline) {
                println!("    {}", delta);
            }
        }
        history.append(&result)?;
        info!(target: "ixperf", "result saved to {}", history.path().display());
    }
    Ok(())
}

async fn run_batch(dir: PathBuf, bin: Option<PathBuf>) -> Result<()> {
    let mut launcher = match bin {
        Some(bin) => ProcessLauncher::new(bin),
        None => ProcessLauncher::current_exe()?,
    };
    info!(target: "driver", "launching {}", launcher.bin().display());
    let done = tokio::task::spawn_blocking(move || bench::run_batch(&dir, &mut launcher))
        .await
        .map_err(|e| IxperfError::BenchmarkError(format!("batch task failed: {}", e)))??;
    println!("{} profiles completed", done.len());
    Ok(())
}

fn run_history(limit: usize, clear: bool, select: Select) -> Result<()> {
    let history = history(select.results.clone())?;
    if clear {
        println!("cleared {} results", history.clear()?);
        return Ok(());
    }

    let recent = history.query(&select.filter(), limit, select.ignore_error)?;
    if recent.is_empty() {
        println!("no matching results in {}", history.path().display());
    }
    for result in recent.iter() {
        println!("{}", result.summary());
    }
    Ok(())
}

fn run_plot(limit: usize, percentile: u8, out: PathBuf, select: Select) -> Result<()> {
    plot::check_percentile(percentile)?;
    let history = history(select.results.clone())?;
    let mut runs = history.query(&select.filter(), limit, select.ignore_error)?;
    runs.reverse();
    let opts = PlotOptions {
        out_dir: out,
        percentile,
    };
    for file in plot::render(&runs, &opts)? {
        println!("{}", file.display());
    }
    Ok(())
}

fn print_report(result: &RunResult) {
    println!(
        "\n{} <{},{}> seed {} in {}",
        result.profile.index,
        result.profile.key_type,
        result.profile.value_type,
        result.seed,
        format_elapsed(result.elapsed())
    );

    for phase in result.phases.iter() {
        println!(
            "  {} ({} threads): {} ops in {}, {}",
            phase.name,
            phase.threads,
            format_count(phase.total_ops() as u64),
            format_elapsed(phase.elapsed),
            format_rate(phase.ops_per_sec())
        );
        for op in phase.ops.iter() {
            println!(
                "    {:<8} {:>8} ops {:>8} items {:>14}  avg {} p95 {} p99 {} max {}",
                op.name,
                format_count(op.ops as u64),
                format_count(op.items as u64),
                format_rate(op.ops_per_sec),
                format_latency(op.latency.avg),
                format_latency(op.latency.p95()),
                format_latency(op.latency.p99()),
                format_latency(op.latency.max),
            );
        }
    }

    if let Some(stats) = &result.index {
        println!(
            "  index {}: entries {} live {} tombstones {} shards {}",
            stats.name, stats.entries, stats.live, stats.tombstones, stats.shards
        );
        println!(
            "    footprint keys {} values {}, latches read {} write {} conflicts {}",
            format_footprint(stats.key_footprint as u64),
            format_footprint(stats.value_footprint as u64),
            stats.read_locks,
            stats
                .write_locks
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
            stats.conflicts
        );
    }

    let sys = &result.system_info;
    println!(
        "  {} cpus {} memory {} max rss {}",
        sys.os,
        sys.cpus,
        format_footprint(sys.memory_total),
        format_footprint(sys.max_rss)
    );
}
