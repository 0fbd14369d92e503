//! CLI for the rwbuf batching queue.
//!
//! Provides commands for inspecting, draining, sweeping, and benchmarking
//! queue directories.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use rwbuf::{Appendable, LogFormat, LogLevel, LogOptions, Queue, QueueConfig, RetrievedBatch, SeriesRef};
use tracing_subscriber::EnvFilter;

/// Name of the LMDB data file inside a queue directory.
const DATA_FILE: &str = "data.mdb";

/// rwbuf: durable batching queue for metrics remote-write.
#[derive(Parser)]
#[command(name = "rwbuf", version, about)]
struct Cli {
    /// Log level: debug, info, warn, or error. `RUST_LOG` overrides it.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log format: logfmt or json.
    #[arg(long, global = true, default_value = "logfmt")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display pending batch and sample counts.
    Stats {
        /// Path to the queue directory.
        queue_path: PathBuf,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: StatsFormat,
    },

    /// List committed batches awaiting delivery, oldest first.
    Peek {
        /// Path to the queue directory.
        queue_path: PathBuf,

        /// Maximum number of batches to list.
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Print the oldest pending batch.
    Drain {
        /// Path to the queue directory.
        queue_path: PathBuf,

        /// Acknowledge (delete) the batch after printing it.
        #[arg(long)]
        ack: bool,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Delete batches whose samples are all older than the TTL.
    Sweep {
        /// Path to the queue directory.
        queue_path: PathBuf,

        /// Retention window (e.g., "5m", "2h", "7d").
        #[arg(long, default_value = "2h")]
        ttl: String,
    },

    /// Run an append/commit/deliver benchmark in a scratch directory.
    Bench {
        /// Number of samples to append.
        #[arg(long, default_value = "1000000")]
        samples: u64,

        /// Number of distinct series.
        #[arg(long, default_value = "100")]
        series: u32,

        /// Samples per commit cycle.
        #[arg(long, default_value = "10000")]
        cycle: u64,
    },
}

/// Output format for batch contents.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with a sample array.
    Json,
}

/// Output format for statistics.
#[derive(Clone, ValueEnum)]
enum StatsFormat {
    /// Human-readable lines.
    Text,
    /// A single JSON object.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let options = match log_options(&cli.log_level, &cli.log_format) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };
    init_logging(options);

    let result = match cli.command {
        Commands::Stats { queue_path, format } => cmd_stats(&queue_path, &format),
        Commands::Peek { queue_path, limit } => cmd_peek(&queue_path, limit),
        Commands::Drain {
            queue_path,
            ack,
            format,
        } => cmd_drain(&queue_path, ack, &format),
        Commands::Sweep { queue_path, ttl } => cmd_sweep(&queue_path, &ttl),
        Commands::Bench {
            samples,
            series,
            cycle,
        } => cmd_bench(samples, series, cycle),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn log_options(level: &str, format: &str) -> rwbuf::Result<LogOptions> {
    Ok(LogOptions {
        level: level.parse::<LogLevel>()?,
        format: format.parse::<LogFormat>()?,
    })
}

/// Installs a stderr subscriber; `RUST_LOG` takes precedence over `--log-level`.
fn init_logging(options: LogOptions) {
    let filter = EnvFilter::builder()
        .with_default_directive(options.level.as_filter().into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match options.format {
        LogFormat::Logfmt => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Opens an existing queue directory without creating one.
fn open_existing(queue_path: &Path, ttl: Option<Duration>) -> Result<Queue, Box<dyn std::error::Error>> {
    if !queue_path.join(DATA_FILE).exists() {
        return Err(format!("No queue found at '{}'", queue_path.display()).into());
    }
    Ok(Queue::open(QueueConfig::new(queue_path).with_ttl(ttl))?)
}

/// Implements `rwbuf stats <queue_path>`.
fn cmd_stats(queue_path: &Path, format: &StatsFormat) -> Result<(), Box<dyn std::error::Error>> {
    let queue = open_existing(queue_path, None)?;
    let stats = queue.stats()?;

    match format {
        StatsFormat::Text => {
            println!("Queue: {}", queue_path.display());
            println!("  Pending batches: {}", stats.pending_batches);
            println!("  Pending samples: {}", stats.pending_samples);
            println!("  Next batch ID: {}", stats.next_batch_id);
            println!(
                "  Disk usage: {}",
                format_bytes(std::fs::metadata(queue_path.join(DATA_FILE))?.len())
            );
        }
        StatsFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
    }
    Ok(())
}

/// Implements `rwbuf peek <queue_path>`.
fn cmd_peek(queue_path: &Path, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let queue = open_existing(queue_path, None)?;
    let metas = queue.peek(limit)?;

    if metas.is_empty() {
        println!("No pending batches.");
        return Ok(());
    }

    println!("{:>10}  {:>8}  {:>15}  {:>15}  {:>15}", "batch", "samples", "committed_ms", "min_ts", "max_ts");
    for meta in &metas {
        println!(
            "{:>10}  {:>8}  {:>15}  {:>15}  {:>15}",
            meta.id, meta.samples, meta.committed_at_ms, meta.min_timestamp, meta.max_timestamp
        );
    }
    Ok(())
}

/// Implements `rwbuf drain <queue_path>`.
fn cmd_drain(queue_path: &Path, ack: bool, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let queue = open_existing(queue_path, None)?;
    let Some(batch) = queue.retrieve_next()? else {
        println!("No pending batches.");
        return Ok(());
    };

    match format {
        OutputFormat::Csv => print_csv(&batch),
        OutputFormat::Json => print_json(&batch)?,
    }

    if ack {
        queue.acknowledge(batch.id)?;
        tracing::info!(batch_id = batch.id, "batch acknowledged");
    }
    Ok(())
}

fn print_csv(batch: &RetrievedBatch) {
    println!("# batch={}, samples={}", batch.id, batch.samples.len());
    println!("series,timestamp_ms,value");
    for sample in &batch.samples {
        println!(
            "{},{},{}",
            csv_field(&sample.series.to_string()),
            sample.timestamp,
            sample.value
        );
    }
}

fn print_json(batch: &RetrievedBatch) -> Result<(), Box<dyn std::error::Error>> {
    let samples: Vec<serde_json::Value> = batch
        .samples
        .iter()
        .map(|sample| {
            let labels: serde_json::Map<String, serde_json::Value> = sample
                .series
                .iter()
                .map(|l| (l.name.clone(), serde_json::Value::from(l.value.as_str())))
                .collect();
            serde_json::json!({
                "labels": labels,
                "timestamp_ms": sample.timestamp,
                "value": sample.value,
            })
        })
        .collect();

    let output = serde_json::json!({
        "batch": batch.id,
        "meta": batch.meta,
        "count": samples.len(),
        "samples": samples,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Quotes a CSV field, doubling embedded quotes.
fn csv_field(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// Implements `rwbuf sweep <queue_path>`.
fn cmd_sweep(queue_path: &Path, ttl: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ttl = parse_duration(ttl)?;
    let queue = open_existing(queue_path, Some(ttl))?;
    let removed = queue.sweep_expired(rwbuf::unix_millis())?;
    println!("Expired batches removed: {removed}");
    Ok(())
}

/// Implements `rwbuf bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(samples: u64, series_count: u32, cycle: u64) -> Result<(), Box<dyn std::error::Error>> {
    if series_count == 0 || cycle == 0 {
        return Err("--series and --cycle must be greater than zero".into());
    }

    println!("rwbuf append/commit benchmark");
    println!("  Samples: {samples}");
    println!("  Series: {series_count}");
    println!("  Samples per cycle: {cycle}");
    println!();

    let temp_dir = std::env::temp_dir().join("rwbuf_bench");
    let _ = std::fs::remove_dir_all(&temp_dir);

    let queue = Queue::open(
        QueueConfig::new(&temp_dir)
            .with_ttl(None)
            .with_map_size(8 << 30),
    )?;

    let series: Vec<_> = (0..series_count)
        .map(|i| {
            rwbuf::Labels::from_pairs([
                ("__name__".to_string(), format!("metric_{i}")),
                ("id".to_string(), format!("{i}")),
            ])
        })
        .collect();

    println!("Appending {samples} samples across {series_count} series...");

    let base_time = 1_700_000_000_000i64;
    let start = Instant::now();

    let mut written = 0u64;
    let mut ts = base_time;
    while written < samples {
        let mut app = queue.new_appender();
        let cycle_end = (written + cycle).min(samples);
        while written < cycle_end {
            ts += 1;
            let labels = &series[usize::try_from(written % u64::from(series_count))?];
            app.append(SeriesRef(0), labels, ts, written as f64)?;
            written += 1;
        }
        app.commit()?;
    }

    let ingest = start.elapsed();

    let drain_start = Instant::now();
    let mut batches = 0u64;
    while let Some(batch) = queue.retrieve_next()? {
        queue.acknowledge(batch.id)?;
        batches += 1;
    }
    let drain = drain_start.elapsed();

    let ns_per_sample = ingest.as_nanos() as f64 / written.max(1) as f64;
    let samples_per_sec = written as f64 / ingest.as_secs_f64();

    println!();
    println!("Results:");
    println!("  Samples committed: {written}");
    println!("  Ingest elapsed: {ingest:.3?}");
    println!("  Avg latency: {ns_per_sample:.1} ns/sample");
    println!("  Throughput: {samples_per_sec:.0} samples/sec");
    println!("  Batches delivered: {batches} in {drain:.3?}");
    println!();

    drop(queue);
    let _ = std::fs::remove_dir_all(&temp_dir);

    Ok(())
}

/// Parses a human-readable duration string (e.g., "1h", "30m", "7d").
fn parse_duration(s: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse()?;

    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    };
    let secs = num
        .checked_mul(scale)
        .ok_or_else(|| format!("Duration '{s}' is too large"))?;

    if secs == 0 {
        return Err("TTL must be greater than zero".into());
    }
    Ok(Duration::from_secs(secs))
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
