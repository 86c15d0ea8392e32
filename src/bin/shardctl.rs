//! Operational CLI for timeshard stores.
//!
//! Usage:
//!   shardctl --base-dir ./data --schema events.json analyze
//!   shardctl --base-dir ./data --schema events.json migrate --dry-run
//!   shardctl --base-dir ./data health-report --output health.json

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use timeshard::{
    ColumnType, DataRecord, MigrationOptions, Migrator, PartitionConfig, PartitionManager,
    PartitionOps, PartitionStrategy, PartitionedStore, QueryRequest, RecordRepository,
    SchemaDescriptor, TableSchema,
};

#[derive(Parser, Debug)]
#[command(name = "shardctl")]
#[command(about = "Operational tooling for time-partitioned record stores")]
#[command(version)]
struct Args {
    /// Directory holding the shard files
    #[arg(long, default_value = "./data")]
    base_dir: PathBuf,

    /// Path to the unpartitioned main database (default: <base-dir>/main.db)
    #[arg(long)]
    main_db: Option<PathBuf>,

    /// Partition strategy: yearly, monthly, weekly or daily
    #[arg(long, default_value = "monthly")]
    strategy: PartitionStrategy,

    /// Column whose timestamp routes each record
    #[arg(long, default_value = "created_at")]
    partition_column: String,

    /// JSON schema descriptor file (required by analyze and migrate)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Bound on simultaneously open shard connections
    #[arg(long, default_value_t = 24)]
    max_open: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate the per-shard distribution of the main store without moving rows
    Analyze,
    /// Move main-store rows into shards, with verification
    Migrate {
        /// Analyze and report only; write nothing
        #[arg(long)]
        dry_run: bool,
        /// Source rows per batch
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
    },
    /// Advisory shard health report
    HealthReport {
        /// Write the report as JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Connection-pool and on-disk shard statistics
    Stats,
    /// Delete shards older than the retention window
    Cleanup {
        /// Override the configured retention window
        #[arg(long)]
        retention_days: Option<u32>,
        /// List candidates without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Export the shard listing as JSON
    ExportMetadata {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write, query and discard a probe data set in a throwaway directory
    SmokeTest,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(error) = run(args) {
        eprintln!("shardctl: {error}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if matches!(args.command, Command::SmokeTest) {
        return smoke_test(&args);
    }

    let main_db = args
        .main_db
        .clone()
        .unwrap_or_else(|| args.base_dir.join("main.db"));
    let config = PartitionConfig::new(&args.base_dir, &main_db)
        .with_strategy(args.strategy)
        .with_partition_column(&args.partition_column)
        .with_max_open_partitions(args.max_open);
    let manager = Arc::new(PartitionManager::new(config)?);
    manager.initialize()?;
    let result = dispatch(&args, &manager);
    manager.close_all();
    result
}

fn dispatch(
    args: &Args,
    manager: &Arc<PartitionManager>,
) -> Result<(), Box<dyn std::error::Error>> {
    match &args.command {
        Command::Analyze => {
            let schema = load_schema(args.schema.as_deref())?;
            let analysis = Migrator::new(Arc::clone(manager)).analyze(&schema)?;
            emit(&analysis, None)
        }
        Command::Migrate {
            dry_run,
            batch_size,
        } => {
            let schema = load_schema(args.schema.as_deref())?;
            let options = MigrationOptions {
                batch_size: *batch_size,
                dry_run: *dry_run,
            };
            let report = Migrator::new(Arc::clone(manager)).migrate(&schema, &options)?;
            let errors = report.errors.len();
            emit(&report, None)?;
            if errors > 0 {
                return Err(format!("migration completed with {errors} error(s)").into());
            }
            Ok(())
        }
        Command::HealthReport { output } => {
            let report = PartitionOps::new(Arc::clone(manager)).health_report()?;
            emit(&report, output.as_deref())
        }
        Command::Stats => emit(&manager.statistics()?, None),
        Command::Cleanup {
            retention_days,
            dry_run,
        } => {
            let report = PartitionOps::new(Arc::clone(manager))
                .cleanup_old_partitions(*retention_days, *dry_run)?;
            emit(&report, None)
        }
        Command::ExportMetadata { output } => {
            let ops = PartitionOps::new(Arc::clone(manager));
            match output {
                Some(path) => {
                    ops.write_metadata(path)?;
                    Ok(())
                }
                None => emit(&ops.export_metadata()?, None),
            }
        }
        Command::SmokeTest => unreachable!("handled before manager setup"),
    }
}

fn load_schema(path: Option<&Path>) -> Result<TableSchema, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Err("--schema <descriptor.json> is required for this command".into());
    };
    let raw = fs::read_to_string(path)?;
    let descriptor: SchemaDescriptor = serde_json::from_str(&raw)?;
    Ok(TableSchema::from_descriptor(descriptor)?)
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let rendered = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, &rendered)?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// End-to-end probe in a throwaway directory: route a small batch across two
/// buckets, read it back, and report. The directory is removed afterwards.
fn smoke_test(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let column = match args.partition_column.as_str() {
        "id" | "created_at" | "version" => {
            info!("partition column is a reserved name; probing with 'ts'");
            "ts"
        }
        other => other,
    };
    let probe_dir = std::env::temp_dir().join(format!("timeshard_smoke_{}", std::process::id()));
    let result = run_probe(&probe_dir, args.strategy, column);
    let _ = fs::remove_dir_all(&probe_dir);
    result
}

fn run_probe(
    dir: &Path,
    strategy: PartitionStrategy,
    column: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = PartitionConfig::new(dir, dir.join("main.db"))
        .with_strategy(strategy)
        .with_partition_column(column)
        .with_max_open_partitions(4);
    let manager = Arc::new(PartitionManager::new(config)?);
    manager.initialize()?;
    let store = PartitionedStore::new(Arc::clone(&manager));
    let schema = TableSchema::builder("smoke_probe")
        .required_property(column, ColumnType::Text)
        .property("payload", ColumnType::Text)
        .primary_key([column, "payload"])
        .build()?;

    let now = Utc::now();
    let previous = strategy.bucket_start(now) - chrono::Duration::seconds(1);
    let records = vec![
        probe_record(column, &stamp(now), "alpha"),
        probe_record(column, &stamp(previous), "beta"),
        probe_record(column, &stamp(previous), "gamma"),
    ];
    let outcome = store.create_batch(&schema, records)?;
    if !outcome.is_complete() || outcome.inserted() != 3 {
        return Err(format!(
            "probe batch incomplete: {} of 3 inserted, {} shard failure(s)",
            outcome.inserted(),
            outcome.failures.len()
        )
        .into());
    }
    let count = store.count_all(&schema, &QueryRequest::new())?;
    if count.total != 3 || !count.failures.is_empty() {
        return Err(format!("probe count mismatch: counted {} of 3 rows", count.total).into());
    }
    let shards = manager.config().list_existing()?;
    manager.close_all();
    println!(
        "smoke test passed: 3 rows across {} shard(s) under strategy {strategy}",
        shards.len()
    );
    Ok(())
}

fn stamp(ts: chrono::DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn probe_record(column: &str, ts: &str, payload: &str) -> DataRecord {
    let mut data = serde_json::Map::new();
    data.insert(column.to_string(), Value::String(ts.to_string()));
    data.insert("payload".to_string(), Value::String(payload.to_string()));
    DataRecord::new(data)
}
