//! End-to-end walkthrough of the timeshard partitioned store.
//!
//! Run with: cargo run --example partitioned_usage

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::params;
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use timeshard::{
    ColumnType, DataRecord, Filter, FilterOp, MigrationOptions, Migrator, Pagination,
    PartitionConfig, PartitionManager, PartitionOps, PartitionStrategy, PartitionedStore,
    QueryRequest, RecordRepository, TableSchema,
};
use uuid::Uuid;

fn sensor_schema() -> timeshard::Result<TableSchema> {
    TableSchema::builder("readings")
        .required_property("recorded_at", ColumnType::Text)
        .property("device", ColumnType::Text)
        .property("reading", ColumnType::Real)
        .primary_key(["recorded_at", "device"])
        .build()
}

fn open_store(dir: &TempDir) -> timeshard::Result<PartitionedStore> {
    let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"))
        .with_partition_column("recorded_at");
    let manager = Arc::new(PartitionManager::new(config)?);
    manager.initialize()?;
    Ok(PartitionedStore::new(manager))
}

fn payload(recorded_at: &str, device: &str, value: f64) -> Map<String, Value> {
    match json!({ "recorded_at": recorded_at, "device": device, "reading": value }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn reading(recorded_at: &str, device: &str, value: f64) -> DataRecord {
    DataRecord::new(payload(recorded_at, device, value))
}

/// Example: How each strategy names the shard for one timestamp
fn example_partition_naming() -> timeshard::Result<()> {
    println!("\n=== Example: Partition Naming ===");

    let ts = Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap();
    for strategy in [
        PartitionStrategy::Yearly,
        PartitionStrategy::Monthly,
        PartitionStrategy::Weekly,
        PartitionStrategy::Daily,
    ] {
        let label = strategy.to_string();
        println!("  {label:<8} -> {}", strategy.partition_name(ts));
    }
    Ok(())
}

/// Example: Create one record and read it back by id
fn example_create_and_lookup() -> timeshard::Result<()> {
    println!("\n=== Example: Create and Lookup ===");

    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let schema = sensor_schema()?;

    let created = store.create(&schema, payload("2024-03-15 09:30:00", "alpha", 21.5))?;
    println!("  Created record {}", created.id);

    match store.get_by_id(&schema, created.id)? {
        Some(found) => println!("  Found device {:?}", found.value("device")),
        None => println!("  Lookup missed"),
    }
    println!(
        "  Shards on disk: {:?}",
        store.manager().config().list_existing()?
    );
    Ok(())
}

/// Example: One batch fanning out to two monthly shards, then a dedup retry
fn example_batch_across_months() -> timeshard::Result<()> {
    println!("\n=== Example: Batch Insert Across Months ===");

    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let schema = sensor_schema()?;

    let records = vec![
        reading("2024-01-15 08:00:00", "alpha", 1.5),
        reading("2024-02-20 08:00:00", "alpha", 2.5),
        reading("2024-02-21 09:30:00", "beta", 3.0),
    ];
    let outcome = store.create_batch(&schema, records)?;
    for write in &outcome.commits {
        println!(
            "  {}: staged {}, inserted {}, deduplicated {}",
            write.partition, write.staged, write.inserted, write.deduplicated
        );
    }

    // Re-sending the same natural keys is absorbed by the shards.
    let retry = vec![
        reading("2024-01-15 08:00:00", "alpha", 1.5),
        reading("2024-02-20 08:00:00", "alpha", 2.5),
        reading("2024-02-21 09:30:00", "beta", 3.0),
    ];
    let second = store.create_batch(&schema, retry)?;
    println!(
        "  Retry inserted {} and deduplicated {}",
        second.inserted(),
        second.deduplicated()
    );
    Ok(())
}

/// Example: A timestamp range filter opens only the overlapping shards
fn example_pruned_query() -> timeshard::Result<()> {
    println!("\n=== Example: Pruned Range Query ===");

    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let schema = sensor_schema()?;

    store.create_batch(
        &schema,
        vec![
            reading("2024-01-05 00:00:00", "alpha", 1.0),
            reading("2024-02-10 00:00:00", "alpha", 2.0),
            reading("2024-02-11 00:00:00", "beta", 3.0),
            reading("2024-03-25 00:00:00", "beta", 4.0),
        ],
    )?;

    let request = QueryRequest::new()
        .with_filter(Filter::new(
            "recorded_at",
            FilterOp::Gte,
            "2024-02-01 00:00:00",
        ))
        .with_filter(Filter::new(
            "recorded_at",
            FilterOp::Lt,
            "2024-03-01 00:00:00",
        ))
        .with_pagination(Pagination::new(1, 10));
    let page = store.get_all(&schema, &request)?;
    println!(
        "  {} row(s) in February; page has_next = {}",
        page.total, page.has_next
    );
    for item in &page.items {
        println!(
            "    {:?} from {:?}",
            item.value("recorded_at"),
            item.value("device")
        );
    }
    Ok(())
}

/// Example: Stream rows lazily instead of collecting a page
fn example_streaming() -> timeshard::Result<()> {
    println!("\n=== Example: Streaming ===");

    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let schema = sensor_schema()?;

    store.create_batch(
        &schema,
        vec![
            reading("2024-01-05 00:00:00", "alpha", 1.0),
            reading("2024-01-06 00:00:00", "beta", 2.0),
            reading("2024-02-07 00:00:00", "alpha", 3.0),
            reading("2024-02-08 00:00:00", "beta", 4.0),
            reading("2024-03-09 00:00:00", "alpha", 5.0),
        ],
    )?;

    // The pagination size acts as a global cap on the stream.
    let request = QueryRequest::new().with_pagination(Pagination::new(1, 4));
    let mut streamed = 0;
    for item in store.stream_query_results(&schema, &request)? {
        let record = item?;
        streamed += 1;
        println!("  streamed {:?}", record.value("recorded_at"));
    }
    println!("  {streamed} row(s) streamed");
    Ok(())
}

/// Example: Move legacy rows out of the main store into shards
fn example_migration() -> timeshard::Result<()> {
    println!("\n=== Example: Migration from the Main Store ===");

    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let schema = sensor_schema()?;

    // Seed the unpartitioned main store the way a legacy writer would.
    let main = store.manager().main_store()?;
    let ddl = schema.create_table_sql();
    main.with_conn(|conn| {
        conn.execute_batch(&ddl)?;
        for (ts, device) in [
            ("2024-01-10 08:00:00", "alpha"),
            ("2024-01-12 08:00:00", "beta"),
            ("2024-02-03 08:00:00", "alpha"),
            ("not a timestamp", "gamma"),
        ] {
            conn.execute(
                "INSERT INTO \"readings\" VALUES (?, ?, 1, ?, ?, NULL)",
                params![
                    Uuid::new_v4().to_string(),
                    "2024-01-01 00:00:00.000000",
                    ts,
                    device,
                ],
            )?;
        }
        Ok(())
    })?;

    let migrator = Migrator::new(Arc::clone(store.manager()));
    let analysis = migrator.analyze(&schema)?;
    println!(
        "  {} source row(s), {} fallback-routed",
        analysis.total_records, analysis.fallback_routed
    );

    let options = MigrationOptions {
        batch_size: 2,
        dry_run: false,
    };
    let report = migrator.migrate(&schema, &options)?;
    println!(
        "  Migrated {} row(s) into {:?}",
        report.migrated_records, report.partitions_created
    );
    println!(
        "  Reconciliation: {}",
        serde_json::to_string(&report.reconciliation)?
    );
    Ok(())
}

/// Example: Health, statistics and retention tooling
fn example_operations() -> timeshard::Result<()> {
    println!("\n=== Example: Operational Reports ===");

    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let schema = sensor_schema()?;

    store.create_batch(
        &schema,
        vec![
            reading("2024-01-05 00:00:00", "alpha", 1.0),
            reading("2024-02-10 00:00:00", "beta", 2.0),
            reading("2024-03-15 00:00:00", "alpha", 3.0),
        ],
    )?;

    let ops = PartitionOps::new(Arc::clone(store.manager()));
    let health = ops.health_report()?;
    println!(
        "  Health {:?} (score {:.2}) across {} shard(s)",
        health.health_band, health.health_score, health.shard_count
    );
    for hint in &health.recommendations {
        println!("  hint: {hint}");
    }

    let stats = store.manager().statistics()?;
    println!(
        "  {} partition(s), {} open connection(s), {:.1} MB on disk",
        stats.partition_count, stats.open_connections, stats.total_size_mb
    );

    let cleanup = ops.cleanup_old_partitions(Some(30), true)?;
    println!(
        "  Cleanup dry-run would remove {} of {} shard(s)",
        cleanup.deleted.len(),
        cleanup.examined
    );
    Ok(())
}

fn main() -> timeshard::Result<()> {
    println!("timeshard Partitioned Store Examples");
    println!("====================================");

    example_partition_naming()?;
    example_create_and_lookup()?;
    example_batch_across_months()?;
    example_pruned_query()?;
    example_streaming()?;
    example_migration()?;
    example_operations()?;

    println!("\n✅ All examples completed successfully!");
    Ok(())
}
