use std::fs;
use std::sync::Arc;

use rusqlite::params;
use tempfile::TempDir;
use timeshard::{
    ColumnType, MigrationOptions, Migrator, PartitionConfig, PartitionManager, PartitionedStore,
    QueryRequest, Reconciliation, RecordRepository, TableSchema,
};
use uuid::Uuid;

fn events_schema() -> TableSchema {
    TableSchema::builder("events")
        .required_property("ts", ColumnType::Text)
        .property("device", ColumnType::Text)
        .primary_key(["ts", "device"])
        .build()
        .unwrap()
}

/// Like [`events_schema`] but `ts` is nullable: rows with no routing value
/// can only exist — in the source and in the fallback-routed target — when
/// the column admits NULL.
fn nullable_ts_schema() -> TableSchema {
    TableSchema::builder("events")
        .property("ts", ColumnType::Text)
        .property("device", ColumnType::Text)
        .primary_key(["ts", "device"])
        .build()
        .unwrap()
}

/// A manager whose main store already carries the events table.
fn manager_with_main(dir: &TempDir, schema: &TableSchema) -> Arc<PartitionManager> {
    let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"))
        .with_partition_column("ts");
    let manager = Arc::new(PartitionManager::new(config).unwrap());
    manager.initialize().unwrap();
    let ddl = schema.create_table_sql();
    manager
        .main_store()
        .unwrap()
        .with_conn(|conn| {
            conn.execute_batch(&ddl)?;
            Ok(())
        })
        .unwrap();
    manager
}

fn seed_main(manager: &PartitionManager, rows: &[(Option<&str>, &str)]) {
    manager
        .main_store()
        .unwrap()
        .with_conn(|conn| {
            for (ts, device) in rows {
                conn.execute(
                    "INSERT INTO \"events\" VALUES (?, ?, 1, ?, ?)",
                    params![
                        Uuid::new_v4().to_string(),
                        "2024-01-01 00:00:00.000000",
                        ts,
                        device,
                    ],
                )?;
            }
            Ok(())
        })
        .unwrap();
}

fn main_row_count(manager: &PartitionManager) -> u64 {
    manager
        .main_store()
        .unwrap()
        .with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM \"events\"", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .unwrap()
}

#[test]
fn migration_conserves_rows_across_batches() {
    let dir = TempDir::new().unwrap();
    let schema = events_schema();
    let manager = manager_with_main(&dir, &schema);
    seed_main(
        &manager,
        &[
            (Some("2024-01-05 08:00:00"), "a"),
            (Some("2024-01-06 08:00:00"), "b"),
            (Some("2024-01-07 08:00:00"), "c"),
            (Some("2024-02-10 08:00:00"), "a"),
            (Some("2024-02-11 08:00:00"), "b"),
            (Some("2024-03-12 08:00:00"), "a"),
            (Some("2024-03-13 08:00:00"), "b"),
        ],
    );

    let migrator = Migrator::new(Arc::clone(&manager));
    // A batch size below the row count forces the paging loop through
    // several fetches.
    let options = MigrationOptions {
        batch_size: 3,
        dry_run: false,
    };
    let report = migrator.migrate(&schema, &options).unwrap();

    assert_eq!(report.total_records, 7);
    assert_eq!(report.migrated_records, 7);
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert_eq!(report.reconciliation, Reconciliation::Exact { rows: 7 });
    assert_eq!(
        report.partitions_created,
        ["partition_2024_01", "partition_2024_02", "partition_2024_03"]
    );
    let landed: u64 = report.partition_distribution.values().sum();
    assert_eq!(landed, 7);

    // The shards answer for every row, and the source is left untouched.
    let store = PartitionedStore::new(Arc::clone(&manager));
    let count = store.count_all(&schema, &QueryRequest::new()).unwrap();
    assert_eq!(count.total, 7);
    assert_eq!(main_row_count(&manager), 7);
}

#[test]
fn dry_run_estimates_without_creating_shards() {
    let dir = TempDir::new().unwrap();
    let schema = events_schema();
    let manager = manager_with_main(&dir, &schema);
    seed_main(
        &manager,
        &[
            (Some("2024-01-05 08:00:00"), "a"),
            (Some("2024-02-10 08:00:00"), "b"),
        ],
    );

    let migrator = Migrator::new(Arc::clone(&manager));
    let options = MigrationOptions {
        batch_size: 100,
        dry_run: true,
    };
    let report = migrator.migrate(&schema, &options).unwrap();

    assert!(report.dry_run);
    assert_eq!(report.total_records, 2);
    assert_eq!(report.migrated_records, 0);
    assert_eq!(report.reconciliation, Reconciliation::Skipped);
    assert_eq!(report.partition_distribution.get("partition_2024_01"), Some(&1));
    assert_eq!(report.partition_distribution.get("partition_2024_02"), Some(&1));
    assert_eq!(
        manager.config().list_existing().unwrap(),
        Vec::<String>::new(),
        "a dry run must not write shard files"
    );
}

#[test]
fn unparseable_stamps_fall_back_to_the_migration_instant() {
    let dir = TempDir::new().unwrap();
    let schema = nullable_ts_schema();
    let manager = manager_with_main(&dir, &schema);
    seed_main(&manager, &[(None, "a"), (Some("not a timestamp"), "b")]);

    let migrator = Migrator::new(Arc::clone(&manager));
    let report = migrator
        .migrate(&schema, &MigrationOptions::default())
        .unwrap();

    assert_eq!(report.fallback_routed, 2);
    assert_eq!(report.migrated_records, 2);
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    // Both rows land together in the bucket of the run itself.
    assert_eq!(report.partitions_created.len(), 1);
    let bucket = &report.partitions_created[0];
    assert!(
        manager.config().partition_range(bucket).is_ok(),
        "{bucket} should be a well-formed shard name"
    );
    assert_eq!(report.partition_distribution.get(bucket), Some(&2));
}

#[test]
fn shard_failures_are_recorded_in_the_report_not_raised() {
    let dir = TempDir::new().unwrap();
    let schema = events_schema();
    let manager = manager_with_main(&dir, &schema);
    seed_main(
        &manager,
        &[
            (Some("2024-01-05 08:00:00"), "a"),
            (Some("2024-01-06 08:00:00"), "b"),
            (Some("2024-02-10 08:00:00"), "a"),
        ],
    );
    // The January shard file exists but is unreadable as a database.
    fs::write(dir.path().join("partition_2024_01.db"), b"not a database").unwrap();

    let migrator = Migrator::new(Arc::clone(&manager));
    let report = migrator
        .migrate(&schema, &MigrationOptions::default())
        .unwrap();

    assert_eq!(report.total_records, 3);
    assert_eq!(report.migrated_records, 1, "only the February row lands");
    assert_eq!(report.partitions_created, ["partition_2024_02"]);
    assert!(
        !report.errors.is_empty(),
        "the January failure must be reported"
    );
    assert_eq!(
        report.reconciliation,
        Reconciliation::Unexplained {
            source_rows: 3,
            partition_rows: 1,
        }
    );
}
