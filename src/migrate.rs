//! One-way migration of the monolithic main store into time shards.
//!
//! A run analyzes first, stops there on dry-run, then streams ordered
//! batches from the source, re-routes every row through the same staged
//! bulk path writes use, and reconciles counts at the end. Per-shard
//! failures are collected into the report; only a fatal engine error on the
//! source aborts the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rusqlite::types::ValueRef;
use serde::Serialize;
use tracing::{info, warn};

use crate::Result;
use crate::engine;
use crate::manager::PartitionManager;
use crate::record::{DataRecord, parse_routing_timestamp};
use crate::repository::{PartitionedStore, RecordRepository, row_to_record};
use crate::schema::TableSchema;

/// Knobs for one migration run.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Source rows fetched (and flushed) per batch.
    pub batch_size: usize,
    /// Analyze and report without writing any shard.
    pub dry_run: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            dry_run: false,
        }
    }
}

/// Estimated shard population, computed before any row moves.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationAnalysis {
    pub total_records: u64,
    /// Estimated row count per bucket name under the configured strategy.
    pub partition_distribution: BTreeMap<String, u64>,
    /// Rows whose partition value was missing or unparseable; these land in
    /// the bucket of the migration instant.
    pub fallback_routed: u64,
}

/// How the post-migration count comparison came out. A shortfall fully
/// explained by composite-key duplicates in the source is expected, not an
/// error; anything else unexplained is recorded in the report's error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reconciliation {
    Exact {
        rows: u64,
    },
    DedupExplained {
        source_rows: u64,
        partition_rows: u64,
        duplicates: u64,
    },
    Unexplained {
        source_rows: u64,
        partition_rows: u64,
    },
    /// Dry runs move nothing, so there is nothing to reconcile.
    Skipped,
}

/// Produced by every migration run, dry or live.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub total_records: u64,
    pub migrated_records: u64,
    pub partitions_created: Vec<String>,
    /// Live runs report actual rows landed per shard; dry runs the estimate.
    pub partition_distribution: BTreeMap<String, u64>,
    pub fallback_routed: u64,
    pub errors: Vec<String>,
    pub duration_seconds: f64,
    pub throughput_records_per_second: f64,
    pub dry_run: bool,
    pub reconciliation: Reconciliation,
}

/// Moves rows from the unpartitioned main store into shards.
pub struct Migrator {
    store: PartitionedStore,
}

impl Migrator {
    pub fn new(manager: Arc<PartitionManager>) -> Self {
        Self {
            store: PartitionedStore::new(manager),
        }
    }

    /// Scans the source's partition column and buckets every row under the
    /// configured strategy without moving anything.
    pub fn analyze(&self, schema: &TableSchema) -> Result<MigrationAnalysis> {
        let manager = self.store.manager();
        let main = manager.main_store()?;
        let table = schema.table_name().to_string();
        let column = manager.config().partition_column.clone();
        let strategy = manager.config().strategy;
        manager.gate().run("analyze-distribution", move || {
            main.with_conn(|conn| {
                if !engine::table_exists(conn, &table)? {
                    info!(table = %table, "source table absent; nothing to migrate");
                    return Ok(MigrationAnalysis {
                        total_records: 0,
                        partition_distribution: BTreeMap::new(),
                        fallback_routed: 0,
                    });
                }
                let total: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                        row.get(0)
                    })?;
                let now = Utc::now();
                let mut distribution: BTreeMap<String, u64> = BTreeMap::new();
                let mut fallback_routed = 0u64;
                let mut stmt = conn.prepare(&format!("SELECT \"{column}\" FROM \"{table}\""))?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let bucket = match row.get_ref(0)? {
                        ValueRef::Text(bytes) => {
                            match parse_routing_timestamp(&String::from_utf8_lossy(bytes)) {
                                Some(ts) => ts,
                                None => {
                                    fallback_routed += 1;
                                    now
                                }
                            }
                        }
                        _ => {
                            fallback_routed += 1;
                            now
                        }
                    };
                    *distribution.entry(strategy.partition_name(bucket)).or_default() += 1;
                }
                Ok(MigrationAnalysis {
                    total_records: total as u64,
                    partition_distribution: distribution,
                    fallback_routed,
                })
            })
        })
    }

    /// Runs the migration. Dry runs stop after analysis. The returned report
    /// is produced even when reconciliation finds an unexplained shortfall;
    /// only source-side engine failures abort.
    pub fn migrate(
        &self,
        schema: &TableSchema,
        options: &MigrationOptions,
    ) -> Result<MigrationReport> {
        let started = Instant::now();
        let analysis = self.analyze(schema)?;
        info!(
            total = analysis.total_records,
            partitions = analysis.partition_distribution.len(),
            fallback = analysis.fallback_routed,
            dry_run = options.dry_run,
            "migration analysis complete"
        );

        if options.dry_run {
            return Ok(MigrationReport {
                total_records: analysis.total_records,
                migrated_records: 0,
                partitions_created: analysis.partition_distribution.keys().cloned().collect(),
                partition_distribution: analysis.partition_distribution,
                fallback_routed: analysis.fallback_routed,
                errors: Vec::new(),
                duration_seconds: started.elapsed().as_secs_f64(),
                throughput_records_per_second: 0.0,
                dry_run: true,
                reconciliation: Reconciliation::Skipped,
            });
        }

        let batch_size = options.batch_size.max(1);
        let mut migrated = 0u64;
        let mut errors = Vec::new();
        let mut distribution: BTreeMap<String, u64> = BTreeMap::new();
        let mut offset = 0usize;
        let mut batches = 0usize;
        loop {
            let records = self.fetch_batch(schema, batch_size, offset)?;
            if records.is_empty() {
                break;
            }
            let fetched = records.len();
            let outcome = self.store.create_batch(schema, records)?;
            for write in &outcome.commits {
                migrated += write.inserted as u64;
                *distribution.entry(write.partition.clone()).or_default() +=
                    write.inserted as u64;
            }
            for failure in &outcome.failures {
                errors.push(failure.to_string());
            }
            batches += 1;
            if batches % 10 == 0 {
                info!(batches, migrated, "migration progress");
            }
            offset += fetched;
            if fetched < batch_size {
                break;
            }
        }

        let reconciliation = self.verify(schema, analysis.total_records, &mut errors)?;
        if let Reconciliation::Unexplained {
            source_rows,
            partition_rows,
        } = reconciliation
        {
            warn!(source_rows, partition_rows, "unexplained reconciliation shortfall");
            errors.push(format!(
                "unexplained row count mismatch: source {source_rows}, partitions {partition_rows}"
            ));
        }

        let duration_seconds = started.elapsed().as_secs_f64();
        let throughput = if duration_seconds > 0.0 {
            migrated as f64 / duration_seconds
        } else {
            0.0
        };
        info!(
            migrated,
            errors = errors.len(),
            seconds = duration_seconds,
            "migration finished"
        );
        Ok(MigrationReport {
            total_records: analysis.total_records,
            migrated_records: migrated,
            partitions_created: distribution.keys().cloned().collect(),
            partition_distribution: distribution,
            fallback_routed: analysis.fallback_routed,
            errors,
            duration_seconds,
            throughput_records_per_second: throughput,
            dry_run: false,
            reconciliation,
        })
    }

    /// One ordered page of the source table. The `id` tiebreak keeps
    /// LIMIT/OFFSET paging stable when the partition column has duplicates.
    fn fetch_batch(
        &self,
        schema: &TableSchema,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DataRecord>> {
        let manager = self.store.manager();
        let main = manager.main_store()?;
        let column = manager.config().partition_column.clone();
        let job_schema = schema.clone();
        manager.gate().run("fetch-source-batch", move || {
            main.with_conn(|conn| {
                if !engine::table_exists(conn, job_schema.table_name())? {
                    return Ok(Vec::new());
                }
                let sql = format!(
                    "SELECT * FROM \"{}\" ORDER BY \"{column}\", \"id\" LIMIT ? OFFSET ?",
                    job_schema.table_name()
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([limit as i64, offset as i64])?;
                let mut records = Vec::new();
                while let Some(row) = rows.next()? {
                    records.push(row_to_record(&job_schema, row)?);
                }
                Ok(records)
            })
        })
    }

    /// Re-counts every shard and compares against the source. A shortfall
    /// matching the source's distinct composite-key count is dedup, reported
    /// as such; any other difference is unexplained.
    fn verify(
        &self,
        schema: &TableSchema,
        source_rows: u64,
        errors: &mut Vec<String>,
    ) -> Result<Reconciliation> {
        let manager = self.store.manager();
        let mut partition_rows = 0u64;
        for name in manager.config().list_existing()? {
            let counted: Result<u64> = manager.acquire(&name).and_then(|handle| {
                let table = schema.table_name().to_string();
                manager.gate().run("verify-count", move || {
                    handle.with_conn(|conn| {
                        if !engine::table_exists(conn, &table)? {
                            return Ok(0);
                        }
                        let count: i64 = conn.query_row(
                            &format!("SELECT COUNT(*) FROM \"{table}\""),
                            [],
                            |row| row.get(0),
                        )?;
                        Ok(count as u64)
                    })
                })
            });
            match counted {
                Ok(count) => partition_rows += count,
                Err(error) => {
                    warn!(partition = %name, error = %error, "verification count failed");
                    errors.push(format!("verification failed for '{name}': {error}"));
                }
            }
        }

        if partition_rows == source_rows {
            return Ok(Reconciliation::Exact {
                rows: partition_rows,
            });
        }
        if partition_rows < source_rows && schema.has_primary_key() {
            let distinct = self.distinct_source_keys(schema)?;
            if partition_rows == distinct {
                return Ok(Reconciliation::DedupExplained {
                    source_rows,
                    partition_rows,
                    duplicates: source_rows - partition_rows,
                });
            }
        }
        Ok(Reconciliation::Unexplained {
            source_rows,
            partition_rows,
        })
    }

    /// Distinct composite keys in the source, using the same rendering as
    /// [`TableSchema::composite_key_for`]: values joined with `|`, NULL as
    /// the empty string.
    fn distinct_source_keys(&self, schema: &TableSchema) -> Result<u64> {
        let manager = self.store.manager();
        let main = manager.main_store()?;
        let composite = schema
            .primary_key()
            .iter()
            .map(|field| format!("COALESCE(\"{field}\", '')"))
            .collect::<Vec<_>>()
            .join(" || '|' || ");
        let table = schema.table_name().to_string();
        manager.gate().run("count-distinct-keys", move || {
            main.with_conn(|conn| {
                let distinct: i64 = conn.query_row(
                    &format!("SELECT COUNT(DISTINCT {composite}) FROM \"{table}\""),
                    [],
                    |row| row.get(0),
                )?;
                Ok(distinct as u64)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionConfig;
    use crate::schema::ColumnType;
    use rusqlite::params;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn test_schema() -> TableSchema {
        TableSchema::builder("events")
            .property("ts", ColumnType::Text)
            .property("device", ColumnType::Text)
            .primary_key(["ts", "device"])
            .build()
            .unwrap()
    }

    // The source is a legacy table without the schema's UNIQUE clause, so it
    // can hold the duplicate composite keys the shard targets later dedup.
    fn store_with_main(dir: &TempDir) -> PartitionedStore {
        let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"))
            .with_partition_column("ts");
        let manager = Arc::new(PartitionManager::new(config).unwrap());
        manager.initialize().unwrap();
        let store = PartitionedStore::new(manager);
        let main = store.manager().main_store().unwrap();
        main.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE \"events\" (\"id\" TEXT PRIMARY KEY, \"created_at\" TEXT, \
                 \"version\" INTEGER, \"ts\" TEXT, \"device\" TEXT)",
            )?;
            Ok(())
        })
        .unwrap();
        store
    }

    fn seed_main(store: &PartitionedStore, rows: &[(Option<&str>, &str)]) {
        let main = store.manager().main_store().unwrap();
        main.with_conn(|conn| {
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

    #[test]
    fn analysis_buckets_by_strategy_and_counts_fallbacks() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let store = store_with_main(&dir);
        seed_main(
            &store,
            &[
                (Some("2024-01-10 00:00:00"), "a"),
                (Some("2024-01-20 00:00:00"), "b"),
                (Some("2024-02-05 00:00:00"), "c"),
                (None, "d"),
                (Some("not a timestamp"), "e"),
            ],
        );
        let migrator = Migrator::new(Arc::clone(store.manager()));
        let analysis = migrator.analyze(&schema).unwrap();
        assert_eq!(analysis.total_records, 5);
        assert_eq!(analysis.fallback_routed, 2);
        assert_eq!(
            analysis.partition_distribution.get("partition_2024_01"),
            Some(&2)
        );
        assert_eq!(
            analysis.partition_distribution.get("partition_2024_02"),
            Some(&1)
        );
        let now_bucket = store.manager().config().partition_name(Utc::now());
        assert_eq!(analysis.partition_distribution.get(&now_bucket), Some(&2));
    }

    #[test]
    fn dry_run_reports_estimate_without_writing() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let store = store_with_main(&dir);
        seed_main(
            &store,
            &[
                (Some("2024-01-10 00:00:00"), "a"),
                (Some("2024-01-20 00:00:00"), "b"),
                (Some("2024-03-01 00:00:00"), "c"),
            ],
        );
        let migrator = Migrator::new(Arc::clone(store.manager()));
        let options = MigrationOptions {
            dry_run: true,
            ..MigrationOptions::default()
        };
        let report = migrator.migrate(&schema, &options).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.total_records, 3);
        assert_eq!(report.migrated_records, 0);
        assert_eq!(report.reconciliation, Reconciliation::Skipped);
        assert_eq!(
            report.partition_distribution.get("partition_2024_01"),
            Some(&2)
        );
        assert!(store.manager().config().list_existing().unwrap().is_empty());
    }

    #[test]
    fn migrate_explains_dedup_shortfall() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let store = store_with_main(&dir);
        seed_main(
            &store,
            &[
                (Some("2024-01-10 08:00:00"), "a"),
                (Some("2024-01-10 08:00:00"), "a"),
                (Some("2024-01-11 09:00:00"), "b"),
            ],
        );
        let migrator = Migrator::new(Arc::clone(store.manager()));
        let report = migrator.migrate(&schema, &MigrationOptions::default()).unwrap();
        assert_eq!(report.total_records, 3);
        assert_eq!(report.migrated_records, 2);
        assert!(report.errors.is_empty());
        assert_eq!(
            report.reconciliation,
            Reconciliation::DedupExplained {
                source_rows: 3,
                partition_rows: 2,
                duplicates: 1,
            }
        );
        assert_eq!(report.partitions_created, vec!["partition_2024_01"]);
    }

    #[test]
    fn absent_source_table_yields_zero_work() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"))
            .with_partition_column("ts");
        let manager = Arc::new(PartitionManager::new(config).unwrap());
        manager.initialize().unwrap();
        let migrator = Migrator::new(Arc::clone(&manager));

        let analysis = migrator.analyze(&schema).unwrap();
        assert_eq!(analysis.total_records, 0);
        assert!(analysis.partition_distribution.is_empty());
        assert_eq!(analysis.fallback_routed, 0);

        let report = migrator
            .migrate(&schema, &MigrationOptions::default())
            .unwrap();
        assert_eq!(report.total_records, 0);
        assert_eq!(report.migrated_records, 0);
        assert!(report.errors.is_empty());
        assert_eq!(report.reconciliation, Reconciliation::Exact { rows: 0 });
        assert!(manager.config().list_existing().unwrap().is_empty());
    }
}
