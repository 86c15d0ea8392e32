//! timeshard - a time-partitioned record store over embedded SQLite
//!
//! timeshard routes schema-driven records into per-interval shard files,
//! keeps a bounded pool of live engine connections, and fans queries out
//! over the pruned shard set with per-shard failure accounting.

pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod manager;
pub mod migrate;
pub mod ops;
pub mod query;
pub mod record;
pub mod repository;
pub mod schema;
pub mod sql;

pub use config::{PartitionConfig, PartitionStrategy};
pub use error::{Result, ShardFailure, TimeshardError};
pub use manager::{ManagerStats, PartitionManager};
pub use migrate::{MigrationOptions, MigrationReport, Migrator, Reconciliation};
pub use ops::{BackupReport, CleanupReport, HealthReport, MetadataExport, PartitionOps};
pub use query::{
    Filter, FilterOp, Page, Pagination, QueryRequest, Sort, SortDirection, TotalCount,
};
pub use record::{DataRecord, RoutedTimestamp};
pub use repository::{BatchOutcome, PartitionedStore, RecordRepository, RecordStream, ShardWrite};
pub use schema::{ColumnType, SchemaDescriptor, TableSchema};
