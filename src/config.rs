//! Partition policy: strategy, naming scheme and its inverse, bucket
//! iteration, paths, and shard discovery.

use crate::engine::EngineTuning;
use crate::{Result, TimeshardError};
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc, Weekday};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Shard files share this name prefix; discovery and inverse parsing key on it.
pub const PARTITION_PREFIX: &str = "partition_";

/// File extension for shard databases.
pub const SHARD_EXTENSION: &str = "db";

/// How routing timestamps are bucketed into partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    Yearly,
    Monthly,
    Weekly,
    Daily,
}

impl std::fmt::Display for PartitionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PartitionStrategy::Yearly => "yearly",
            PartitionStrategy::Monthly => "monthly",
            PartitionStrategy::Weekly => "weekly",
            PartitionStrategy::Daily => "daily",
        };
        f.write_str(s)
    }
}

impl FromStr for PartitionStrategy {
    type Err = TimeshardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "yearly" => Ok(PartitionStrategy::Yearly),
            "monthly" => Ok(PartitionStrategy::Monthly),
            "weekly" => Ok(PartitionStrategy::Weekly),
            "daily" => Ok(PartitionStrategy::Daily),
            other => Err(TimeshardError::UnsupportedStrategy(other.to_string())),
        }
    }
}

impl PartitionStrategy {
    /// Deterministic partition name for the bucket containing `ts`.
    ///
    /// Numeric components are zero-padded so lexicographic order equals
    /// chronological order within a strategy. Weekly names use the ISO
    /// week-numbering year, which can differ from the calendar year around
    /// January 1st.
    pub fn partition_name(&self, ts: DateTime<Utc>) -> String {
        match self {
            PartitionStrategy::Yearly => format!("{PARTITION_PREFIX}{}", ts.year()),
            PartitionStrategy::Monthly => {
                format!("{PARTITION_PREFIX}{}_{:02}", ts.year(), ts.month())
            }
            PartitionStrategy::Weekly => {
                let iso = ts.iso_week();
                format!("{PARTITION_PREFIX}{}_w{:02}", iso.year(), iso.week())
            }
            PartitionStrategy::Daily => format!(
                "{PARTITION_PREFIX}{}_{:02}_{:02}",
                ts.year(),
                ts.month(),
                ts.day()
            ),
        }
    }

    /// Inverse of [`partition_name`](Self::partition_name): the half-open UTC
    /// interval `[start, end)` covered by the named bucket.
    ///
    /// Every timestamp falls inside `partition_range(partition_name(ts))`.
    /// Weekly intervals run Monday to Monday per ISO-8601, so they stay
    /// contiguous and gap-free across year boundaries.
    pub fn partition_range(&self, name: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let malformed = || TimeshardError::MalformedPartitionName {
            name: name.to_string(),
        };
        let rest = name.strip_prefix(PARTITION_PREFIX).ok_or_else(malformed)?;
        let start = match self {
            PartitionStrategy::Yearly => {
                let year: i32 = rest.parse().map_err(|_| malformed())?;
                NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(malformed)?
            }
            PartitionStrategy::Monthly => {
                let parts: Vec<&str> = rest.split('_').collect();
                let [year, month] = parts.as_slice() else {
                    return Err(malformed());
                };
                let year: i32 = year.parse().map_err(|_| malformed())?;
                let month: u32 = month.parse().map_err(|_| malformed())?;
                NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(malformed)?
            }
            PartitionStrategy::Weekly => {
                let parts: Vec<&str> = rest.split('_').collect();
                let [year, week] = parts.as_slice() else {
                    return Err(malformed());
                };
                let year: i32 = year.parse().map_err(|_| malformed())?;
                let week: u32 = week
                    .strip_prefix('w')
                    .and_then(|w| w.parse().ok())
                    .ok_or_else(malformed)?;
                NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).ok_or_else(malformed)?
            }
            PartitionStrategy::Daily => {
                let parts: Vec<&str> = rest.split('_').collect();
                let [year, month, day] = parts.as_slice() else {
                    return Err(malformed());
                };
                let year: i32 = year.parse().map_err(|_| malformed())?;
                let month: u32 = month.parse().map_err(|_| malformed())?;
                let day: u32 = day.parse().map_err(|_| malformed())?;
                NaiveDate::from_ymd_opt(year, month, day).ok_or_else(malformed)?
            }
        };
        let start = start.and_time(NaiveTime::MIN).and_utc();
        Ok((start, self.next_bucket(start)))
    }

    /// First instant of the bucket containing `ts`.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let start = match self {
            PartitionStrategy::Yearly => date - Days::new(u64::from(date.ordinal0())),
            PartitionStrategy::Monthly => date - Days::new(u64::from(date.day0())),
            PartitionStrategy::Weekly => {
                date - Days::new(u64::from(date.weekday().num_days_from_monday()))
            }
            PartitionStrategy::Daily => date,
        };
        start.and_time(NaiveTime::MIN).and_utc()
    }

    /// First instant of the bucket after the one starting at `start`.
    pub fn next_bucket(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        let date = start.date_naive();
        let next = match self {
            PartitionStrategy::Yearly => date + Months::new(12),
            PartitionStrategy::Monthly => date + Months::new(1),
            PartitionStrategy::Weekly => date + Days::new(7),
            PartitionStrategy::Daily => date + Days::new(1),
        };
        next.and_time(NaiveTime::MIN).and_utc()
    }
}

/// Pure partitioning policy: strategy, routing column, filesystem layout,
/// pool and retention thresholds, and engine tuning applied on open.
///
/// Construction is builder-style; [`validate`](Self::validate) is invoked by
/// the partition manager before any shard is touched.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub strategy: PartitionStrategy,
    pub partition_column: String,
    pub base_path: PathBuf,
    pub main_db_path: PathBuf,
    pub max_open_partitions: usize,
    pub retention_days: Option<u32>,
    pub size_threshold_mb: u64,
    pub cross_partition_queries: bool,
    pub tuning: EngineTuning,
    pub interchange_extension: Option<PathBuf>,
}

impl PartitionConfig {
    /// Monthly defaults suitable for most deployments.
    pub fn new(base_path: impl AsRef<Path>, main_db_path: impl AsRef<Path>) -> Self {
        Self {
            strategy: PartitionStrategy::Monthly,
            partition_column: "created_at".to_string(),
            base_path: base_path.as_ref().to_path_buf(),
            main_db_path: main_db_path.as_ref().to_path_buf(),
            max_open_partitions: 24,
            retention_days: None,
            size_threshold_mb: 2000,
            cross_partition_queries: true,
            tuning: EngineTuning::default(),
            interchange_extension: None,
        }
    }

    /// Monthly preset: two years of shards in the pool, 2 GB split threshold.
    pub fn monthly(base_path: impl AsRef<Path>, main_db_path: impl AsRef<Path>) -> Self {
        Self::new(base_path, main_db_path)
    }

    /// Yearly preset for low-churn archives: small pool, 10 GB threshold.
    pub fn yearly(base_path: impl AsRef<Path>, main_db_path: impl AsRef<Path>) -> Self {
        Self::new(base_path, main_db_path)
            .with_strategy(PartitionStrategy::Yearly)
            .with_max_open_partitions(10)
            .with_size_threshold_mb(10_000)
    }

    /// Daily preset for high-volume ingest: two months of shards, 500 MB
    /// threshold.
    pub fn daily(base_path: impl AsRef<Path>, main_db_path: impl AsRef<Path>) -> Self {
        Self::new(base_path, main_db_path)
            .with_strategy(PartitionStrategy::Daily)
            .with_max_open_partitions(60)
            .with_size_threshold_mb(500)
    }

    pub fn with_strategy(mut self, strategy: PartitionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the record field whose timestamp value routes rows to shards.
    pub fn with_partition_column(mut self, column: impl Into<String>) -> Self {
        self.partition_column = column.into();
        self
    }

    /// Sets the bound on simultaneously open shard connections.
    pub fn with_max_open_partitions(mut self, max: usize) -> Self {
        self.max_open_partitions = max;
        self
    }

    /// Sets the retention window used by cleanup; `None` disables cleanup.
    pub fn with_retention_days(mut self, days: Option<u32>) -> Self {
        self.retention_days = days;
        self
    }

    /// Sets the advisory per-shard size threshold used by health reporting.
    pub fn with_size_threshold_mb(mut self, mb: u64) -> Self {
        self.size_threshold_mb = mb;
        self
    }

    /// Enables or disables fan-out of unpruned queries across all shards.
    /// When disabled, queries without a routing-column filter only see the
    /// main store.
    pub fn with_cross_partition_queries(mut self, enabled: bool) -> Self {
        self.cross_partition_queries = enabled;
        self
    }

    /// Sets the engine tuning applied to every connection on open.
    pub fn with_tuning(mut self, tuning: EngineTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Sets an optional engine extension loaded best-effort on every open.
    pub fn with_interchange_extension(mut self, path: impl AsRef<Path>) -> Self {
        self.interchange_extension = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition_column.trim().is_empty() {
            return Err(TimeshardError::InvalidConfiguration(
                "partition column must not be empty".to_string(),
            ));
        }
        if self.max_open_partitions == 0 {
            return Err(TimeshardError::InvalidConfiguration(
                "max_open_partitions must be at least 1".to_string(),
            ));
        }
        if self.base_path == self.main_db_path {
            return Err(TimeshardError::InvalidConfiguration(
                "base_path and main_db_path must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Partition name for the bucket containing `ts` under this strategy.
    pub fn partition_name(&self, ts: DateTime<Utc>) -> String {
        self.strategy.partition_name(ts)
    }

    /// Half-open interval covered by the named partition.
    pub fn partition_range(&self, name: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        self.strategy.partition_range(name)
    }

    /// Filesystem path of the named shard.
    pub fn partition_path(&self, name: &str) -> PathBuf {
        self.base_path
            .join(name)
            .with_extension(SHARD_EXTENSION)
    }

    /// Names of every bucket touching the inclusive instant range
    /// `[start, end]`, in chronological order.
    pub fn partition_names_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = self.strategy.bucket_start(start);
        while cursor <= end {
            names.push(self.strategy.partition_name(cursor));
            cursor = self.strategy.next_bucket(cursor);
        }
        names
    }

    /// Shards currently on disk, discovered by naming convention and sorted
    /// lexicographically (chronological within a strategy thanks to
    /// zero-padding).
    pub fn list_existing(&self) -> Result<Vec<String>> {
        if !self.base_path.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.base_path).map_err(|source| {
            TimeshardError::IoWithPath {
                path: self.base_path.clone(),
                source,
            }
        })? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && stem.starts_with(PARTITION_PREFIX)
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
