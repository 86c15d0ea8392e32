//! Advisory and maintenance tooling over an existing shard set: health
//! reporting, retention cleanup, backups, and metadata export. Everything
//! here works from file metadata and the naming convention; the health
//! report never opens a shard connection.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PartitionStrategy;
use crate::manager::{PartitionManager, file_size, to_mb};
use crate::{Result, TimeshardError};

/// Average shard size below this suggests the strategy is too fine.
const UNDERSIZE_AVG_MB: f64 = 10.0;
/// Shard counts above this earn an archival recommendation.
const ARCHIVE_SHARD_COUNT: usize = 100;
/// Beyond these, capacity planning is advised.
const CAPACITY_SHARD_COUNT: usize = 200;
const CAPACITY_TOTAL_MB: f64 = 100.0 * 1024.0;

/// Health of one shard file, from metadata only.
#[derive(Debug, Clone, Serialize)]
pub struct ShardHealth {
    pub partition: String,
    pub path: PathBuf,
    pub size_mb: f64,
    pub modified: Option<DateTime<Utc>>,
    /// Half-open date interval recovered from the name, when it parses.
    pub interval: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub oversize: bool,
}

impl ShardHealth {
    /// A shard is healthy when its name inverts cleanly and it is under the
    /// size threshold.
    pub fn is_healthy(&self) -> bool {
        self.interval.is_some() && !self.oversize
    }
}

/// Coarse rating derived from the share of healthy shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBand {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 1.0 {
            HealthBand::Excellent
        } else if score >= 0.75 {
            HealthBand::Good
        } else if score >= 0.5 {
            HealthBand::Fair
        } else {
            HealthBand::Poor
        }
    }
}

/// Advisory snapshot of the whole shard set. Never mutates anything.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub strategy: PartitionStrategy,
    pub shard_count: usize,
    pub total_size_mb: f64,
    pub average_size_mb: f64,
    pub healthy_shards: usize,
    pub health_score: f64,
    pub health_band: HealthBand,
    pub shards: Vec<ShardHealth>,
    pub recommendations: Vec<String>,
    pub errors: Vec<String>,
}

/// Outcome of one retention cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub examined: usize,
    pub deleted: Vec<String>,
    pub freed_mb: f64,
    pub cutoff: DateTime<Utc>,
    pub dry_run: bool,
    pub errors: Vec<String>,
}

/// Outcome of one shard backup.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub partition: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardMetadata {
    pub partition: String,
    pub path: PathBuf,
    pub size_mb: f64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Shard listing for external tooling.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataExport {
    pub generated_at: DateTime<Utc>,
    pub strategy: PartitionStrategy,
    pub partition_column: String,
    pub base_path: PathBuf,
    pub shards: Vec<ShardMetadata>,
}

/// Operational tools over a manager's shard set.
pub struct PartitionOps {
    manager: Arc<PartitionManager>,
}

impl PartitionOps {
    pub fn new(manager: Arc<PartitionManager>) -> Self {
        Self { manager }
    }

    /// Builds the advisory health report from file metadata and the naming
    /// convention.
    pub fn health_report(&self) -> Result<HealthReport> {
        let config = self.manager.config();
        let threshold_bytes = config.size_threshold_mb * 1024 * 1024;
        let mut shards = Vec::new();
        let mut errors = Vec::new();
        let mut total_bytes = 0u64;

        for name in config.list_existing()? {
            let path = config.partition_path(&name);
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(error) => {
                    errors.push(format!("cannot stat '{}': {error}", path.display()));
                    continue;
                }
            };
            total_bytes += metadata.len();
            let interval = config.partition_range(&name).ok();
            if interval.is_none() {
                errors.push(format!("shard '{name}' does not invert to a date interval"));
            }
            shards.push(ShardHealth {
                partition: name,
                size_mb: to_mb(metadata.len()),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                interval,
                oversize: metadata.len() > threshold_bytes,
                path,
            });
        }

        let shard_count = shards.len();
        let healthy_shards = shards.iter().filter(|s| s.is_healthy()).count();
        let health_score = if shard_count == 0 {
            1.0
        } else {
            healthy_shards as f64 / shard_count as f64
        };
        let total_size_mb = to_mb(total_bytes);
        let average_size_mb = if shard_count == 0 {
            0.0
        } else {
            total_size_mb / shard_count as f64
        };
        let recommendations = self.recommendations(&shards, total_size_mb, average_size_mb);
        Ok(HealthReport {
            generated_at: Utc::now(),
            strategy: config.strategy,
            shard_count,
            total_size_mb,
            average_size_mb,
            healthy_shards,
            health_score,
            health_band: HealthBand::from_score(health_score),
            shards,
            recommendations,
            errors,
        })
    }

    fn recommendations(
        &self,
        shards: &[ShardHealth],
        total_size_mb: f64,
        average_size_mb: f64,
    ) -> Vec<String> {
        let config = self.manager.config();
        let mut recommendations = Vec::new();
        let oversize = shards.iter().filter(|s| s.oversize).count();
        if oversize > 0 {
            recommendations.push(format!(
                "{oversize} shard(s) exceed {} MB; split further with a finer strategy",
                config.size_threshold_mb
            ));
        }
        let count = shards.len();
        if count > 0 && average_size_mb < UNDERSIZE_AVG_MB {
            recommendations.push(format!(
                "average shard size {average_size_mb:.1} MB is small; a coarser strategy would reduce file churn"
            ));
        }
        if count > 1 && average_size_mb > 0.0 {
            let variance = shards
                .iter()
                .map(|s| (s.size_mb - average_size_mb).powi(2))
                .sum::<f64>()
                / count as f64;
            if variance.sqrt() > 0.5 * average_size_mb {
                recommendations
                    .push("shard sizes vary widely; consider rebalancing hot ranges".to_string());
            }
        }
        if count > ARCHIVE_SHARD_COUNT {
            recommendations.push(format!("{count} shards on disk; archive old ranges"));
        }
        if count > CAPACITY_SHARD_COUNT || total_size_mb > CAPACITY_TOTAL_MB {
            recommendations
                .push("approaching capacity limits; plan archival or tiered storage".to_string());
        }
        recommendations
    }

    /// Deletes every shard whose interval ended before now minus the
    /// retention window. `retention_days` overrides the configured value.
    /// Per-shard failures are collected; the pass continues.
    pub fn cleanup_old_partitions(
        &self,
        retention_days: Option<u32>,
        dry_run: bool,
    ) -> Result<CleanupReport> {
        let config = self.manager.config();
        let Some(days) = retention_days.or(config.retention_days) else {
            return Err(TimeshardError::InvalidConfiguration(
                "cleanup requires a retention window, none configured or given".to_string(),
            ));
        };
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut report = CleanupReport {
            examined: 0,
            deleted: Vec::new(),
            freed_mb: 0.0,
            cutoff,
            dry_run,
            errors: Vec::new(),
        };

        let mut freed_bytes = 0u64;
        for name in config.list_existing()? {
            report.examined += 1;
            let (_, end) = match config.partition_range(&name) {
                Ok(interval) => interval,
                Err(error) => {
                    report.errors.push(format!("skipping '{name}': {error}"));
                    continue;
                }
            };
            if end > cutoff {
                continue;
            }
            let path = config.partition_path(&name);
            let size = file_size(&path);
            if dry_run {
                info!(partition = %name, "cleanup candidate (dry run)");
                freed_bytes += size;
                report.deleted.push(name);
                continue;
            }
            self.manager.close_partition(&name);
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(partition = %name, mb = to_mb(size), "deleted expired shard");
                    freed_bytes += size;
                    report.deleted.push(name);
                }
                Err(error) => {
                    warn!(partition = %name, error = %error, "failed to delete shard");
                    report
                        .errors
                        .push(format!("failed to delete '{name}': {error}"));
                }
            }
        }
        report.freed_mb = to_mb(freed_bytes);
        Ok(report)
    }

    /// Copies one shard file to `destination_dir` under a timestamped name.
    /// The pooled connection is closed first so the copy sees a quiesced
    /// file. Success means the destination file exists afterwards; contents
    /// are not checksummed.
    pub fn backup_partition(&self, name: &str, destination_dir: &Path) -> Result<BackupReport> {
        let config = self.manager.config();
        let source = config.partition_path(name);
        fs::create_dir_all(destination_dir).map_err(|error| TimeshardError::IoWithPath {
            path: destination_dir.to_path_buf(),
            source: error,
        })?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let destination = destination_dir.join(format!("{name}_backup_{stamp}.db"));

        self.manager.close_partition(name);
        let copied = fs::copy(&source, &destination).map_err(|error| {
            TimeshardError::IoWithPath {
                path: source.clone(),
                source: error,
            }
        })?;
        if !destination.is_file() {
            return Err(TimeshardError::IoWithPath {
                path: destination,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "backup destination missing after copy",
                ),
            });
        }
        info!(partition = %name, destination = %destination.display(), "shard backed up");
        Ok(BackupReport {
            partition: name.to_string(),
            source,
            destination,
            size_mb: to_mb(copied),
        })
    }

    /// Serializable listing of every shard for external tooling.
    pub fn export_metadata(&self) -> Result<MetadataExport> {
        let config = self.manager.config();
        let mut shards = Vec::new();
        for name in config.list_existing()? {
            let path = config.partition_path(&name);
            let interval = config.partition_range(&name).ok();
            shards.push(ShardMetadata {
                size_mb: to_mb(file_size(&path)),
                start: interval.map(|(start, _)| start),
                end: interval.map(|(_, end)| end),
                partition: name,
                path,
            });
        }
        Ok(MetadataExport {
            generated_at: Utc::now(),
            strategy: config.strategy,
            partition_column: config.partition_column.clone(),
            base_path: config.base_path.clone(),
            shards,
        })
    }

    /// Exports metadata as pretty JSON to `path`.
    pub fn write_metadata(&self, path: &Path) -> Result<MetadataExport> {
        let export = self.export_metadata()?;
        let rendered = serde_json::to_string_pretty(&export)?;
        fs::write(path, rendered).map_err(|error| TimeshardError::IoWithPath {
            path: path.to_path_buf(),
            source: error,
        })?;
        info!(path = %path.display(), shards = export.shards.len(), "metadata exported");
        Ok(export)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionConfig;
    use tempfile::TempDir;

    fn ops(config: PartitionConfig) -> PartitionOps {
        let manager = Arc::new(PartitionManager::new(config).unwrap());
        manager.initialize().unwrap();
        PartitionOps::new(manager)
    }

    fn seed_file(dir: &TempDir, name: &str, bytes: &[u8]) {
        std::fs::write(dir.path().join(format!("{name}.db")), bytes).unwrap();
    }

    #[test]
    fn health_report_flags_oversize_shards() {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"))
            .with_size_threshold_mb(0);
        let ops = ops(config);
        seed_file(&dir, "partition_2024_01", b"some bytes");

        let report = ops.health_report().unwrap();
        assert_eq!(report.shard_count, 1);
        assert!(report.shards[0].oversize);
        assert_eq!(report.healthy_shards, 0);
        assert_eq!(report.health_band, HealthBand::Poor);
        assert!(report.recommendations.iter().any(|r| r.contains("finer")));
    }

    #[test]
    fn health_report_is_clean_for_reasonable_shards() {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"));
        let ops = ops(config);
        seed_file(&dir, "partition_2024_01", b"x");
        seed_file(&dir, "partition_2024_02", b"y");

        let report = ops.health_report().unwrap();
        assert_eq!(report.shard_count, 2);
        assert_eq!(report.healthy_shards, 2);
        assert_eq!(report.health_band, HealthBand::Excellent);
        assert!(report.errors.is_empty());
        assert!(report.shards.iter().all(|s| s.interval.is_some()));
    }

    #[test]
    fn cleanup_respects_dry_run_and_retention() {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"))
            .with_retention_days(Some(30));
        let ops = ops(config);
        seed_file(&dir, "partition_2020_01", b"old shard");
        let current = ops.manager.config().partition_name(Utc::now());
        seed_file(&dir, &current, b"current shard");

        let dry = ops.cleanup_old_partitions(None, true).unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.examined, 2);
        assert_eq!(dry.deleted, vec!["partition_2020_01"]);
        assert!(dir.path().join("partition_2020_01.db").is_file());

        let live = ops.cleanup_old_partitions(None, false).unwrap();
        assert_eq!(live.deleted, vec!["partition_2020_01"]);
        assert!(live.freed_mb > 0.0);
        assert!(live.errors.is_empty());
        assert!(!dir.path().join("partition_2020_01.db").exists());
        assert!(dir.path().join(format!("{current}.db")).is_file());
    }

    #[test]
    fn cleanup_without_retention_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"));
        let ops = ops(config);
        let error = ops.cleanup_old_partitions(None, true).unwrap_err();
        assert!(matches!(error, TimeshardError::InvalidConfiguration(_)));
    }

    #[test]
    fn backup_copies_to_timestamped_destination() {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"));
        let ops = ops(config);
        seed_file(&dir, "partition_2024_03", b"shard contents");

        let backups = dir.path().join("backups");
        let report = ops.backup_partition("partition_2024_03", &backups).unwrap();
        assert!(report.destination.is_file());
        let file_name = report.destination.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("partition_2024_03_backup_"));
        assert_eq!(
            std::fs::read(&report.destination).unwrap(),
            b"shard contents"
        );
    }

    #[test]
    fn backup_of_missing_shard_fails() {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"));
        let ops = ops(config);
        let error = ops
            .backup_partition("partition_1999_01", &dir.path().join("backups"))
            .unwrap_err();
        assert!(matches!(error, TimeshardError::IoWithPath { .. }));
    }

    #[test]
    fn metadata_export_round_trips_as_json() {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::monthly(dir.path(), dir.path().join("main.db"));
        let ops = ops(config);
        seed_file(&dir, "partition_2024_01", b"a");
        seed_file(&dir, "partition_2024_02", b"bb");

        let out = dir.path().join("metadata.json");
        let export = ops.write_metadata(&out).unwrap();
        assert_eq!(export.shards.len(), 2);
        assert!(export.shards.iter().all(|s| s.start.is_some()));

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(parsed["shards"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["strategy"], "monthly");
    }
}
