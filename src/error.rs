//! Error types for timeshard.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for timeshard operations.
pub type Result<T> = std::result::Result<T, TimeshardError>;

/// Main error type for timeshard operations.
#[derive(Error, Debug)]
pub enum TimeshardError {
    #[error("Unsupported partition strategy '{0}'")]
    UnsupportedStrategy(String),

    #[error("Malformed partition name '{name}'")]
    MalformedPartitionName { name: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Failed to open partition '{partition}' at {path:?}: {source}")]
    Connection {
        partition: String,
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to create table '{table}' in partition '{partition}': {source}")]
    SchemaCreation {
        partition: String,
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Invalid {kind} field '{field}' for table '{table}'")]
    InvalidField {
        kind: &'static str,
        field: String,
        table: String,
    },

    #[error("Staging failed: {0}")]
    Staging(String),

    #[error("Malformed stored record: {0}")]
    MalformedRecord(String),

    #[error("Query failed on partition '{partition}': {source}")]
    ShardQuery {
        partition: String,
        #[source]
        source: Box<TimeshardError>,
    },

    #[error("Partition manager is closed")]
    ManagerClosed,

    #[error("Worker task panicked: {task}")]
    TaskPanicked { task: String },

    #[error("IO error at path {path:?}: {source}")]
    IoWithPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel send error for {channel}")]
    ChannelSend { channel: String },

    #[error("Channel receive error for {channel}")]
    ChannelReceive { channel: String },
}

/// A failure scoped to a single partition, collected by cross-partition
/// operations that keep going when one shard fails.
#[derive(Debug)]
pub struct ShardFailure {
    pub partition: String,
    pub error: TimeshardError,
}

impl ShardFailure {
    pub fn new(partition: impl Into<String>, error: TimeshardError) -> Self {
        Self {
            partition: partition.into(),
            error,
        }
    }
}

impl std::fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "partition '{}': {}", self.partition, self.error)
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for TimeshardError {
    fn from(err: crossbeam_channel::SendError<T>) -> Self {
        TimeshardError::ChannelSend {
            channel: format!("{:?}", err),
        }
    }
}

impl From<crossbeam_channel::RecvError> for TimeshardError {
    fn from(err: crossbeam_channel::RecvError) -> Self {
        TimeshardError::ChannelReceive {
            channel: format!("{:?}", err),
        }
    }
}
