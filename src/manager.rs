//! Connection lifecycle for partition shards: the bounded pool, recency
//! eviction, idempotent schema DDL, and teardown.

use crate::config::PartitionConfig;
use crate::engine::{self, ExtensionLoad};
use crate::exec::Gate;
use crate::schema::TableSchema;
use crate::{Result, TimeshardError};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One live shard connection.
///
/// Engine access goes through [`with_conn`](Self::with_conn), which takes the
/// per-shard lock; work on different shards therefore proceeds in parallel
/// while access to a single connection is serialized. A handle evicted from
/// the pool stays usable by whoever still holds it; the connection closes on
/// the final drop.
pub struct ShardHandle {
    name: String,
    path: PathBuf,
    conn: Mutex<Connection>,
    extension: ExtensionLoad,
}

/// Shared reference to a pooled shard connection.
pub type SharedShard = Arc<ShardHandle>;

impl ShardHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Outcome of the interchange-extension load attempted when this handle
    /// was opened.
    pub fn extension(&self) -> &ExtensionLoad {
        &self.extension
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}

#[derive(Default)]
struct PoolState {
    shards: HashMap<String, PoolEntry>,
    main: Option<SharedShard>,
    tick: u64,
    initialized: bool,
}

struct PoolEntry {
    handle: SharedShard,
    last_used: u64,
}

/// Sizes and counts reported by [`PartitionManager::statistics`].
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub partition_count: usize,
    pub open_connections: usize,
    pub total_size_mb: f64,
    pub main_db_size_mb: f64,
    pub partitions: Vec<PartitionFileStat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionFileStat {
    pub name: String,
    pub size_mb: f64,
}

/// Owns every live shard connection.
///
/// One mutex guards the name-to-handle map, the recency tick, and the main
/// handle; it is held for bookkeeping and connection opening, never for
/// engine calls on handles already given out. The tracked set never exceeds
/// `max_open_partitions`: beyond the bound, the least-recently-used entry is
/// dropped first.
pub struct PartitionManager {
    config: PartitionConfig,
    gate: Arc<Gate>,
    state: Mutex<PoolState>,
}

impl PartitionManager {
    pub fn new(config: PartitionConfig) -> Result<Self> {
        Self::with_gate(config, Arc::new(Gate::with_default_workers()))
    }

    /// Constructor-injection variant sharing an existing gate.
    pub fn with_gate(config: PartitionConfig, gate: Arc<Gate>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            gate,
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }

    /// Creates the base directory and opens the main-store handle. Idempotent;
    /// also re-arms a manager after [`close_all`](Self::close_all).
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.initialized {
            return Ok(());
        }
        fs::create_dir_all(&self.config.base_path).map_err(|source| {
            TimeshardError::IoWithPath {
                path: self.config.base_path.clone(),
                source,
            }
        })?;
        self.warn_on_low_fd_limit();
        let main = self.open_handle("main", self.config.main_db_path.clone())?;
        state.main = Some(main);
        state.initialized = true;
        info!(
            strategy = %self.config.strategy,
            column = %self.config.partition_column,
            base = %self.config.base_path.display(),
            max_open = self.config.max_open_partitions,
            "partition manager initialized"
        );
        Ok(())
    }

    /// Returns the pooled handle for `name`, opening it if needed. A cache
    /// hit bumps the entry's recency; a miss opens under the manager mutex,
    /// applies tuning and the best-effort extension load, then enforces the
    /// pool bound.
    pub fn acquire(&self, name: &str) -> Result<SharedShard> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(TimeshardError::ManagerClosed);
        }
        state.tick += 1;
        let tick = state.tick;
        if let Some(entry) = state.shards.get_mut(name) {
            entry.last_used = tick;
            return Ok(Arc::clone(&entry.handle));
        }

        let handle = self.open_handle(name, self.config.partition_path(name))?;
        state.shards.insert(
            name.to_string(),
            PoolEntry {
                handle: Arc::clone(&handle),
                last_used: tick,
            },
        );
        self.evict_over_bound(&mut state);
        Ok(handle)
    }

    /// Handle for the unpartitioned main store.
    pub fn main_store(&self) -> Result<SharedShard> {
        self.state
            .lock()
            .main
            .clone()
            .ok_or(TimeshardError::ManagerClosed)
    }

    /// Acquires `name` and makes sure the schema's table and indexes exist.
    /// Idempotent: a shard file that already carries the table is left
    /// untouched; a file missing it (new or otherwise) gets it recreated.
    pub fn ensure_schema(&self, name: &str, schema: &TableSchema) -> Result<SharedShard> {
        let handle = self.acquire(name)?;
        let job_handle = Arc::clone(&handle);
        let schema = schema.clone();
        let partition = name.to_string();
        let partition_column = self.config.partition_column.clone();
        self.gate.run("ensure-schema", move || {
            job_handle.with_conn(|conn| {
                if engine::table_exists(conn, schema.table_name())? {
                    return Ok(());
                }
                let mut statements = vec![schema.create_table_sql()];
                statements.extend(schema.index_statements(&partition_column));
                for statement in &statements {
                    conn.execute_batch(statement).map_err(|source| {
                        TimeshardError::SchemaCreation {
                            partition: partition.clone(),
                            table: schema.table_name().to_string(),
                            source,
                        }
                    })?;
                }
                info!(partition = %partition, table = %schema.table_name(), "created table");
                Ok(())
            })
        })?;
        Ok(handle)
    }

    /// Drops the tracked handle for `name`, if any. In-flight clones of the
    /// handle finish their work before the connection actually closes.
    pub fn close_partition(&self, name: &str) -> bool {
        let removed = self.state.lock().shards.remove(name).is_some();
        if removed {
            debug!(partition = %name, "closed shard connection");
        }
        removed
    }

    /// Drops every tracked handle plus the main handle. Safe to call
    /// repeatedly; `initialize` re-arms the manager.
    pub fn close_all(&self) {
        let mut state = self.state.lock();
        let open = state.shards.len();
        state.shards.clear();
        state.main = None;
        state.initialized = false;
        if open > 0 {
            info!(connections = open, "closed all shard connections");
        }
    }

    /// Names of currently tracked (open) shard connections.
    pub fn open_partitions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().shards.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn open_connection_count(&self) -> usize {
        self.state.lock().shards.len()
    }

    /// Extension-load outcome for a tracked shard, if currently pooled.
    pub fn extension_status(&self, name: &str) -> Option<ExtensionLoad> {
        self.state
            .lock()
            .shards
            .get(name)
            .map(|entry| entry.handle.extension().clone())
    }

    /// Disk usage summary across shard files and the main store.
    pub fn statistics(&self) -> Result<ManagerStats> {
        let names = self.config.list_existing()?;
        let mut partitions = Vec::with_capacity(names.len());
        let mut total_bytes = 0u64;
        for name in names {
            let bytes = file_size(&self.config.partition_path(&name));
            total_bytes += bytes;
            partitions.push(PartitionFileStat {
                name,
                size_mb: to_mb(bytes),
            });
        }
        Ok(ManagerStats {
            partition_count: partitions.len(),
            open_connections: self.open_connection_count(),
            total_size_mb: to_mb(total_bytes),
            main_db_size_mb: to_mb(file_size(&self.config.main_db_path)),
            partitions,
        })
    }

    fn open_handle(&self, name: &str, path: PathBuf) -> Result<SharedShard> {
        let tuning = self.config.tuning.clone();
        let extension = self.config.interchange_extension.clone();
        let name = name.to_string();
        self.gate.run("open-shard", move || {
            let conn = engine::open_database(&path, &tuning).map_err(|source| {
                TimeshardError::Connection {
                    partition: name.clone(),
                    path: path.clone(),
                    source,
                }
            })?;
            let extension = engine::load_interchange_extension(&conn, extension.as_deref());
            debug!(partition = %name, "opened shard connection");
            Ok(Arc::new(ShardHandle {
                name,
                path,
                conn: Mutex::new(conn),
                extension,
            }))
        })
    }

    fn evict_over_bound(&self, state: &mut PoolState) {
        while state.shards.len() > self.config.max_open_partitions {
            let stalest = state
                .shards
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(name, _)| name.clone());
            let Some(stalest) = stalest else {
                break;
            };
            state.shards.remove(&stalest);
            debug!(partition = %stalest, "evicted least-recently-used shard connection");
        }
    }

    #[cfg(unix)]
    fn warn_on_low_fd_limit(&self) {
        let mut rlim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        unsafe {
            if libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) == 0 {
                let required = self.config.max_open_partitions as u64 + 32;
                if (rlim.rlim_cur as u64) < required {
                    warn!(
                        limit = rlim.rlim_cur,
                        required,
                        "file descriptor limit looks low for the configured pool; \
                         consider raising it with 'ulimit -n'"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn warn_on_low_fd_limit(&self) {}
}

pub(crate) fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

pub(crate) fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
