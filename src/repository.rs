//! The partitioned record store.
//!
//! Writes are routed by the configured partition column, batches are staged
//! to delimited files and bulk-loaded one transaction per shard, and reads
//! fan out over the pruned shard set with per-shard failure accounting. A
//! shard that cannot be opened or queried never aborts its siblings; it is
//! reported in the result instead.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{self, StagedRow, StagingFile};
use crate::error::ShardFailure;
use crate::exec::Pending;
use crate::manager::{PartitionManager, ShardHandle, SharedShard};
use crate::query::{FilterOp, Page, Pagination, QueryRequest, TotalCount};
use crate::record::{
    DataRecord, RoutedTimestamp, format_stored_timestamp, parse_routing_timestamp,
    parse_stored_timestamp, route_timestamp,
};
use crate::schema::{ColumnType, TableSchema};
use crate::sql::{SqlBuilder, SqlStatement};
use crate::{Result, TimeshardError};

static BULK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Storage contract for schema-driven records. [`PartitionedStore`] is the
/// routing implementation; the trait keeps call sites testable against
/// simpler stand-ins.
pub trait RecordRepository {
    /// Inserts one record, routed by the partition column.
    fn create(&self, schema: &TableSchema, data: Map<String, Value>) -> Result<DataRecord>;

    /// Inserts a batch, grouped by destination shard and committed one
    /// transaction per shard.
    fn create_batch(&self, schema: &TableSchema, records: Vec<DataRecord>)
    -> Result<BatchOutcome>;

    /// Looks a record up by id: main store first, then every shard in
    /// chronological order, short-circuiting on the first hit. Cost grows
    /// linearly with the number of shard files on disk.
    fn get_by_id(&self, schema: &TableSchema, id: Uuid) -> Result<Option<DataRecord>>;

    /// Paginated query over the pruned shard set.
    fn get_all(&self, schema: &TableSchema, request: &QueryRequest) -> Result<Page<DataRecord>>;

    /// Count over the pruned shard set.
    fn count_all(&self, schema: &TableSchema, request: &QueryRequest) -> Result<TotalCount>;

    /// Lazy partition-at-a-time iteration over the pruned shard set.
    fn stream_query_results(
        &self,
        schema: &TableSchema,
        request: &QueryRequest,
    ) -> Result<RecordStream>;
}

/// Result of one committed shard group within a batch.
#[derive(Debug, Clone)]
pub struct ShardWrite {
    pub partition: String,
    /// Rows staged to the delimited file.
    pub staged: usize,
    /// Rows the target table actually accepted.
    pub inserted: usize,
    /// Rows skipped by the composite-key constraint.
    pub deduplicated: usize,
}

/// Aggregate result of a batch insert. A batch never fails silently: every
/// shard either shows up in `commits` or in `failures`.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub commits: Vec<ShardWrite>,
    pub failures: Vec<ShardFailure>,
}

impl BatchOutcome {
    pub fn inserted(&self) -> usize {
        self.commits.iter().map(|w| w.inserted).sum()
    }

    pub fn deduplicated(&self) -> usize {
        self.commits.iter().map(|w| w.deduplicated).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Where one query job runs: the unpartitioned main store or a named shard.
#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryTarget {
    Main,
    Shard(String),
}

impl QueryTarget {
    fn label(&self) -> &str {
        match self {
            QueryTarget::Main => "main",
            QueryTarget::Shard(name) => name,
        }
    }
}

/// Time-partitioned implementation of [`RecordRepository`] over a shared
/// [`PartitionManager`].
pub struct PartitionedStore {
    manager: Arc<PartitionManager>,
}

impl PartitionedStore {
    pub fn new(manager: Arc<PartitionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<PartitionManager> {
        &self.manager
    }

    /// Resolves the destination shard for a record's data map. Fallback
    /// routing is logged, and the outcome says which path was taken.
    pub fn route_record(&self, data: &Map<String, Value>) -> (String, RoutedTimestamp) {
        let config = self.manager.config();
        let routed = route_timestamp(data, &config.partition_column, Utc::now());
        match &routed {
            RoutedTimestamp::Parsed(_) => {}
            RoutedTimestamp::MissingColumn { .. } => {
                warn!(
                    column = %config.partition_column,
                    "partition column missing or null; routing to current time"
                );
            }
            RoutedTimestamp::Unparseable { raw, .. } => {
                warn!(
                    column = %config.partition_column,
                    value = %raw,
                    "unparseable partition value; routing to current time"
                );
            }
        }
        (config.partition_name(routed.effective()), routed)
    }

    /// Shards worth scanning for `request`: the intersection of the interval
    /// implied by partition-column predicates with what exists on disk. No
    /// usable bounds means every existing shard. An empty result means the
    /// query falls through to the main store.
    pub fn candidate_partitions(&self, request: &QueryRequest) -> Result<Vec<String>> {
        let config = self.manager.config();
        let existing = config.list_existing()?;
        let (start, end) = self.partition_bounds(request);
        let candidates = match (start, end) {
            (None, None) => existing,
            (Some(start), Some(end)) => {
                if start > end {
                    return Ok(Vec::new());
                }
                let covering: HashSet<String> = config
                    .partition_names_between(start, end)
                    .into_iter()
                    .collect();
                existing
                    .into_iter()
                    .filter(|name| covering.contains(name))
                    .collect()
            }
            (start, end) => existing
                .into_iter()
                .filter(|name| match config.partition_range(name) {
                    Ok((shard_start, shard_end)) => {
                        start.is_none_or(|s| shard_end > s) && end.is_none_or(|e| shard_start <= e)
                    }
                    Err(_) => {
                        warn!(partition = %name, "skipping unrecognized shard name during pruning");
                        false
                    }
                })
                .collect(),
        };
        Ok(candidates)
    }

    /// Tightest `[start, end]` interval the partition-column predicates
    /// imply. Unparseable or non-string bounds are ignored rather than
    /// guessed at, widening the scan.
    fn partition_bounds(
        &self,
        request: &QueryRequest,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let column = &self.manager.config().partition_column;
        let mut start: Option<DateTime<Utc>> = None;
        let mut end: Option<DateTime<Utc>> = None;
        for filter in request.filters_on(column) {
            let Value::String(raw) = &filter.value else {
                continue;
            };
            let Some(bound) = parse_routing_timestamp(raw) else {
                continue;
            };
            match filter.op {
                FilterOp::Eq => {
                    start = Some(start.map_or(bound, |s| s.max(bound)));
                    end = Some(end.map_or(bound, |e| e.min(bound)));
                }
                FilterOp::Gt | FilterOp::Gte => {
                    start = Some(start.map_or(bound, |s| s.max(bound)));
                }
                FilterOp::Lt | FilterOp::Lte => {
                    end = Some(end.map_or(bound, |e| e.min(bound)));
                }
                _ => {}
            }
        }
        (start, end)
    }

    /// Turns the pruned candidate set into concrete query targets. Queries
    /// without partition bounds stay on the main store when cross-partition
    /// scanning is disabled; an empty candidate set also falls back to main.
    fn resolve_targets(&self, request: &QueryRequest) -> Result<Vec<QueryTarget>> {
        let config = self.manager.config();
        if !config.cross_partition_queries {
            let (start, end) = self.partition_bounds(request);
            if start.is_none() && end.is_none() {
                debug!("cross-partition scans disabled and no partition bounds; querying main only");
                return Ok(vec![QueryTarget::Main]);
            }
        }
        let candidates = self.candidate_partitions(request)?;
        if candidates.is_empty() {
            return Ok(vec![QueryTarget::Main]);
        }
        Ok(candidates.into_iter().map(QueryTarget::Shard).collect())
    }

    fn handle_for(&self, target: &QueryTarget) -> Result<SharedShard> {
        match target {
            QueryTarget::Main => self.manager.main_store(),
            QueryTarget::Shard(name) => self.manager.acquire(name),
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.manager.config().base_path.join(".staging")
    }

    /// Stages one routed group to a delimited file and hands the
    /// transactional bulk load to the gate.
    fn stage_group(
        &self,
        schema: &TableSchema,
        partition: &str,
        rows: &[DataRecord],
    ) -> Result<Pending<ShardWrite>> {
        let handle = self.manager.ensure_schema(partition, schema)?;
        let columns = schema.column_names();
        let staged: Vec<StagedRow> = rows.iter().map(|record| staged_row(schema, record)).collect();
        let file = StagingFile::create(&self.staging_dir(), schema.table_name(), &columns, &staged)?;
        let table = schema.table_name().to_string();
        let column_count = columns.len();
        let partition = partition.to_string();
        self.manager.gate().submit("bulk-insert", move || {
            bulk_insert_group(&handle, &partition, &table, column_count, file)
        })
    }
}

impl RecordRepository for PartitionedStore {
    fn create(&self, schema: &TableSchema, data: Map<String, Value>) -> Result<DataRecord> {
        let (partition, _) = self.route_record(&data);
        let handle = self.manager.ensure_schema(&partition, schema)?;
        let record = DataRecord::new(data).with_composite_key(schema);
        let statement = SqlBuilder::new(schema).insert_record(&record);
        self.manager.gate().run("insert-record", move || {
            handle.with_conn(|conn| {
                conn.execute(&statement.sql, params_from_iter(statement.params))?;
                Ok(())
            })
        })?;
        debug!(partition = %partition, id = %record.id, "record created");
        Ok(record)
    }

    fn create_batch(
        &self,
        schema: &TableSchema,
        records: Vec<DataRecord>,
    ) -> Result<BatchOutcome> {
        let attempted = records.len();
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }

        // Group before touching any connection so each shard sees exactly
        // one transaction. BTreeMap keeps commits in chronological order.
        let mut groups: BTreeMap<String, Vec<DataRecord>> = BTreeMap::new();
        for record in records {
            let (partition, _) = self.route_record(&record.data);
            groups
                .entry(partition)
                .or_default()
                .push(record.with_composite_key(schema));
        }
        info!(
            records = attempted,
            groups = groups.len(),
            "bulk create grouped by partition"
        );

        let mut outcome = BatchOutcome {
            attempted,
            ..BatchOutcome::default()
        };
        let mut pending = Vec::new();
        for (partition, rows) in groups {
            match self.stage_group(schema, &partition, &rows) {
                Ok(job) => pending.push((partition, job)),
                Err(error) => {
                    warn!(partition = %partition, error = %error, "bulk group failed before commit");
                    outcome.failures.push(ShardFailure::new(partition, error));
                }
            }
        }
        for (partition, job) in pending {
            match job.wait() {
                Ok(write) => outcome.commits.push(write),
                Err(error) => {
                    warn!(partition = %partition, error = %error, "bulk group failed");
                    outcome.failures.push(ShardFailure::new(partition, error));
                }
            }
        }
        Ok(outcome)
    }

    fn get_by_id(&self, schema: &TableSchema, id: Uuid) -> Result<Option<DataRecord>> {
        let gate = self.manager.gate();
        let mut first_error: Option<TimeshardError> = None;

        match self.manager.main_store() {
            Ok(handle) => {
                let job_schema = schema.clone();
                match gate.run("lookup-id", move || lookup_by_id(&handle, &job_schema, id)) {
                    Ok(Some(record)) => return Ok(Some(record)),
                    Ok(None) => {}
                    Err(error) => {
                        warn!(partition = "main", error = %error, "id lookup failed");
                        first_error = Some(shard_error("main", error));
                    }
                }
            }
            Err(error) => first_error = Some(error),
        }

        for name in self.manager.config().list_existing()? {
            let handle = match self.manager.acquire(&name) {
                Ok(handle) => handle,
                Err(error) => {
                    warn!(partition = %name, error = %error, "skipping shard during id lookup");
                    if first_error.is_none() {
                        first_error = Some(shard_error(&name, error));
                    }
                    continue;
                }
            };
            let job_schema = schema.clone();
            match gate.run("lookup-id", move || lookup_by_id(&handle, &job_schema, id)) {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {}
                Err(error) => {
                    warn!(partition = %name, error = %error, "id lookup failed");
                    if first_error.is_none() {
                        first_error = Some(shard_error(&name, error));
                    }
                }
            }
        }

        // A miss with skipped shards is not a clean miss; the caller gets
        // the first failure rather than a false `None`.
        match first_error {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }

    fn get_all(&self, schema: &TableSchema, request: &QueryRequest) -> Result<Page<DataRecord>> {
        let mut request = request.clone();
        let pagination = *request.pagination.get_or_insert_with(Pagination::default);
        let builder = SqlBuilder::new(schema);
        let select = builder.select(&request)?;
        let count = builder.count(&request)?;
        let targets = self.resolve_targets(&request)?;
        debug!(
            targets = targets.len(),
            page = pagination.page,
            size = pagination.size,
            "query fan-out"
        );

        let mut pending = Vec::new();
        let mut failures = Vec::new();
        for target in targets {
            match self.handle_for(&target) {
                Ok(handle) => {
                    let job_schema = schema.clone();
                    let select = select.clone();
                    let count = count.clone();
                    let submitted = self.manager.gate().submit("query-shard", move || {
                        run_shard_query(&handle, &job_schema, select, count)
                    });
                    match submitted {
                        Ok(job) => pending.push((target, job)),
                        Err(error) => failures.push(ShardFailure::new(target.label(), error)),
                    }
                }
                Err(error) => failures.push(ShardFailure::new(target.label(), error)),
            }
        }

        let mut items = Vec::new();
        let mut total = 0u64;
        for (target, job) in pending {
            match job.wait() {
                Ok((shard_total, records)) => {
                    total += shard_total;
                    items.extend(records);
                }
                Err(error) => {
                    warn!(partition = target.label(), error = %error, "shard query failed");
                    failures.push(ShardFailure::new(target.label(), error));
                }
            }
        }

        let has_next = ((pagination.offset() + pagination.size) as u64) < total;
        Ok(Page {
            items,
            total,
            page: pagination.page,
            size: pagination.size,
            has_next,
            has_previous: pagination.page > 1,
            failures,
        })
    }

    fn count_all(&self, schema: &TableSchema, request: &QueryRequest) -> Result<TotalCount> {
        let count = SqlBuilder::new(schema).count(request)?;
        let targets = self.resolve_targets(request)?;

        let mut pending = Vec::new();
        let mut failures = Vec::new();
        for target in targets {
            match self.handle_for(&target) {
                Ok(handle) => {
                    let table = schema.table_name().to_string();
                    let count = count.clone();
                    let submitted = self.manager.gate().submit("count-shard", move || {
                        run_shard_count(&handle, &table, count)
                    });
                    match submitted {
                        Ok(job) => pending.push((target, job)),
                        Err(error) => failures.push(ShardFailure::new(target.label(), error)),
                    }
                }
                Err(error) => failures.push(ShardFailure::new(target.label(), error)),
            }
        }

        let mut total = 0u64;
        for (target, job) in pending {
            match job.wait() {
                Ok(shard_total) => total += shard_total,
                Err(error) => {
                    warn!(partition = target.label(), error = %error, "shard count failed");
                    failures.push(ShardFailure::new(target.label(), error));
                }
            }
        }
        Ok(TotalCount { total, failures })
    }

    fn stream_query_results(
        &self,
        schema: &TableSchema,
        request: &QueryRequest,
    ) -> Result<RecordStream> {
        let select = SqlBuilder::new(schema).select_unpaginated(request)?;
        let targets = self.resolve_targets(request)?;
        debug!(targets = targets.len(), "streaming query");
        Ok(RecordStream {
            manager: Arc::clone(&self.manager),
            schema: schema.clone(),
            select,
            cap: request.pagination.map(|p| p.size),
            targets: targets.into_iter(),
            buffered: Vec::new().into_iter(),
            yielded: 0,
            finished: false,
        })
    }
}

/// Lazy cross-shard iteration: one shard is loaded at a time, in
/// chronological order, and `pagination.size` (when given) caps the total
/// row count. Ordering holds within each shard only. A failing shard yields
/// a single `Err` and iteration moves on to the next one.
pub struct RecordStream {
    manager: Arc<PartitionManager>,
    schema: TableSchema,
    select: SqlStatement,
    cap: Option<usize>,
    targets: std::vec::IntoIter<QueryTarget>,
    buffered: std::vec::IntoIter<DataRecord>,
    yielded: usize,
    finished: bool,
}

impl RecordStream {
    /// Pulls the next target's rows into the buffer. Returns the error to
    /// surface when that target fails.
    fn fetch_next_chunk(&mut self) -> Option<TimeshardError> {
        let Some(target) = self.targets.next() else {
            self.finished = true;
            return None;
        };
        match self.run_chunk(&target) {
            Ok(records) => {
                debug!(partition = target.label(), rows = records.len(), "stream chunk loaded");
                self.buffered = records.into_iter();
                None
            }
            Err(error) => Some(shard_error(target.label(), error)),
        }
    }

    fn run_chunk(&self, target: &QueryTarget) -> Result<Vec<DataRecord>> {
        let handle = match target {
            QueryTarget::Main => self.manager.main_store()?,
            QueryTarget::Shard(name) => self.manager.acquire(name)?,
        };
        let mut statement = self.select.clone();
        if let Some(cap) = self.cap {
            // Never pull more than the stream can still yield.
            statement.sql.push_str(" LIMIT ?");
            statement
                .params
                .push(SqlValue::Integer((cap - self.yielded) as i64));
        }
        let schema = self.schema.clone();
        self.manager.gate().run("stream-chunk", move || {
            handle.with_conn(|conn| {
                if !engine::table_exists(conn, schema.table_name())? {
                    return Ok(Vec::new());
                }
                let mut stmt = conn.prepare(&statement.sql)?;
                let mut rows = stmt.query(params_from_iter(statement.params))?;
                let mut records = Vec::new();
                while let Some(row) = rows.next()? {
                    records.push(row_to_record(&schema, row)?);
                }
                Ok(records)
            })
        })
    }
}

impl Iterator for RecordStream {
    type Item = Result<DataRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if self.cap.is_some_and(|cap| self.yielded >= cap) {
                self.finished = true;
                return None;
            }
            if let Some(record) = self.buffered.next() {
                self.yielded += 1;
                return Some(Ok(record));
            }
            if let Some(error) = self.fetch_next_chunk() {
                return Some(Err(error));
            }
        }
    }
}

fn shard_error(partition: &str, error: TimeshardError) -> TimeshardError {
    TimeshardError::ShardQuery {
        partition: partition.to_string(),
        source: Box::new(error),
    }
}

/// Encodes one record as a staged row in schema column order.
fn staged_row(schema: &TableSchema, record: &DataRecord) -> StagedRow {
    let mut row: StagedRow = vec![
        Some(record.id.to_string()),
        Some(format_stored_timestamp(record.created_at)),
        Some(record.version.to_string()),
    ];
    for property in schema.properties() {
        row.push(record.data.get(&property.name).and_then(staged_value));
    }
    row
}

/// Staged rendering of one JSON value; `None` loads as SQL NULL. Booleans
/// stage as `1`/`0` to match the INTEGER column affinity.
fn staged_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some("0".to_string()),
        other => Some(other.to_string()),
    }
}

/// Runs the transactional bulk load for one routed group: an empty staging
/// clone of the target table takes the delimited file, then a single
/// `INSERT OR IGNORE ... SELECT` moves the rows across. Duplicate composite
/// keys are counted, not errors.
fn bulk_insert_group(
    handle: &ShardHandle,
    partition: &str,
    table: &str,
    column_count: usize,
    file: StagingFile,
) -> Result<ShardWrite> {
    handle.with_conn(|conn| {
        let staging = format!("staging_{table}_{}", BULK_SEQ.fetch_add(1, Ordering::Relaxed));
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE TEMPORARY TABLE \"{staging}\" AS SELECT * FROM \"{table}\" LIMIT 0"
        ))?;
        let staged = engine::bulk_load_delimited(&tx, &staging, file.path(), column_count)?;
        let inserted = tx.execute(
            &format!("INSERT OR IGNORE INTO \"{table}\" SELECT * FROM \"{staging}\""),
            [],
        )?;
        tx.execute_batch(&format!("DROP TABLE \"{staging}\""))?;
        tx.commit()?;
        debug!(partition, staged, inserted, "bulk group committed");
        Ok(ShardWrite {
            partition: partition.to_string(),
            staged,
            inserted,
            deduplicated: staged.saturating_sub(inserted),
        })
    })
}

fn lookup_by_id(
    handle: &ShardHandle,
    schema: &TableSchema,
    id: Uuid,
) -> Result<Option<DataRecord>> {
    handle.with_conn(|conn| {
        if !engine::table_exists(conn, schema.table_name())? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT * FROM \"{}\" WHERE \"id\" = ? LIMIT 1",
            schema.table_name()
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_record(schema, row)?)),
            None => Ok(None),
        }
    })
}

fn run_shard_query(
    handle: &ShardHandle,
    schema: &TableSchema,
    select: SqlStatement,
    count: SqlStatement,
) -> Result<(u64, Vec<DataRecord>)> {
    handle.with_conn(|conn| {
        if !engine::table_exists(conn, schema.table_name())? {
            return Ok((0, Vec::new()));
        }
        let total: i64 = conn.query_row(&count.sql, params_from_iter(count.params), |row| {
            row.get(0)
        })?;
        let mut stmt = conn.prepare(&select.sql)?;
        let mut rows = stmt.query(params_from_iter(select.params))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_record(schema, row)?);
        }
        Ok((total as u64, records))
    })
}

fn run_shard_count(handle: &ShardHandle, table: &str, count: SqlStatement) -> Result<u64> {
    handle.with_conn(|conn| {
        if !engine::table_exists(conn, table)? {
            return Ok(0);
        }
        let total: i64 = conn.query_row(&count.sql, params_from_iter(count.params), |row| {
            row.get(0)
        })?;
        Ok(total as u64)
    })
}

/// Maps one row back to a [`DataRecord`]. Column order follows the schema:
/// reserved columns first, then properties. NULL properties are left out of
/// the data map.
pub(crate) fn row_to_record(schema: &TableSchema, row: &rusqlite::Row<'_>) -> Result<DataRecord> {
    let raw_id: String = row.get(0)?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|_| TimeshardError::MalformedRecord(format!("invalid id '{raw_id}'")))?;
    let raw_created: String = row.get(1)?;
    let created_at = parse_stored_timestamp(&raw_created).ok_or_else(|| {
        TimeshardError::MalformedRecord(format!("invalid created_at '{raw_created}'"))
    })?;
    let version: i64 = row.get(2)?;
    let mut data = Map::new();
    for (offset, property) in schema.properties().iter().enumerate() {
        let value = column_to_json(row.get_ref(3 + offset)?, property.column_type);
        if !value.is_null() {
            data.insert(property.name.clone(), value);
        }
    }
    let record = DataRecord {
        id,
        created_at,
        version,
        data,
        composite_key: None,
    };
    Ok(record.with_composite_key(schema))
}

fn column_to_json(value: ValueRef<'_>, column_type: ColumnType) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => match column_type {
            ColumnType::Boolean => Value::Bool(i != 0),
            _ => Value::from(i),
        },
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
