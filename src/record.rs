//! Data records and the routing-timestamp rules that assign them to
//! partitions.

use crate::schema::TableSchema;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Textual layouts accepted for routing values, tried in order; anything
/// else falls back to "now". RFC 3339 strings are accepted after these.
pub const ACCEPTED_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// A stored record: surrogate id, bookkeeping columns, and the schema-keyed
/// data map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub version: i64,
    pub data: Map<String, Value>,
    /// Derived from the schema's primary-key fields; `None` when the schema
    /// declares none.
    pub composite_key: Option<String>,
}

impl DataRecord {
    /// New record with a fresh id, version 1, and `created_at` = now.
    pub fn new(data: Map<String, Value>) -> Self {
        Self::with_id(Uuid::new_v4(), data)
    }

    pub fn with_id(id: Uuid, data: Map<String, Value>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            version: 1,
            data,
            composite_key: None,
        }
    }

    /// Fills in the composite key from the schema's primary-key fields.
    pub fn with_composite_key(mut self, schema: &TableSchema) -> Self {
        self.composite_key = schema.composite_key_for(&self.data);
        self
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

/// Outcome of routing one record: either the partition column parsed, or a
/// fallback instant was assigned. Kept explicit so callers and tests can
/// tell the paths apart instead of scraping logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedTimestamp {
    /// The partition column held a parseable timestamp.
    Parsed(DateTime<Utc>),
    /// The partition column was absent or null; `assigned` is the injected
    /// "now".
    MissingColumn { assigned: DateTime<Utc> },
    /// The partition column held a value no accepted layout matched.
    Unparseable {
        raw: String,
        assigned: DateTime<Utc>,
    },
}

impl RoutedTimestamp {
    /// The instant actually used for partition assignment.
    pub fn effective(&self) -> DateTime<Utc> {
        match self {
            RoutedTimestamp::Parsed(ts) => *ts,
            RoutedTimestamp::MissingColumn { assigned }
            | RoutedTimestamp::Unparseable { assigned, .. } => *assigned,
        }
    }

    pub fn used_fallback(&self) -> bool {
        !matches!(self, RoutedTimestamp::Parsed(_))
    }
}

/// Routes a record's data map through the accepted-layout cascade.
///
/// `now` is injected rather than read from the clock so the fallback path is
/// deterministic under test.
pub fn route_timestamp(
    data: &Map<String, Value>,
    column: &str,
    now: DateTime<Utc>,
) -> RoutedTimestamp {
    match data.get(column) {
        None | Some(Value::Null) => RoutedTimestamp::MissingColumn { assigned: now },
        Some(Value::String(raw)) => match parse_routing_timestamp(raw) {
            Some(ts) => RoutedTimestamp::Parsed(ts),
            None => RoutedTimestamp::Unparseable {
                raw: raw.clone(),
                assigned: now,
            },
        },
        Some(other) => RoutedTimestamp::Unparseable {
            raw: other.to_string(),
            assigned: now,
        },
    }
}

/// Parses a routing value against [`ACCEPTED_TIMESTAMP_FORMATS`], then
/// RFC 3339. Values without an offset are taken as UTC.
pub fn parse_routing_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    for format in ACCEPTED_TIMESTAMP_FORMATS {
        let parsed = if format == "%Y-%m-%d" {
            NaiveDate::parse_from_str(raw, format)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        } else {
            NaiveDateTime::parse_from_str(raw, format).ok()
        };
        if let Some(dt) = parsed {
            return Some(dt.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Render for generated `created_at` values. Space-separated with a
/// microsecond fraction so lexicographic comparison against the accepted
/// filter layouts stays correct.
pub(crate) fn format_stored_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Parses stored `created_at` text, accepting an optional second fraction
/// before falling back to the routing cascade for migrated legacy values.
pub(crate) fn parse_stored_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
        .or_else(|| parse_routing_timestamp(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn map_with(column: &str, value: Value) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(column.to_string(), value);
        data
    }

    #[test]
    fn every_accepted_layout_parses() {
        for raw in [
            "2024-01-15 10:30:00",
            "2024-01-15",
            "2024-01-15T10:30:00",
            "2024-01-15T10:30:00.250",
            "2024-01-15T10:30:00Z",
            "2024-01-15T10:30:00+02:00",
        ] {
            assert!(parse_routing_timestamp(raw).is_some(), "{raw} should parse");
        }
    }

    #[test]
    fn offsets_normalize_to_utc() {
        let parsed = parse_routing_timestamp("2024-01-15T01:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 14, 23, 0, 0).unwrap());
    }

    #[test]
    fn missing_column_falls_back_to_injected_now() {
        let routed = route_timestamp(&Map::new(), "ts", now());
        assert_eq!(routed, RoutedTimestamp::MissingColumn { assigned: now() });
        assert_eq!(routed.effective(), now());
        assert!(routed.used_fallback());
    }

    #[test]
    fn garbage_and_non_string_values_fall_back() {
        let garbage = route_timestamp(&map_with("ts", Value::String("soon".into())), "ts", now());
        assert!(matches!(
            garbage,
            RoutedTimestamp::Unparseable { ref raw, .. } if raw == "soon"
        ));

        let number = route_timestamp(&map_with("ts", Value::from(1705312800)), "ts", now());
        assert!(number.used_fallback());

        let null = route_timestamp(&map_with("ts", Value::Null), "ts", now());
        assert_eq!(null, RoutedTimestamp::MissingColumn { assigned: now() });
    }

    #[test]
    fn parsed_value_wins_over_fallback() {
        let routed = route_timestamp(
            &map_with("ts", Value::String("2024-01-15 10:30:00".into())),
            "ts",
            now(),
        );
        assert_eq!(
            routed,
            RoutedTimestamp::Parsed(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
        );
        assert!(!routed.used_fallback());
    }

    #[test]
    fn stored_timestamps_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 8, 7, 6).unwrap();
        let rendered = format_stored_timestamp(ts);
        assert_eq!(parse_stored_timestamp(&rendered), Some(ts));
        assert_eq!(
            parse_stored_timestamp("2024-03-09 08:07:06"),
            Some(ts)
        );
    }
}
