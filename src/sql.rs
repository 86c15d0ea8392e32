//! SQLite-dialect statement generation for validated query requests.

use crate::query::{Filter, FilterOp, QueryRequest, Sort, SortDirection};
use crate::record::{DataRecord, format_stored_timestamp};
use crate::schema::TableSchema;
use crate::{Result, TimeshardError};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// A parameterized statement ready for the engine.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Builds parameterized SELECT/COUNT/INSERT statements against one schema,
/// rejecting filter and sort fields the schema does not declare.
pub struct SqlBuilder<'a> {
    schema: &'a TableSchema,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema }
    }

    /// SELECT honoring filters, sort, and pagination.
    pub fn select(&self, request: &QueryRequest) -> Result<SqlStatement> {
        let mut stmt = self.select_unpaginated(request)?;
        if let Some(pagination) = request.pagination {
            stmt.sql.push_str(" LIMIT ? OFFSET ?");
            stmt.params.push(SqlValue::Integer(pagination.size as i64));
            stmt.params
                .push(SqlValue::Integer(pagination.offset() as i64));
        }
        Ok(stmt)
    }

    /// SELECT honoring filters and sort only; streaming applies its own cap.
    pub fn select_unpaginated(&self, request: &QueryRequest) -> Result<SqlStatement> {
        let (clause, params) = self.where_clause(&request.filters)?;
        let mut sql = format!("SELECT * FROM \"{}\"{clause}", self.schema.table_name());
        sql.push_str(&self.order_clause(&request.sort)?);
        Ok(SqlStatement { sql, params })
    }

    /// COUNT(*) honoring filters.
    pub fn count(&self, request: &QueryRequest) -> Result<SqlStatement> {
        let (clause, params) = self.where_clause(&request.filters)?;
        Ok(SqlStatement {
            sql: format!(
                "SELECT COUNT(*) FROM \"{}\"{clause}",
                self.schema.table_name()
            ),
            params,
        })
    }

    /// Parameterized single-row INSERT in schema column order.
    pub fn insert_record(&self, record: &DataRecord) -> SqlStatement {
        let mut columns = vec!["\"id\"", "\"created_at\"", "\"version\""]
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut params = vec![
            SqlValue::Text(record.id.to_string()),
            SqlValue::Text(format_stored_timestamp(record.created_at)),
            SqlValue::Integer(record.version),
        ];
        for property in self.schema.properties() {
            columns.push(format!("\"{}\"", property.name));
            params.push(match record.data.get(&property.name) {
                Some(value) => to_sql_value(value),
                None => SqlValue::Null,
            });
        }
        let placeholders = vec!["?"; params.len()].join(", ");
        SqlStatement {
            sql: format!(
                "INSERT INTO \"{}\" ({}) VALUES ({})",
                self.schema.table_name(),
                columns.join(", "),
                placeholders
            ),
            params,
        }
    }

    fn where_clause(&self, filters: &[Filter]) -> Result<(String, Vec<SqlValue>)> {
        if filters.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        let mut predicates = Vec::with_capacity(filters.len());
        let mut params = Vec::new();
        for filter in filters {
            self.check_field("filter", &filter.field)?;
            let column = format!("\"{}\"", filter.field);
            match filter.op {
                FilterOp::Eq => push_comparison(&mut predicates, &mut params, &column, "=", filter),
                FilterOp::Ne => {
                    push_comparison(&mut predicates, &mut params, &column, "!=", filter)
                }
                FilterOp::Gt => push_comparison(&mut predicates, &mut params, &column, ">", filter),
                FilterOp::Gte => {
                    push_comparison(&mut predicates, &mut params, &column, ">=", filter)
                }
                FilterOp::Lt => push_comparison(&mut predicates, &mut params, &column, "<", filter),
                FilterOp::Lte => {
                    push_comparison(&mut predicates, &mut params, &column, "<=", filter)
                }
                FilterOp::In => {
                    let values = match &filter.value {
                        Value::Array(values) => values.as_slice(),
                        single => std::slice::from_ref(single),
                    };
                    if values.is_empty() {
                        // An empty IN list matches nothing.
                        predicates.push("1 = 0".to_string());
                    } else {
                        let placeholders = vec!["?"; values.len()].join(", ");
                        predicates.push(format!("{column} IN ({placeholders})"));
                        params.extend(values.iter().map(to_sql_value));
                    }
                }
                FilterOp::Like => {
                    predicates.push(format!("{column} LIKE ?"));
                    params.push(to_sql_value(&filter.value));
                }
                FilterOp::ILike => {
                    predicates.push(format!("{column} LIKE ? COLLATE NOCASE"));
                    params.push(to_sql_value(&filter.value));
                }
                FilterOp::IsNull => predicates.push(format!("{column} IS NULL")),
                FilterOp::IsNotNull => predicates.push(format!("{column} IS NOT NULL")),
            }
        }
        Ok((format!(" WHERE {}", predicates.join(" AND ")), params))
    }

    fn order_clause(&self, sort: &[Sort]) -> Result<String> {
        if sort.is_empty() {
            return Ok(String::new());
        }
        let mut keys = Vec::with_capacity(sort.len());
        for key in sort {
            self.check_field("sort", &key.field)?;
            let direction = match key.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            keys.push(format!("\"{}\" {direction}", key.field));
        }
        Ok(format!(" ORDER BY {}", keys.join(", ")))
    }

    fn check_field(&self, kind: &'static str, field: &str) -> Result<()> {
        if self.schema.has_field(field) {
            Ok(())
        } else {
            Err(TimeshardError::InvalidField {
                kind,
                field: field.to_string(),
                table: self.schema.table_name().to_string(),
            })
        }
    }
}

fn push_comparison(
    predicates: &mut Vec<String>,
    params: &mut Vec<SqlValue>,
    column: &str,
    op: &str,
    filter: &Filter,
) {
    predicates.push(format!("{column} {op} ?"));
    params.push(to_sql_value(&filter.value));
}

/// Converts a JSON value to an engine value. Booleans store as 0/1; nested
/// structures as their JSON text.
pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Pagination;
    use crate::schema::ColumnType;

    fn schema() -> TableSchema {
        TableSchema::builder("events")
            .required_property("ts", ColumnType::Timestamp)
            .property("kind", ColumnType::Text)
            .property("size", ColumnType::Integer)
            .primary_key(["ts", "kind"])
            .build()
            .unwrap()
    }

    #[test]
    fn select_renders_filters_sort_and_pagination() {
        let schema = schema();
        let request = QueryRequest::new()
            .with_filter(Filter::gte("ts", "2024-01-01"))
            .with_filter(Filter::eq("kind", "meter"))
            .with_sort(Sort::desc("ts"))
            .with_pagination(Pagination::new(3, 25));
        let stmt = SqlBuilder::new(&schema).select(&request).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"events\" WHERE \"ts\" >= ? AND \"kind\" = ? \
             ORDER BY \"ts\" DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(stmt.params.len(), 4);
        assert_eq!(stmt.params[2], SqlValue::Integer(25));
        assert_eq!(stmt.params[3], SqlValue::Integer(50));
    }

    #[test]
    fn in_and_null_operators_render() {
        let schema = schema();
        let request = QueryRequest::new()
            .with_filter(Filter::is_in(
                "kind",
                vec![Value::from("a"), Value::from("b")],
            ))
            .with_filter(Filter::is_null("size"));
        let stmt = SqlBuilder::new(&schema).count(&request).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM \"events\" WHERE \"kind\" IN (?, ?) AND \"size\" IS NULL"
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let schema = schema();
        let request = QueryRequest::new().with_filter(Filter::is_in("kind", vec![]));
        let stmt = SqlBuilder::new(&schema).count(&request).unwrap();
        assert!(stmt.sql.ends_with("WHERE 1 = 0"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let schema = schema();
        let bad_filter = QueryRequest::new().with_filter(Filter::eq("nope", 1));
        let err = SqlBuilder::new(&schema).select(&bad_filter).unwrap_err();
        assert!(matches!(
            err,
            TimeshardError::InvalidField { kind: "filter", .. }
        ));

        let bad_sort = QueryRequest::new().with_sort(Sort::asc("nope"));
        let err = SqlBuilder::new(&schema).select(&bad_sort).unwrap_err();
        assert!(matches!(
            err,
            TimeshardError::InvalidField { kind: "sort", .. }
        ));
    }

    #[test]
    fn insert_binds_schema_order_with_null_gaps() {
        let schema = schema();
        let mut data = serde_json::Map::new();
        data.insert("ts".to_string(), Value::from("2024-01-15 00:00:00"));
        data.insert("size".to_string(), Value::from(42));
        let record = DataRecord::new(data);
        let stmt = SqlBuilder::new(&schema).insert_record(&record);
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"events\" (\"id\", \"created_at\", \"version\", \"ts\", \"kind\", \
             \"size\") VALUES (?, ?, ?, ?, ?, ?)"
        );
        assert_eq!(stmt.params[3], SqlValue::Text("2024-01-15 00:00:00".into()));
        assert_eq!(stmt.params[4], SqlValue::Null);
        assert_eq!(stmt.params[5], SqlValue::Integer(42));
    }
}
