//! Typed table schemas: column types, properties, composite keys, and the
//! validating builder every schema must pass through.

use crate::{Result, TimeshardError};
use serde::Deserialize;
use serde_json::Value;

/// Bookkeeping columns present on every table, ahead of schema properties.
pub const RESERVED_COLUMNS: [&str; 3] = ["id", "created_at", "version"];

/// Storage type of a schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Timestamp,
}

impl ColumnType {
    /// Declared SQL type. Timestamps are stored as ISO-8601 text so range
    /// comparisons stay lexicographic; booleans as 0/1 integers.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Timestamp => "TEXT",
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }
}

/// One typed, possibly-required column of a table schema.
#[derive(Debug, Clone, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
}

/// Untyped-on-disk form of a schema, deserialized from JSON and promoted to
/// a [`TableSchema`] through the validating builder.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    pub properties: Vec<Property>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

/// A validated table schema.
///
/// Instances only exist via [`TableSchema::builder`] or
/// [`TableSchema::from_descriptor`], so every schema in circulation has
/// passed identifier and primary-key validation.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    description: Option<String>,
    table_name: String,
    properties: Vec<Property>,
    primary_key: Vec<String>,
}

impl TableSchema {
    pub fn builder(name: impl Into<String>) -> TableSchemaBuilder {
        TableSchemaBuilder {
            name: name.into(),
            description: None,
            table_name: None,
            properties: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Promotes a deserialized descriptor, applying full validation.
    pub fn from_descriptor(descriptor: SchemaDescriptor) -> Result<Self> {
        let mut builder = Self::builder(descriptor.name);
        if let Some(description) = descriptor.description {
            builder = builder.description(description);
        }
        if let Some(table_name) = descriptor.table_name {
            builder = builder.table_name(table_name);
        }
        for property in descriptor.properties {
            builder = if property.required {
                builder.required_property(property.name, property.column_type)
            } else {
                builder.property(property.name, property.column_type)
            };
        }
        builder.primary_key(descriptor.primary_key).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// True when `field` names a property or a reserved column; the query
    /// builder rejects everything else.
    pub fn has_field(&self, field: &str) -> bool {
        RESERVED_COLUMNS.contains(&field) || self.properties.iter().any(|p| p.name == field)
    }

    /// Full column list in table order: reserved columns then properties.
    pub fn column_names(&self) -> Vec<&str> {
        RESERVED_COLUMNS
            .iter()
            .copied()
            .chain(self.properties.iter().map(|p| p.name.as_str()))
            .collect()
    }

    /// Composite key for a record's data map, or `None` without a declared
    /// primary key. Values are rendered in declaration order and joined with
    /// `|`; missing fields render empty.
    pub fn composite_key_for(&self, data: &serde_json::Map<String, Value>) -> Option<String> {
        if self.primary_key.is_empty() {
            return None;
        }
        let rendered: Vec<String> = self
            .primary_key
            .iter()
            .map(|field| match data.get(field) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        Some(rendered.join("|"))
    }

    /// Idempotent CREATE TABLE statement for this schema.
    pub fn create_table_sql(&self) -> String {
        let mut columns = vec![
            "\"id\" TEXT PRIMARY KEY".to_string(),
            "\"created_at\" TEXT NOT NULL".to_string(),
            "\"version\" INTEGER NOT NULL DEFAULT 1".to_string(),
        ];
        for property in &self.properties {
            let not_null = if property.required { " NOT NULL" } else { "" };
            columns.push(format!(
                "\"{}\" {}{not_null}",
                property.name,
                property.column_type.sql_type()
            ));
        }
        if !self.primary_key.is_empty() {
            let quoted: Vec<String> = self
                .primary_key
                .iter()
                .map(|f| format!("\"{f}\""))
                .collect();
            columns.push(format!("UNIQUE ({})", quoted.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            self.table_name,
            columns.join(", ")
        )
    }

    /// Idempotent secondary-index statements. `id` and the composite key are
    /// already indexed by their constraints; `created_at` and the routing
    /// column get explicit indexes.
    pub fn index_statements(&self, partition_column: &str) -> Vec<String> {
        let mut statements = vec![format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{0}_created_at\" ON \"{0}\" (\"created_at\")",
            self.table_name
        )];
        if partition_column != "created_at" && self.has_field(partition_column) {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{0}_{1}\" ON \"{0}\" (\"{1}\")",
                self.table_name, partition_column
            ));
        }
        statements
    }
}

/// Builder for [`TableSchema`]; all validation happens in [`build`](Self::build).
pub struct TableSchemaBuilder {
    name: String,
    description: Option<String>,
    table_name: Option<String>,
    properties: Vec<Property>,
    primary_key: Vec<String>,
}

impl TableSchemaBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Overrides the table name; defaults to the schema name.
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Adds an optional (nullable) property.
    pub fn property(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.properties.push(Property {
            name: name.into(),
            column_type,
            required: false,
        });
        self
    }

    /// Adds a required (NOT NULL) property.
    pub fn required_property(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.properties.push(Property {
            name: name.into(),
            column_type,
            required: true,
        });
        self
    }

    /// Declares the composite primary key; every field must name a property.
    pub fn primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<TableSchema> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(TimeshardError::InvalidSchema(
                "schema name must not be empty".to_string(),
            ));
        }
        let table_name = self.table_name.unwrap_or_else(|| name.clone());
        validate_identifier("table name", &table_name)?;
        if self.properties.is_empty() {
            return Err(TimeshardError::InvalidSchema(format!(
                "schema '{name}' declares no properties"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for property in &self.properties {
            validate_identifier("property", &property.name)?;
            let lowered = property.name.to_ascii_lowercase();
            if RESERVED_COLUMNS.contains(&lowered.as_str()) {
                return Err(TimeshardError::InvalidSchema(format!(
                    "property '{}' collides with a reserved column",
                    property.name
                )));
            }
            if !seen.insert(lowered) {
                return Err(TimeshardError::InvalidSchema(format!(
                    "duplicate property '{}'",
                    property.name
                )));
            }
        }
        for field in &self.primary_key {
            if !self.properties.iter().any(|p| &p.name == field) {
                return Err(TimeshardError::InvalidSchema(format!(
                    "primary key field '{field}' is not a declared property"
                )));
            }
        }
        Ok(TableSchema {
            name,
            description: self.description,
            table_name,
            properties: self.properties,
            primary_key: self.primary_key,
        })
    }
}

/// Identifiers reach SQL text verbatim (quoted), so the accepted alphabet is
/// restricted to `[A-Za-z_][A-Za-z0-9_]*`.
fn validate_identifier(kind: &str, identifier: &str) -> Result<()> {
    let mut chars = identifier.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(TimeshardError::InvalidSchema(format!(
            "invalid {kind} identifier '{identifier}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableSchema {
        TableSchema::builder("well_production")
            .description("Monthly production volumes per well")
            .required_property("well_id", ColumnType::Text)
            .required_property("production_period", ColumnType::Timestamp)
            .property("oil_volume", ColumnType::Real)
            .property("active", ColumnType::Boolean)
            .primary_key(["well_id", "production_period"])
            .build()
            .unwrap()
    }

    #[test]
    fn builder_produces_table_order_and_ddl() {
        let schema = sample();
        assert_eq!(schema.table_name(), "well_production");
        assert_eq!(
            schema.column_names(),
            vec![
                "id",
                "created_at",
                "version",
                "well_id",
                "production_period",
                "oil_volume",
                "active"
            ]
        );
        let ddl = schema.create_table_sql();
        assert!(ddl.contains("\"id\" TEXT PRIMARY KEY"));
        assert!(ddl.contains("\"well_id\" TEXT NOT NULL"));
        assert!(ddl.contains("\"oil_volume\" REAL"));
        assert!(ddl.contains("UNIQUE (\"well_id\", \"production_period\")"));
    }

    #[test]
    fn index_statements_skip_duplicate_created_at() {
        let schema = sample();
        assert_eq!(schema.index_statements("created_at").len(), 1);
        let stmts = schema.index_statements("production_period");
        assert_eq!(stmts.len(), 2);
        assert!(stmts[1].contains("idx_well_production_production_period"));
    }

    #[test]
    fn composite_key_joins_declared_fields() {
        let schema = sample();
        let mut data = serde_json::Map::new();
        data.insert("well_id".to_string(), Value::String("W-007".to_string()));
        data.insert(
            "production_period".to_string(),
            Value::String("2024-01-01".to_string()),
        );
        assert_eq!(
            schema.composite_key_for(&data).as_deref(),
            Some("W-007|2024-01-01")
        );
        data.remove("production_period");
        assert_eq!(schema.composite_key_for(&data).as_deref(), Some("W-007|"));
    }

    #[test]
    fn build_rejects_bad_input() {
        let reserved = TableSchema::builder("x")
            .property("id", ColumnType::Text)
            .build();
        assert!(matches!(reserved, Err(TimeshardError::InvalidSchema(_))));

        let duplicate = TableSchema::builder("x")
            .property("a", ColumnType::Text)
            .property("A", ColumnType::Text)
            .build();
        assert!(matches!(duplicate, Err(TimeshardError::InvalidSchema(_))));

        let missing_pk = TableSchema::builder("x")
            .property("a", ColumnType::Text)
            .primary_key(["b"])
            .build();
        assert!(matches!(missing_pk, Err(TimeshardError::InvalidSchema(_))));

        let bad_ident = TableSchema::builder("x")
            .property("drop table;--", ColumnType::Text)
            .build();
        assert!(matches!(bad_ident, Err(TimeshardError::InvalidSchema(_))));
    }

    #[test]
    fn descriptor_round_trips_through_validation() {
        let json = r#"{
            "name": "well_production",
            "properties": [
                {"name": "well_id", "type": "text", "required": true},
                {"name": "production_period", "type": "timestamp", "required": true},
                {"name": "oil_volume", "type": "real"}
            ],
            "primary_key": ["well_id", "production_period"]
        }"#;
        let descriptor: SchemaDescriptor = serde_json::from_str(json).unwrap();
        let schema = TableSchema::from_descriptor(descriptor).unwrap();
        assert!(schema.has_primary_key());
        assert!(schema.has_field("oil_volume"));
        assert!(!schema.has_field("unknown"));
    }
}
