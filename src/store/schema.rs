//! Table schema descriptors
//!
//! A [`TableSchema`] declares a table's columns along with the
//! synthetic behavior the store injects around them: UUID generation
//! for the id column, created/updated stamping, JSON codec columns,
//! and insert defaults. Schemas are plain values built with a fluent
//! declaration, applied to a storage engine at startup.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// Current UTC time as an ISO-8601 string, the stored timestamp form
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A fresh random identifier in canonical UUID form
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Free-form text
    Text,
    /// 64-bit integer
    Integer,
    /// Boolean, stored as an integer by SQL engines
    Boolean,
    /// Structured JSON, stored as text and (de)coded by the store
    Json,
    /// ISO-8601 UTC timestamp, stored as text
    Timestamp,
}

/// Shape of the id column, used to classify caller-supplied keys
///
/// A key that matches the id shape targets the id column; anything
/// else is treated as a unique-name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdShape {
    /// Only syntactically valid UUIDs are ids
    Uuid,
    /// Only parseable integers are ids
    Integer,
    /// Any string is accepted as an id
    Any,
}

/// A single column declaration
#[derive(Debug, Clone)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    /// Injected on insert when the column is absent from the values
    pub default: Option<Value>,
}

impl Column {
    fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: None,
        }
    }

    /// Declare a text column
    pub fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    /// Declare an integer column
    pub fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    /// Declare a boolean column
    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    /// Declare a JSON column
    pub fn json(name: &'static str) -> Self {
        Self::new(name, ColumnType::Json)
    }

    /// Declare a timestamp column
    pub fn timestamp(name: &'static str) -> Self {
        Self::new(name, ColumnType::Timestamp)
    }

    /// Mark the column nullable
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the insert default
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Schema declaration for one table
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: Vec<Column>,
    pub id_column: Option<&'static str>,
    pub id_shape: IdShape,
    /// Generate a UUID on insert when the id is absent
    pub generate_id: bool,
    pub name_column: Option<&'static str>,
    pub created_column: Option<&'static str>,
    pub updated_column: Option<&'static str>,
}

impl TableSchema {
    /// Start a schema declaration for `table`
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            columns: Vec::new(),
            id_column: None,
            id_shape: IdShape::Any,
            generate_id: false,
            name_column: None,
            created_column: None,
            updated_column: None,
        }
    }

    /// Declare a UUID-generated primary id column
    pub fn id_uuid(mut self, name: &'static str) -> Self {
        self.columns.push(Column::text(name));
        self.id_column = Some(name);
        self.id_shape = IdShape::Uuid;
        self.generate_id = true;
        self
    }

    /// Declare an integer primary id column (caller-assigned)
    pub fn id_integer(mut self, name: &'static str) -> Self {
        self.columns.push(Column::integer(name));
        self.id_column = Some(name);
        self.id_shape = IdShape::Integer;
        self.generate_id = false;
        self
    }

    /// Declare the unique human-readable name column
    pub fn unique_name(mut self, name: &'static str) -> Self {
        self.columns.push(Column::text(name));
        self.name_column = Some(name);
        self
    }

    /// Add a column
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Declare `created` and `updated` stamp columns
    pub fn timestamps(mut self) -> Self {
        self.columns.push(Column::timestamp("created"));
        self.columns.push(Column::timestamp("updated"));
        self.created_column = Some("created");
        self.updated_column = Some("updated");
        self
    }

    /// Look up a column declaration by name
    pub fn column_def(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `name` is a JSON-coded column
    pub fn is_json(&self, name: &str) -> bool {
        matches!(
            self.column_def(name),
            Some(Column {
                ty: ColumnType::Json,
                ..
            })
        )
    }

    /// Classify a caller-supplied key: does it target the id column?
    ///
    /// UUID-shaped ids accept only syntactically valid UUIDs, integer
    /// ids only parseable integers; any other id shape accepts any
    /// string.
    pub fn is_id(&self, value: &str) -> bool {
        if self.id_column.is_none() {
            return false;
        }
        match self.id_shape {
            IdShape::Uuid => uuid::Uuid::parse_str(value).is_ok(),
            IdShape::Integer => value.parse::<i64>().is_ok(),
            IdShape::Any => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> TableSchema {
        TableSchema::new("widget")
            .id_uuid("id")
            .unique_name("name")
            .column(Column::json("payload").nullable())
            .column(Column::integer("weight").default_value(0))
            .timestamps()
    }

    #[test]
    fn test_is_id_uuid_shape() {
        let schema = sample_schema();
        assert!(schema.is_id("0b2e52fa-4051-4b29-9d1c-2d4fd2f3fdbc"));
        assert!(!schema.is_id("my-widget"));
        assert!(!schema.is_id("42"));
    }

    #[test]
    fn test_is_id_integer_shape() {
        let schema = TableSchema::new("seq").id_integer("id");
        assert!(schema.is_id("42"));
        assert!(!schema.is_id("0b2e52fa-4051-4b29-9d1c-2d4fd2f3fdbc"));
    }

    #[test]
    fn test_column_lookup() {
        let schema = sample_schema();
        assert!(schema.is_json("payload"));
        assert!(!schema.is_json("name"));
        assert_eq!(
            schema.column_def("weight").unwrap().default,
            Some(serde_json::json!(0))
        );
    }

    #[test]
    fn test_timestamps_declared() {
        let schema = sample_schema();
        assert_eq!(schema.created_column, Some("created"));
        assert_eq!(schema.updated_column, Some("updated"));
    }

    #[test]
    fn test_now_is_utc_iso8601() {
        let stamp = now();
        assert!(stamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }
}
