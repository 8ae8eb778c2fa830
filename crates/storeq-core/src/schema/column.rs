//! Column definitions for entity schemas.

use storeq_proto::Value;

/// Semantic column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Signed integer (ids, foreign keys, counters).
    Integer,
    /// Floating point / decimal amounts.
    Float,
    /// Boolean stored as 0/1.
    Bool,
    /// UTF-8 text.
    Text,
    /// Datetime stored as `YYYY-MM-DD HH:MM:SS`.
    DateTime,
}

impl ColumnType {
    /// Check if this type compares numerically.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float | ColumnType::Bool)
    }

    /// Check if this is a datetime type.
    pub fn is_datetime(&self) -> bool {
        matches!(self, ColumnType::DateTime)
    }

    /// SQLite storage class used when creating tables.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Bool => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Text | ColumnType::DateTime => "TEXT",
        }
    }
}

/// A column within an entity schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub column_type: ColumnType,
    /// Included in free-text search.
    pub searchable: bool,
    /// Allowed in `orderby`.
    pub sortable: bool,
    /// Exact matches ignore case.
    pub case_insensitive: bool,
    /// Value used when a row lacks this column.
    pub default: Option<Value>,
}

impl ColumnDef {
    /// Create a column that is neither searchable nor sortable.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            searchable: false,
            sortable: false,
            case_insensitive: false,
            default: None,
        }
    }

    /// Integer column.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    /// Float column.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Float)
    }

    /// Boolean column.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Bool)
    }

    /// Text column.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    /// Datetime column.
    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::DateTime)
    }

    /// Mark as searchable.
    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    /// Mark as sortable.
    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Compare exact matches case-insensitively.
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Check if the column compares numerically.
    pub fn is_numeric(&self) -> bool {
        self.column_type.is_numeric()
    }

    /// Value to use when the column is missing or unreadable.
    pub fn fallback(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}
