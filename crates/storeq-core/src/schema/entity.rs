//! Entity schema descriptors.

use std::collections::HashSet;

use super::column::ColumnDef;
use crate::error::SchemaError;

/// Preferred column for the generic `date_query` key.
const PRIMARY_DATE_COLUMN: &str = "date_created";

/// Describes one entity type: its table, columns and cache group.
///
/// A schema is data, not code: one [`QueryEngine`](crate::QueryEngine)
/// serves any entity once given its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    /// Table name.
    pub table: String,
    /// Alias used to qualify columns in SQL (`ca.order_id`).
    pub alias: Option<String>,
    /// Name for a single item (`order_address`).
    pub item_name: String,
    /// Name for a group of items (`order_addresses`).
    pub item_name_plural: String,
    /// Cache namespace for queries and items of this type.
    pub cache_group: String,
    /// Primary key column name.
    pub primary_key: String,
    /// Column definitions in table order.
    pub columns: Vec<ColumnDef>,
}

impl EntitySchema {
    /// Create a schema. Item names and the cache group default to the table name.
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            alias: None,
            item_name: table.clone(),
            item_name_plural: table.clone(),
            cache_group: table.clone(),
            table,
            primary_key: primary_key.into(),
            columns: Vec::new(),
        }
    }

    /// Set the table alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the singular and plural item names.
    ///
    /// A cache group that was never set explicitly follows the plural name.
    pub fn with_item_names(mut self, singular: impl Into<String>, plural: impl Into<String>) -> Self {
        let plural = plural.into();
        if self.cache_group == self.item_name_plural {
            self.cache_group = plural.clone();
        }
        self.item_name = singular.into();
        self.item_name_plural = plural;
        self
    }

    /// Set the cache group.
    pub fn with_cache_group(mut self, group: impl Into<String>) -> Self {
        self.cache_group = group.into();
        self
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Add multiple columns.
    pub fn with_columns(mut self, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns.extend(columns);
        self
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check if a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// The primary key column definition.
    pub fn primary_column(&self) -> Option<&ColumnDef> {
        self.column(&self.primary_key)
    }

    /// Columns included in free-text search.
    pub fn searchable_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.searchable)
    }

    /// Datetime columns.
    pub fn date_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.column_type.is_datetime())
    }

    /// Default column for the generic `date_query` key.
    pub fn primary_date_column(&self) -> Option<&ColumnDef> {
        self.column(PRIMARY_DATE_COLUMN)
            .filter(|c| c.column_type.is_datetime())
            .or_else(|| self.date_columns().next())
    }

    /// Check the descriptor is usable.
    ///
    /// Identifiers are restricted to `[A-Za-z0-9_]` because they are spliced
    /// into SQL text; only values travel as bound parameters.
    pub fn validate(&self) -> Result<(), SchemaError> {
        check_identifier(&self.table)?;
        if let Some(alias) = &self.alias {
            check_identifier(alias)?;
        }
        if self.columns.is_empty() {
            return Err(SchemaError::NoColumns(self.table.clone()));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            check_identifier(&column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
        }

        if !self.has_column(&self.primary_key) {
            return Err(SchemaError::MissingPrimaryKey(self.primary_key.clone()));
        }

        Ok(())
    }
}

fn check_identifier(name: &str) -> Result<(), SchemaError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(name.to_string()))
    }
}
