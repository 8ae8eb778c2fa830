//! Entities and query results.

use crate::error::Error;
use crate::value::Value;
use rkyv::{Archive, Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// A hydrated item: one typed attribute per schema column.
///
/// An entity is a snapshot of a row at fetch time. Changing it does not write
/// anything back to storage.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Entity {
    /// Name of the primary key column.
    pub primary_key: String,
    /// Attributes in schema column order.
    pub attributes: Vec<(String, Value)>,
}

impl Entity {
    /// Create an entity from attributes.
    pub fn new(primary_key: impl Into<String>, attributes: Vec<(String, Value)>) -> Self {
        Self {
            primary_key: primary_key.into(),
            attributes,
        }
    }

    /// The primary key value, `Null` if the key column was not projected.
    pub fn id(&self) -> &Value {
        self.get(&self.primary_key).unwrap_or(&Value::Null)
    }

    /// Get an attribute by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    /// Column names present on this entity.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(name, _)| name.as_str())
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the entity has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Keep only the listed columns (order preserved).
    pub fn project(&self, columns: &[String]) -> Entity {
        Entity {
            primary_key: self.primary_key.clone(),
            attributes: self
                .attributes
                .iter()
                .filter(|(name, _)| columns.iter().any(|c| c == name))
                .cloned()
                .collect(),
        }
    }

    /// Render as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// Convert into a caller-defined item shape.
    ///
    /// The shape is deserialized from [`Entity::to_json`], so timestamp
    /// attributes arrive as `YYYY-MM-DD HH:MM:SS` strings.
    pub fn into_shape<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(self.to_json()).map_err(|e| Error::Shape(e.to_string()))
    }
}

/// Result of a list query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Matching items, in query order. Empty for count queries.
    pub items: Vec<Entity>,
    /// Total matches ignoring pagination, or the count for count queries.
    /// `None` when found rows were not requested.
    pub total: Option<u64>,
}

impl QueryResult {
    /// Create a result.
    pub fn new(items: Vec<Entity>, total: Option<u64>) -> Self {
        Self { items, total }
    }

    /// Result of a count query.
    pub fn count(count: u64) -> Self {
        Self {
            items: Vec::new(),
            total: Some(count),
        }
    }

    /// Primary keys of the items.
    pub fn ids(&self) -> Vec<Value> {
        self.items.iter().map(|e| e.id().clone()).collect()
    }

    /// Number of items returned.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if no items were returned.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize as SerdeDeserialize;

    fn address() -> Entity {
        Entity::new(
            "id",
            vec![
                ("id".to_string(), Value::Int(7)),
                ("order_id".to_string(), Value::Int(5)),
                ("city".to_string(), Value::String("Lisbon".into())),
                ("date_created".to_string(), Value::Timestamp(1_704_067_200_000_000)),
            ],
        )
    }

    #[test]
    fn test_entity_accessors() {
        let entity = address();
        assert_eq!(entity.id(), &Value::Int(7));
        assert_eq!(entity.get("city"), Some(&Value::String("Lisbon".into())));
        assert!(entity.get("region").is_none());
        assert_eq!(entity.columns().count(), 4);
    }

    #[test]
    fn test_entity_projection_keeps_order() {
        let projected = address().project(&["city".to_string(), "id".to_string()]);
        let columns: Vec<&str> = projected.columns().collect();
        assert_eq!(columns, vec!["id", "city"]);
    }

    #[test]
    fn test_entity_into_shape() {
        #[derive(Debug, SerdeDeserialize)]
        struct OrderAddress {
            id: i64,
            order_id: i64,
            city: String,
            date_created: String,
        }

        let shape: OrderAddress = address().into_shape().unwrap();
        assert_eq!(shape.id, 7);
        assert_eq!(shape.order_id, 5);
        assert_eq!(shape.city, "Lisbon");
        assert_eq!(shape.date_created, "2024-01-01 00:00:00");
    }

    #[test]
    fn test_into_shape_type_mismatch() {
        #[derive(Debug, SerdeDeserialize)]
        #[allow(dead_code)]
        struct Wrong {
            city: i64,
        }

        assert!(matches!(address().into_shape::<Wrong>(), Err(Error::Shape(_))));
    }
}
