//! Query engine: cached list queries and single-item access for one entity type.
//!
//! A list query is answered from the cache when its normalized key is present:
//! the cached ids are resolved through the item cache, and the ids missing from
//! it are fetched with a single `pk IN (...)` query. Otherwise the query is
//! rendered, executed and hydrated, and its ids are written back.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use storeq_proto::{Entity, Fields, QueryResult, QuerySpec, Value};
use tracing::{debug, instrument, warn};

use super::clause::{
    coerce, ClauseBuilder, OrderDirection, OrderSpec, Predicate, Projection, RenderedClause,
};
use super::hydrate::{hydrate, hydrate_projected};
use super::key::list_key;
use crate::cache::QueryCache;
use crate::config::EngineConfig;
use crate::error::{QueryError, SchemaError};
use crate::schema::EntitySchema;
use crate::storage::{RawRow, Storage};

/// Runs queries and writes for one [`EntitySchema`].
pub struct QueryEngine {
    schema: Arc<EntitySchema>,
    storage: Arc<dyn Storage>,
    cache: Arc<QueryCache>,
    config: EngineConfig,
}

impl QueryEngine {
    /// Create an engine. Fails if the schema is not usable.
    pub fn new(
        schema: impl Into<Arc<EntitySchema>>,
        storage: Arc<dyn Storage>,
        cache: Arc<QueryCache>,
        config: EngineConfig,
    ) -> Result<Self, SchemaError> {
        let schema = schema.into();
        schema.validate()?;
        Ok(Self {
            schema,
            storage,
            cache,
            config,
        })
    }

    /// The schema this engine serves.
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// The cache group of the schema.
    pub fn cache_group(&self) -> &str {
        &self.schema.cache_group
    }

    /// The shared cache layer.
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a list query.
    ///
    /// With `count` set, `items` is empty and `total` holds the count.
    #[instrument(skip(self, spec), fields(entity = %self.schema.item_name_plural))]
    pub fn query(&self, spec: &QuerySpec) -> Result<QueryResult, QueryError> {
        if spec.count {
            return Ok(QueryResult::count(self.count(spec)?));
        }

        let key = self
            .config
            .cache_enabled
            .then(|| list_key(&self.schema, &self.config, spec));

        if let Some(key) = &key {
            if let Some(result) = self.resolve_cached(key, spec)? {
                return Ok(result);
            }
        }

        let clause = self.render(spec);
        let rows = self.storage.select(&clause)?;
        let items: Vec<Entity> = rows
            .iter()
            .map(|row| hydrate_projected(&self.schema, row, &clause.projection))
            .collect();

        let total = if spec.no_found_rows == Some(false) {
            Some(self.storage.count(&clause.unpaged())?)
        } else {
            None
        };
        debug!(rows = items.len(), total = ?total, "fetched from storage");

        if let Some(key) = &key {
            let group = self.cache_group();
            let ids = items.iter().map(|e| e.id().clone()).collect();
            self.cache.set_list(group, key, ids, total, self.config.cache_ttl());
            if spec.update_cache && clause.projection.is_all() {
                for item in &items {
                    self.cache.set_item(group, item, self.config.cache_ttl());
                }
            }
        }

        Ok(QueryResult::new(items, total))
    }

    /// Count the rows matching a specification. Never hydrates rows.
    #[instrument(skip(self, spec), fields(entity = %self.schema.item_name_plural))]
    pub fn count(&self, spec: &QuerySpec) -> Result<u64, QueryError> {
        let mut spec = spec.clone();
        spec.count = true;

        let key = self
            .config
            .cache_enabled
            .then(|| list_key(&self.schema, &self.config, &spec));
        if let Some(key) = &key {
            if let Some(count) = self.cache.get_count(self.cache_group(), key) {
                debug!(count, "count served from cache");
                return Ok(count);
            }
        }

        let count = self.storage.count(&self.render(&spec))?;
        if let Some(key) = &key {
            self.cache
                .set_count(self.cache_group(), key, count, self.config.cache_ttl());
        }
        Ok(count)
    }

    /// Run a list query and convert every item into `T`.
    pub fn query_as<T: DeserializeOwned>(&self, spec: &QuerySpec) -> Result<Vec<T>, QueryError> {
        let result = self.query(spec)?;
        let mut shaped = Vec::with_capacity(result.items.len());
        for item in &result.items {
            shaped.push(item.into_shape()?);
        }
        Ok(shaped)
    }

    /// Get one item by primary key.
    #[instrument(skip(self), fields(entity = %self.schema.item_name))]
    pub fn get_item(&self, id: &Value) -> Result<Option<Entity>, QueryError> {
        let Some(id) = self.primary_key_value(id) else {
            return Ok(None);
        };

        if self.config.cache_enabled {
            if let Some(item) = self.cache.get_item(self.cache_group(), &id) {
                return Ok(Some(item));
            }
        }

        let pk = self.schema.primary_key.clone();
        let item = self.fetch_one(Predicate::Eq {
            column: pk,
            value: id,
            case_insensitive: false,
        })?;
        if let (Some(item), true) = (&item, self.config.cache_enabled) {
            self.cache
                .set_item(self.cache_group(), item, self.config.cache_ttl());
        }
        Ok(item)
    }

    /// Get the first item, by primary key, whose `column` equals `value`.
    #[instrument(skip(self, value), fields(entity = %self.schema.item_name))]
    pub fn get_item_by(&self, column: &str, value: &Value) -> Result<Option<Entity>, QueryError> {
        if column == self.schema.primary_key {
            return self.get_item(value);
        }
        let def = self
            .schema
            .column(column)
            .ok_or_else(|| QueryError::UnknownColumn(column.to_string()))?;
        let Some(value) = coerce(def, value) else {
            debug!(column = %column, value = %value, "lookup value does not fit column type");
            return Ok(None);
        };

        let item = self.fetch_one(Predicate::Eq {
            column: def.name.clone(),
            value,
            case_insensitive: def.case_insensitive,
        })?;
        if let (Some(item), true) = (&item, self.config.cache_enabled) {
            self.cache
                .set_item(self.cache_group(), item, self.config.cache_ttl());
        }
        Ok(item)
    }

    /// Insert an item. Returns its primary key.
    #[instrument(skip(self, row), fields(entity = %self.schema.item_name))]
    pub fn add_item(&self, row: RawRow) -> Result<Value, QueryError> {
        let id = self.storage.insert(&self.schema, row)?;
        self.cache.invalidate_after_write(self.cache_group(), &id);
        Ok(id)
    }

    /// Change columns of an item. Returns false if it does not exist.
    #[instrument(skip(self, changes), fields(entity = %self.schema.item_name))]
    pub fn update_item(&self, id: &Value, changes: RawRow) -> Result<bool, QueryError> {
        let Some(id) = self.primary_key_value(id) else {
            return Ok(false);
        };
        let updated = self.storage.update(&self.schema, &id, changes)?;
        if updated {
            self.cache.invalidate_after_write(self.cache_group(), &id);
        }
        Ok(updated)
    }

    /// Delete an item. Returns false if it does not exist.
    #[instrument(skip(self), fields(entity = %self.schema.item_name))]
    pub fn delete_item(&self, id: &Value) -> Result<bool, QueryError> {
        let Some(id) = self.primary_key_value(id) else {
            return Ok(false);
        };
        let deleted = self.storage.delete(&self.schema, &id)?;
        if deleted {
            self.cache.invalidate_after_write(self.cache_group(), &id);
        }
        Ok(deleted)
    }

    /// Drop everything cached for this entity type.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_group(self.cache_group());
    }

    fn render(&self, spec: &QuerySpec) -> RenderedClause {
        let clause = ClauseBuilder::new(&self.schema)
            .with_config(&self.config)
            .render(spec);
        for diagnostic in &clause.diagnostics {
            warn!(error = %diagnostic, "dropped query input");
        }
        clause
    }

    /// Answer a list query from the cache. None means the query must run.
    fn resolve_cached(&self, key: &str, spec: &QuerySpec) -> Result<Option<QueryResult>, QueryError> {
        let group = self.cache_group();
        let Some((ids, total)) = self.cache.get_list(group, key) else {
            return Ok(None);
        };

        let pk = &self.schema.primary_key;
        if spec.fields == Fields::Ids {
            let items = ids
                .into_iter()
                .map(|id| Entity::new(pk.clone(), vec![(pk.clone(), id)]))
                .collect();
            return Ok(Some(QueryResult::new(items, total)));
        }

        let mut found: Vec<Option<Entity>> = ids
            .iter()
            .map(|id| self.cache.get_item(group, id))
            .collect();
        let missing: Vec<Value> = ids
            .iter()
            .zip(&found)
            .filter(|(_, item)| item.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        if !missing.is_empty() {
            debug!(missing = missing.len(), "fetching items absent from the item cache");
            let mut clause = RenderedClause::scan(&self.schema);
            clause.predicates.push(Predicate::In {
                column: pk.clone(),
                values: missing,
                case_insensitive: false,
            });
            let fetched: Vec<Entity> = self
                .storage
                .select(&clause)?
                .iter()
                .map(|row| hydrate(&self.schema, row))
                .collect();

            for item in &fetched {
                self.cache.set_item(group, item, self.config.cache_ttl());
            }
            for (id, slot) in ids.iter().zip(found.iter_mut()) {
                if slot.is_none() {
                    *slot = fetched.iter().find(|item| item.id() == id).cloned();
                }
            }
        }

        let Some(items) = found.into_iter().collect::<Option<Vec<Entity>>>() else {
            debug!("cached list refers to a missing item, re-running query");
            return Ok(None);
        };

        let items = match ClauseBuilder::new(&self.schema).projection(&spec.fields) {
            Projection::All => items,
            Projection::Columns(columns) => items.iter().map(|item| item.project(&columns)).collect(),
        };
        debug!(items = items.len(), "list served from cache");
        Ok(Some(QueryResult::new(items, total)))
    }

    fn fetch_one(&self, predicate: Predicate) -> Result<Option<Entity>, QueryError> {
        let mut clause = RenderedClause::scan(&self.schema);
        clause.predicates.push(predicate);
        clause.order_by = vec![OrderSpec {
            column: self.schema.primary_key.clone(),
            direction: OrderDirection::Asc,
        }];
        clause.limit = Some(1);

        let rows = self.storage.select(&clause)?;
        Ok(rows.first().map(|row| hydrate(&self.schema, row)))
    }

    fn primary_key_value(&self, id: &Value) -> Option<Value> {
        match self.schema.primary_column() {
            Some(column) => coerce(column, id),
            None => Some(id.clone()),
        }
    }
}
