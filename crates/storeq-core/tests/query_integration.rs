//! Integration tests for the query engine over SQLite.

use std::sync::Arc;
use std::thread;

use storeq_core::proto::{Fields, QuerySpec, Value};
use storeq_core::{
    ColumnDef, EngineConfig, EntitySchema, MemoryStorage, QueryCache, QueryEngine, RawRow,
    SqliteConfig, SqliteStorage, Storage,
};

struct TestContext {
    storage: Arc<SqliteStorage>,
    cache: Arc<QueryCache>,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig::new(dir.path().join("store.db")).with_pool_size(4);
        let storage = SqliteStorage::open(config).unwrap();
        storage.create_table(&address_schema()).unwrap();
        storage.create_table(&order_schema()).unwrap();

        Self {
            storage: Arc::new(storage),
            cache: Arc::new(QueryCache::in_memory()),
            _dir: dir,
        }
    }

    fn addresses(&self) -> QueryEngine {
        QueryEngine::new(
            address_schema(),
            self.storage.clone(),
            self.cache.clone(),
            EngineConfig::default(),
        )
        .unwrap()
    }

    fn orders(&self) -> QueryEngine {
        QueryEngine::new(
            order_schema(),
            self.storage.clone(),
            self.cache.clone(),
            EngineConfig::default(),
        )
        .unwrap()
    }
}

fn address_schema() -> EntitySchema {
    EntitySchema::new("wc_order_addresses", "id")
        .with_alias("ca")
        .with_item_names("order_address", "order_addresses")
        .with_cache_group("order_addresses")
        .with_columns([
            ColumnDef::integer("id").sortable(),
            ColumnDef::integer("order_id").sortable(),
            ColumnDef::text("address_type").case_insensitive(),
            ColumnDef::text("first_name").searchable().sortable(),
            ColumnDef::text("last_name").searchable().sortable(),
            ColumnDef::text("address").searchable(),
            ColumnDef::text("city").searchable(),
            ColumnDef::text("country"),
        ])
}

fn order_schema() -> EntitySchema {
    EntitySchema::new("wc_orders", "id")
        .with_alias("o")
        .with_item_names("order", "orders")
        .with_cache_group("orders")
        .with_columns([
            ColumnDef::integer("id").sortable(),
            ColumnDef::text("status").case_insensitive(),
            ColumnDef::float("total").sortable().with_default(0.0),
            ColumnDef::boolean("paid").with_default(false),
            ColumnDef::datetime("date_created").sortable(),
            ColumnDef::datetime("date_modified").sortable(),
        ])
}

fn address(order_id: i64, kind: &str, first: &str, street: &str, city: &str) -> RawRow {
    vec![
        ("order_id".to_string(), Value::Int(order_id)),
        ("address_type".to_string(), Value::String(kind.into())),
        ("first_name".to_string(), Value::String(first.into())),
        ("last_name".to_string(), Value::String("Doe".into())),
        ("address".to_string(), Value::String(street.into())),
        ("city".to_string(), Value::String(city.into())),
        ("country".to_string(), Value::String("US".into())),
    ]
}

fn order(status: &str, total: f64, created: &str) -> RawRow {
    vec![
        ("status".to_string(), Value::String(status.into())),
        ("total".to_string(), Value::Float(total)),
        ("paid".to_string(), Value::Int(1)),
        ("date_created".to_string(), Value::String(created.into())),
        ("date_modified".to_string(), Value::String(created.into())),
    ]
}

fn seed_addresses(engine: &QueryEngine) {
    engine.add_item(address(5, "billing", "Jane", "1 Main St", "Springfield")).unwrap();
    engine.add_item(address(5, "shipping", "Jane", "9 Elm Rd", "Shelbyville")).unwrap();
    engine.add_item(address(6, "billing", "John", "42 Main Street", "Springfield")).unwrap();
    engine.add_item(address(7, "billing", "Ann", "100% Cotton Way", "Ogdenville")).unwrap();
}

fn seed_orders(engine: &QueryEngine) {
    engine.add_item(order("completed", 25.0, "2023-12-31 23:00:00")).unwrap();
    engine.add_item(order("processing", 10.5, "2024-01-01 08:30:00")).unwrap();
    engine.add_item(order("completed", 99.9, "2024-01-15 12:00:00")).unwrap();
    engine.add_item(order("refunded", 5.0, "2024-02-01 00:00:00")).unwrap();
}

#[test]
fn test_exact_filter_returns_matching_addresses() {
    let ctx = TestContext::new();
    let engine = ctx.addresses();
    seed_addresses(&engine);

    let spec = QuerySpec::from_json_str(r#"{ "order_id": 5, "fields": "all" }"#).unwrap();
    let result = engine.query(&spec).unwrap();

    assert_eq!(result.ids(), vec![Value::Int(2), Value::Int(1)]);
    assert_eq!(
        result.items[1].get("address"),
        Some(&Value::String("1 Main St".into()))
    );
    assert_eq!(ctx.cache.stats().writes(), 1);
}

#[test]
fn test_empty_exact_filter_matches_everything() {
    let ctx = TestContext::new();
    let engine = ctx.addresses();
    seed_addresses(&engine);

    let all = engine.query(&QuerySpec::new()).unwrap();
    let blank = engine
        .query(&QuerySpec::from_json_str(r#"{ "address": "", "city": null }"#).unwrap())
        .unwrap();
    assert_eq!(blank.len(), 4);
    assert_eq!(blank.ids(), all.ids());
    // same normalized spec, so the second query is a list hit
    assert!(ctx.cache.stats().hits() >= 1);
}

#[test]
fn test_search_is_case_insensitive_substring() {
    let ctx = TestContext::new();
    let engine = ctx.addresses();
    seed_addresses(&engine);

    let spec = QuerySpec::from_json_str(r#"{ "search": "MAIN st", "number": 10 }"#).unwrap();
    let result = engine.query(&spec).unwrap();
    assert_eq!(result.ids(), vec![Value::Int(3), Value::Int(1)]);

    // wildcards in the term match literally
    let result = engine.query(&QuerySpec::new().with_search("100%")).unwrap();
    assert_eq!(result.ids(), vec![Value::Int(4)]);
    let result = engine.query(&QuerySpec::new().with_search("1_0")).unwrap();
    assert!(result.is_empty());

    // restricted to one column
    let spec = QuerySpec::new()
        .with_search("spring")
        .with_search_columns(["address"]);
    assert!(engine.query(&spec).unwrap().is_empty());
}

#[test]
fn test_set_filters() {
    let ctx = TestContext::new();
    let engine = ctx.addresses();
    seed_addresses(&engine);

    let result = engine
        .query(&QuerySpec::new().filter_in("order_id", [6, 7, 7]))
        .unwrap();
    assert_eq!(result.ids(), vec![Value::Int(4), Value::Int(3)]);

    let result = engine
        .query(&QuerySpec::new().filter_not_in("address_type", ["BILLING"]))
        .unwrap();
    assert_eq!(result.ids(), vec![Value::Int(2)]);

    // the exact match wins over the set filter on the same column
    let spec = QuerySpec::new()
        .filter("order_id", 6)
        .filter_in("order_id", [5]);
    assert_eq!(engine.query(&spec).unwrap().ids(), vec![Value::Int(3)]);
}

#[test]
fn test_ordering_and_pagination() {
    let ctx = TestContext::new();
    let engine = ctx.addresses();
    seed_addresses(&engine);

    let spec = QuerySpec::new()
        .order_by_columns(["first_name", "id"])
        .with_order("asc")
        .with_number(2)
        .with_offset(1)
        .with_found_rows();
    let result = engine.query(&spec).unwrap();
    assert_eq!(result.ids(), vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(result.total, Some(4));

    // unsortable columns fall back to the primary key, descending
    let spec = QuerySpec::new().order_by("country").with_number(1);
    assert_eq!(engine.query(&spec).unwrap().ids(), vec![Value::Int(4)]);
}

#[test]
fn test_date_queries() {
    let ctx = TestContext::new();
    let engine = ctx.orders();
    seed_orders(&engine);

    let spec = QuerySpec::from_json_str(
        r#"{ "date_query": { "after": "2024-01-01", "inclusive": true }, "orderby": "date_created", "order": "ASC" }"#,
    )
    .unwrap();
    assert_eq!(
        engine.query(&spec).unwrap().ids(),
        vec![Value::Int(2), Value::Int(3), Value::Int(4)]
    );

    // exclusive after a day starts the next day
    let spec = QuerySpec::from_json_str(r#"{ "date_query": { "after": "2024-01-01" } }"#).unwrap();
    assert_eq!(
        engine.query(&spec).unwrap().ids(),
        vec![Value::Int(4), Value::Int(3)]
    );

    // a month, inclusive, covers its last second
    let spec = QuerySpec::from_json_str(
        r#"{ "date_created_query": { "after": "2024-01", "before": "2024-01", "inclusive": true } }"#,
    )
    .unwrap();
    assert_eq!(engine.count(&spec).unwrap(), 2);

    let spec = QuerySpec::from_json_str(
        r#"{ "date_query": { "relation": "OR", "clauses": [
            { "before": "2024" },
            { "column": "date_modified", "after": "2024-01-31" }
        ] } }"#,
    )
    .unwrap();
    assert_eq!(
        engine.query(&spec).unwrap().ids(),
        vec![Value::Int(4), Value::Int(1)]
    );
}

#[test]
fn test_malformed_date_query_keeps_other_filters() {
    let ctx = TestContext::new();
    let engine = ctx.orders();
    seed_orders(&engine);

    let spec = QuerySpec::from_json_str(
        r#"{ "status": "COMPLETED", "date_query": { "after": "not a date" } }"#,
    )
    .unwrap();
    let result = engine.query(&spec).unwrap();
    assert_eq!(result.ids(), vec![Value::Int(3), Value::Int(1)]);
}

#[test]
fn test_hydration_types() {
    let ctx = TestContext::new();
    let engine = ctx.orders();
    seed_orders(&engine);
    engine
        .add_item(vec![
            ("status".to_string(), Value::String("pending".into())),
            ("date_created".to_string(), Value::String("0000-00-00 00:00:00".into())),
        ])
        .unwrap();

    let item = engine.get_item(&Value::Int(3)).unwrap().unwrap();
    assert_eq!(item.get("total"), Some(&Value::Float(99.9)));
    assert_eq!(item.get("paid"), Some(&Value::Bool(true)));
    assert!(matches!(item.get("date_created"), Some(Value::Timestamp(_))));

    let item = engine.get_item(&Value::Int(5)).unwrap().unwrap();
    assert_eq!(item.get("date_created"), Some(&Value::Null));
    // stored as NULL, so it stays NULL
    assert_eq!(item.get("total"), Some(&Value::Null));
}

#[test]
fn test_count_equals_unbounded_query() {
    let ctx = TestContext::new();
    let engine = ctx.orders();
    seed_orders(&engine);

    for spec in [
        QuerySpec::new(),
        QuerySpec::new().filter("status", "completed"),
        QuerySpec::new().filter_not_in("status", ["refunded"]).with_number(1),
    ] {
        let count = engine.count(&spec).unwrap();
        let listed = engine.query(&spec.clone().with_number(0)).unwrap();
        assert_eq!(count, listed.len() as u64);
    }
}

#[test]
fn test_write_invalidates_cached_queries() {
    let ctx = TestContext::new();
    let engine = ctx.addresses();
    seed_addresses(&engine);

    let spec = QuerySpec::new().filter("order_id", 5);
    let first = engine.query(&spec).unwrap();
    let second = engine.query(&spec).unwrap();
    assert_eq!(first, second);
    let hits = ctx.cache.stats().hits();
    assert!(hits >= 1);

    let id = engine
        .add_item(address(5, "other", "Jane", "3 Oak Ave", "Springfield"))
        .unwrap();
    let third = engine.query(&spec).unwrap();
    assert_eq!(third.ids().first(), Some(&id));
    assert_eq!(third.len(), 3);

    let changes = vec![("order_id".to_string(), Value::Int(8))];
    assert!(engine.update_item(&id, changes).unwrap());
    assert_eq!(engine.query(&spec).unwrap(), first);
}

#[test]
fn test_groups_are_isolated() {
    let ctx = TestContext::new();
    let addresses = ctx.addresses();
    let orders = ctx.orders();
    seed_addresses(&addresses);
    seed_orders(&orders);

    let spec = QuerySpec::new().with_number(2);
    addresses.query(&spec).unwrap();
    orders.query(&spec).unwrap();

    orders.add_item(order("pending", 1.0, "2024-03-01 00:00:00")).unwrap();

    let hits = ctx.cache.stats().hits();
    addresses.query(&spec).unwrap();
    assert!(ctx.cache.stats().hits() > hits);
}

#[test]
fn test_ids_and_projection() {
    let ctx = TestContext::new();
    let engine = ctx.addresses();
    seed_addresses(&engine);

    let ids = engine
        .query(&QuerySpec::new().with_fields(Fields::Ids))
        .unwrap();
    assert!(ids.items.iter().all(|item| item.len() == 1));
    assert_eq!(ids.len(), 4);

    let spec = QuerySpec::from_json_str(r#"{ "fields": ["city", "bogus"], "order_id": 6 }"#).unwrap();
    let result = engine.query(&spec).unwrap();
    assert_eq!(
        result.items[0].columns().collect::<Vec<_>>(),
        vec!["id", "city"]
    );
}

#[test]
fn test_memory_and_sqlite_agree() {
    let ctx = TestContext::new();
    let sqlite = ctx.orders();
    seed_orders(&sqlite);

    let schema = order_schema();
    let memory = QueryEngine::new(
        schema.clone(),
        Arc::new(MemoryStorage::new().with_table(&schema)),
        Arc::new(QueryCache::in_memory()),
        EngineConfig::default().without_cache(),
    )
    .unwrap();
    seed_orders(&memory);

    let specs = [
        r#"{}"#,
        r#"{ "status__in": ["completed", "refunded"], "orderby": "total", "order": "ASC" }"#,
        r#"{ "status__not_in": "COMPLETED" }"#,
        r#"{ "date_query": [ { "after": "2023-12-31" }, { "before": "2024-02", "inclusive": true } ] }"#,
        r#"{ "search": "x", "number": 2, "offset": 1 }"#,
        r#"{ "orderby": ["date_created"], "number": 3, "offset": 2, "no_found_rows": false }"#,
    ];
    for input in specs {
        let spec = QuerySpec::from_json_str(input).unwrap();
        let a = sqlite.query(&spec).unwrap();
        let b = memory.query(&spec).unwrap();
        assert_eq!(a, b, "backends disagree on {}", input);
    }
}

#[test]
fn test_unicode_case_folding_matches_memory() {
    let ctx = TestContext::new();
    let sqlite = ctx.addresses();

    let schema = address_schema();
    let memory = QueryEngine::new(
        schema.clone(),
        Arc::new(MemoryStorage::new().with_table(&schema)),
        Arc::new(QueryCache::in_memory()),
        EngineConfig::default().without_cache(),
    )
    .unwrap();

    for engine in [&sqlite, &memory] {
        seed_addresses(engine);
        engine
            .add_item(address(9, "Livraison Étrangère", "Jürgen", "MÜNCHENER STRASSE 5", "ÉVORA"))
            .unwrap();
    }

    let specs = [
        r#"{ "search": "münchener" }"#,
        r#"{ "search": "évora" }"#,
        r#"{ "address_type": "livraison étrangère" }"#,
        r#"{ "address_type__in": ["LIVRAISON ÉTRANGÈRE", "shipping"] }"#,
        r#"{ "address_type__not_in": ["livraison étrangère"] }"#,
    ];
    for input in specs {
        let spec = QuerySpec::from_json_str(input).unwrap();
        let a = sqlite.query(&spec).unwrap();
        let b = memory.query(&spec).unwrap();
        assert_eq!(a, b, "backends disagree on {}", input);
    }

    let spec = QuerySpec::new().with_search("münchener");
    assert_eq!(sqlite.query(&spec).unwrap().ids(), vec![Value::Int(5)]);
    let spec = QuerySpec::new().filter("address_type", "livraison étrangère");
    assert_eq!(sqlite.query(&spec).unwrap().ids(), vec![Value::Int(5)]);
}

#[test]
fn test_concurrent_queries_and_writes() {
    let ctx = TestContext::new();
    let engine = Arc::new(ctx.addresses());
    seed_addresses(&engine);

    let mut handles = Vec::new();
    for worker in 0..4i64 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            for i in 0..10i64 {
                let spec = QuerySpec::new().filter("order_id", 100 + worker);
                let before = engine.query(&spec).unwrap().len();
                engine
                    .add_item(address(100 + worker, "billing", "W", &format!("{} Loop", i), "X"))
                    .unwrap();
                let after = engine.query(&spec).unwrap().len();
                assert_eq!(after, before + 1);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.count(&QuerySpec::new()).unwrap(), 44);
    assert_eq!(ctx.storage.count(&storeq_core::RenderedClause::scan(engine.schema())).unwrap(), 44);
}
