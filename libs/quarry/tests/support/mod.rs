#![allow(dead_code)]

use async_trait::async_trait;
use quarry::adapter::SqlQuery;
use quarry::config::EngineConfig;
use quarry::models::{PaginatedResult, SearchFieldGroup, SearchStrategy};
use quarry::{
    DocumentAdapter, DocumentStore, EntityDescriptor, MemoryDocumentStore, QueryEngine,
    RelationDef, RelationalAdapter, SqlExecutor, WhereConfig,
};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn engine() -> anyhow::Result<QueryEngine> {
    engine_with(|_| {})
}

pub fn engine_with(configure: impl FnOnce(&mut EngineConfig)) -> anyhow::Result<QueryEngine> {
    let mut config = EngineConfig::default();
    configure(&mut config);
    Ok(QueryEngine::new(config)?)
}

/// `users` with a one-to-one `profile` and a one-to-many `orders` relation.
pub fn users_entity(primary_key: &str) -> EntityDescriptor {
    EntityDescriptor::new("user", "users")
        .primary_key(primary_key)
        .relation(RelationDef::one("profile", "profiles", primary_key, "userId"))
        .relation(RelationDef::many("orders", "orders", primary_key, "userId"))
}

/// Active users only; names fuzzy, email substring, tags exact.
pub fn user_where_config() -> WhereConfig {
    WhereConfig::new()
        .condition("status", "active")
        .search_group(
            SearchFieldGroup::new(["firstName", "lastName"])
                .strategy(SearchStrategy::Fuzzy)
                .priority(10)
                .weight(0.8),
        )
        .search_group(
            SearchFieldGroup::new(["email"])
                .strategy(SearchStrategy::Contains)
                .priority(5),
        )
        .search_group(SearchFieldGroup::array("tags").strategy(SearchStrategy::Exact))
}

pub fn user_documents() -> Vec<JsonValue> {
    vec![
        json!({ "_id": 1, "firstName": "Kenny", "lastName": "Adeyemi", "email": "kenny@example.com", "status": "active", "tags": ["admin"] }),
        json!({ "_id": 2, "firstName": "Ada", "lastName": "Lovelace", "email": "ada@example.com", "status": "active", "tags": ["math", "admin"] }),
        json!({ "_id": 3, "firstName": "Kenny", "lastName": "Okafor", "email": "kenny.o@example.com", "status": "disabled", "tags": [] }),
        json!({ "_id": 4, "firstName": "Bola", "lastName": "Kennedy", "email": "bola@example.com", "status": "active", "tags": ["ops"] }),
        json!({ "_id": 5, "firstName": "Chidi", "lastName": "Obi", "email": "chidi@kenniy.dev", "status": "active", "tags": ["ops"] }),
    ]
}

/// Users and profiles; the `orders` collection is deliberately absent.
pub fn seeded_store() -> MemoryDocumentStore {
    MemoryDocumentStore::new()
        .with_collection("users", user_documents())
        .with_collection(
            "profiles",
            vec![
                json!({ "_id": 100, "userId": 1, "bio": "Platform" }),
                json!({ "_id": 101, "userId": 4, "bio": "Ops" }),
            ],
        )
}

pub fn document_adapter<S: DocumentStore>(store: S) -> DocumentAdapter<S> {
    DocumentAdapter::new(store, users_entity("_id"))
}

pub fn ids(result: &PaginatedResult) -> Vec<i64> {
    result
        .items
        .iter()
        .filter_map(|item| item.get("_id").or_else(|| item.get("id")))
        .filter_map(JsonValue::as_i64)
        .collect()
}

/// Counts aggregate calls reaching the wrapped store.
pub struct CountingStore<S> {
    inner: S,
    calls: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for CountingStore<S> {
    async fn aggregate(&self, collection: &str, pipeline: &[JsonValue]) -> quarry::Result<Vec<JsonValue>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.aggregate(collection, pipeline).await
    }

    fn cache_scope(&self) -> String {
        self.inner.cache_scope()
    }
}

/// Delays every aggregate call.
pub struct SlowStore<S> {
    pub inner: S,
    pub delay: Duration,
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for SlowStore<S> {
    async fn aggregate(&self, collection: &str, pipeline: &[JsonValue]) -> quarry::Result<Vec<JsonValue>> {
        tokio::time::sleep(self.delay).await;
        self.inner.aggregate(collection, pipeline).await
    }

    fn cache_scope(&self) -> String {
        self.inner.cache_scope()
    }
}

/// Fake SQL executor: records every statement and answers from canned rows.
///
/// Relation queries (`FROM "<target>" r`) are answered from `related`, or
/// fail when the target is listed in `failing`.
#[derive(Default)]
pub struct RecordingExecutor {
    pub rows: Vec<JsonValue>,
    pub total: u64,
    pub related: HashMap<String, Vec<JsonValue>>,
    pub failing: Vec<String>,
    queries: Mutex<Vec<SqlQuery>>,
}

impl RecordingExecutor {
    pub fn new(rows: Vec<JsonValue>, total: u64) -> Self {
        Self {
            rows,
            total,
            ..Default::default()
        }
    }

    pub fn related(mut self, target: &str, rows: Vec<JsonValue>) -> Self {
        self.related.insert(target.to_string(), rows);
        self
    }

    pub fn failing(mut self, target: &str) -> Self {
        self.failing.push(target.to_string());
        self
    }

    pub fn queries(&self) -> Vec<SqlQuery> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, query: &SqlQuery) {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.clone());
    }
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    async fn fetch_rows(&self, query: &SqlQuery) -> quarry::Result<Vec<JsonValue>> {
        self.record(query);
        for target in &self.failing {
            if query.sql.contains(&format!("FROM \"{}\" r", target)) {
                return Err(sqlx::Error::Protocol(format!("relation \"{}\" does not exist", target)).into());
            }
        }
        for (target, rows) in &self.related {
            if query.sql.contains(&format!("FROM \"{}\" r", target)) {
                return Ok(rows.clone());
            }
        }
        Ok(self.rows.clone())
    }

    async fn fetch_count(&self, query: &SqlQuery) -> quarry::Result<u64> {
        self.record(query);
        Ok(self.total)
    }

    fn cache_scope(&self) -> String {
        format!("recording:{:p}", self)
    }
}

/// Count and page queries each wait for the other before answering, so a
/// caller that awaits them one after the other never finishes.
pub struct RendezvousExecutor {
    pub rows: Vec<JsonValue>,
    pub total: u64,
    barrier: tokio::sync::Barrier,
}

impl RendezvousExecutor {
    pub fn new(rows: Vec<JsonValue>, total: u64) -> Self {
        Self {
            rows,
            total,
            barrier: tokio::sync::Barrier::new(2),
        }
    }
}

#[async_trait]
impl SqlExecutor for RendezvousExecutor {
    async fn fetch_rows(&self, _query: &SqlQuery) -> quarry::Result<Vec<JsonValue>> {
        self.barrier.wait().await;
        Ok(self.rows.clone())
    }

    async fn fetch_count(&self, _query: &SqlQuery) -> quarry::Result<u64> {
        self.barrier.wait().await;
        Ok(self.total)
    }

    fn cache_scope(&self) -> String {
        format!("rendezvous:{:p}", self)
    }
}

pub fn relational_adapter(executor: RecordingExecutor) -> RelationalAdapter<RecordingExecutor> {
    RelationalAdapter::new(executor, users_entity("id"))
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
