//! Document backend
//!
//! Criteria are rendered into one aggregation pipeline:
//!
//! ```text
//! $match -> $sort -> $facet { data: [$skip, $limit, $lookup.., $addFields.., $project], total: [$count] }
//! ```
//!
//! Fetch-only plans skip the facet and run the `data` stages directly.
//! When a `$lookup` fails the pipeline is rebuilt without the relations
//! targeting that collection and run again; the dropped relations are
//! reported in the page's relation errors.

mod memory;

pub use memory::MemoryDocumentStore;

use super::condition::{parse_condition, ConditionOp};
use super::{declared_relations, Backend, BackendAdapter, RawPage};
use crate::config::SearchSettings;
use crate::criteria::Criteria;
use crate::models::{EntityDescriptor, RelationDef, RelationError, RelationKind, SearchStrategy};
use crate::planner::ExecutionPlan;
use crate::search::{fuzzy_pattern, FieldPredicate, SearchFilter};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run `pipeline` against `collection`. A `$lookup` whose source cannot
    /// be read must fail with [`Error::LookupFailed`].
    async fn aggregate(&self, collection: &str, pipeline: &[JsonValue]) -> Result<Vec<JsonValue>>;

    /// Stable identity of the underlying database, used in cache keys.
    fn cache_scope(&self) -> String;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    async fn aggregate(&self, collection: &str, pipeline: &[JsonValue]) -> Result<Vec<JsonValue>> {
        (**self).aggregate(collection, pipeline).await
    }

    fn cache_scope(&self) -> String {
        (**self).cache_scope()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub collection: String,
    pub filter: JsonValue,
    pub sort: JsonValue,
    pub skip: u64,
    pub limit: u32,
    /// Wrap the page in a `$facet` that also counts matches.
    pub count: bool,
    pub lookups: Vec<RelationDef>,
    pub primary_key: String,
    /// Projected fields; empty keeps whole documents.
    pub fields: Vec<String>,
    /// Requested relations this entity does not declare (hand-built criteria only).
    pub unresolved: Vec<RelationError>,
}

impl DocumentQuery {
    pub fn pipeline(&self) -> Vec<JsonValue> {
        let mut data = Vec::new();
        if self.skip > 0 {
            data.push(json!({ "$skip": self.skip }));
        }
        data.push(json!({ "$limit": self.limit }));
        for def in &self.lookups {
            data.push(json!({
                "$lookup": {
                    "from": def.target,
                    "localField": def.local_field,
                    "foreignField": def.foreign_field,
                    "as": def.name,
                }
            }));
            // First match only; unwinding would repeat the parent row.
            if def.kind == RelationKind::One {
                let mut first = Map::new();
                first.insert(
                    def.name.clone(),
                    json!({ "$arrayElemAt": [format!("${}", def.name), 0] }),
                );
                data.push(json!({ "$addFields": first }));
            }
        }
        if let Some(projection) = self.projection() {
            data.push(json!({ "$project": projection }));
        }

        let mut pipeline = vec![
            json!({ "$match": self.filter }),
            json!({ "$sort": self.sort }),
        ];
        if self.count {
            pipeline.push(json!({
                "$facet": {
                    "data": data,
                    "total": [{ "$count": "count" }],
                }
            }));
        } else {
            pipeline.extend(data);
        }
        pipeline
    }

    fn projection(&self) -> Option<JsonValue> {
        if self.fields.is_empty() {
            return None;
        }
        let mut projection = Map::new();
        projection.insert(self.primary_key.clone(), json!(1));
        for field in &self.fields {
            projection.insert(field.clone(), json!(1));
        }
        for def in &self.lookups {
            projection.insert(def.name.clone(), json!(1));
        }
        Some(JsonValue::Object(projection))
    }

    /// Drop lookups reading `collection`, returning the removed relations.
    fn drop_lookups(&mut self, collection: &str) -> Vec<RelationDef> {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.lookups)
            .into_iter()
            .partition(|def| def.target == collection);
        self.lookups = kept;
        dropped
    }
}

pub struct DocumentAdapter<S> {
    store: S,
    entity: EntityDescriptor,
    settings: SearchSettings,
}

impl<S: DocumentStore> DocumentAdapter<S> {
    pub fn new(store: S, entity: EntityDescriptor) -> Self {
        Self {
            store,
            entity,
            settings: SearchSettings::default(),
        }
    }

    pub fn with_search_settings(mut self, settings: SearchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn filter(&self, criteria: &Criteria) -> JsonValue {
        let mut conditions = Map::new();
        for (field, value) in &criteria.conditions {
            conditions.insert(field.clone(), condition_doc(&parse_condition(value)));
        }

        let search = criteria
            .search
            .as_ref()
            .filter(|s| !s.is_empty())
            .and_then(|s| self.search_doc(s));

        match (conditions.is_empty(), search) {
            (_, None) => JsonValue::Object(conditions),
            (true, Some(search)) => search,
            (false, Some(search)) => json!({ "$and": [JsonValue::Object(conditions), search] }),
        }
    }

    fn search_doc(&self, search: &SearchFilter) -> Option<JsonValue> {
        let groups: Vec<JsonValue> = search
            .groups
            .iter()
            .filter_map(|group| {
                let parts = group
                    .predicates
                    .iter()
                    .map(|p| self.predicate_doc(p))
                    .collect();
                any_of(parts)
            })
            .collect();
        any_of(groups)
    }

    fn predicate_doc(&self, predicate: &FieldPredicate) -> JsonValue {
        let test = match predicate.strategy {
            SearchStrategy::Exact => json!({ "$eq": predicate.value }),
            SearchStrategy::Contains => {
                json!({ "$regex": regex::escape(&predicate.value), "$options": "i" })
            }
            SearchStrategy::StartsWith => {
                json!({ "$regex": format!("^{}", regex::escape(&predicate.value)), "$options": "i" })
            }
            SearchStrategy::Fuzzy => {
                let fuzzy = fuzzy_pattern(
                    &predicate.value,
                    self.settings.fuzzy_max_edits,
                    self.settings.max_fuzzy_alternatives,
                );
                if fuzzy.edits < self.settings.fuzzy_max_edits {
                    tracing::debug!(
                        field = %predicate.field,
                        edits = fuzzy.edits,
                        alternatives = fuzzy.alternatives,
                        "Fuzzy edit budget reduced"
                    );
                }
                json!({ "$regex": fuzzy.pattern, "$options": "i" })
            }
        };
        // Array fields: the store applies the test to each element.
        let mut doc = Map::new();
        doc.insert(predicate.field.clone(), test);
        JsonValue::Object(doc)
    }

    fn sort(&self, criteria: &Criteria) -> JsonValue {
        let pk = &self.entity.primary_key;
        let mut sort = Map::new();
        if let Some(spec) = &criteria.sort {
            let direction = if spec.direction.is_ascending() { 1 } else { -1 };
            sort.insert(spec.field.clone(), json!(direction));
        }
        if !sort.contains_key(pk) {
            sort.insert(pk.clone(), json!(1));
        }
        JsonValue::Object(sort)
    }
}

fn condition_doc(ops: &[ConditionOp]) -> JsonValue {
    let mut doc = Map::new();
    for op in ops {
        let (key, value) = match op {
            ConditionOp::Compare(cmp, v) => (cmp.mongo(), v.clone()),
            ConditionOp::In(values) => ("$in", JsonValue::Array(values.clone())),
            ConditionOp::NotIn(values) => ("$nin", JsonValue::Array(values.clone())),
            ConditionOp::IsNull => ("$eq", JsonValue::Null),
            ConditionOp::NotNull => ("$ne", JsonValue::Null),
        };
        doc.insert(key.to_string(), value);
    }
    JsonValue::Object(doc)
}

fn any_of(mut parts: Vec<JsonValue>) -> Option<JsonValue> {
    match parts.len() {
        0 => None,
        1 => Some(parts.remove(0)),
        _ => Some(json!({ "$or": parts })),
    }
}

#[async_trait]
impl<S: DocumentStore> BackendAdapter for DocumentAdapter<S> {
    type Query = DocumentQuery;

    fn backend(&self) -> Backend {
        Backend::Document
    }

    fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    fn cache_scope(&self) -> String {
        format!("document:{}", self.store.cache_scope())
    }

    fn build_query(&self, criteria: &Criteria, plan: &ExecutionPlan) -> Result<DocumentQuery> {
        let (lookups, unresolved) = declared_relations(&self.entity, &criteria.relations);
        Ok(DocumentQuery {
            collection: self.entity.source.clone(),
            filter: self.filter(criteria),
            sort: self.sort(criteria),
            skip: plan.window.skip,
            limit: plan.fetch_limit,
            count: plan.needs_count(),
            lookups,
            primary_key: self.entity.primary_key.clone(),
            fields: criteria.fields.clone(),
            unresolved,
        })
    }

    async fn execute(&self, query: &DocumentQuery) -> Result<RawPage> {
        let mut current = query.clone();
        let mut relation_errors = query.unresolved.clone();

        let docs = loop {
            match self.store.aggregate(&current.collection, &current.pipeline()).await {
                Ok(docs) => break docs,
                Err(Error::LookupFailed { collection, reason }) => {
                    let dropped = current.drop_lookups(&collection);
                    if dropped.is_empty() {
                        return Err(Error::LookupFailed { collection, reason });
                    }
                    tracing::debug!(
                        collection = %collection,
                        reason = %reason,
                        dropped = dropped.len(),
                        "Lookup failed; re-running without it"
                    );
                    for def in dropped {
                        relation_errors.push(RelationError::new(def.name, reason.clone()));
                    }
                }
                Err(e) => return Err(e),
            }
        };

        let (mut rows, total) = if current.count {
            let facet = docs.into_iter().next().unwrap_or(JsonValue::Null);
            let rows = match facet.get("data") {
                Some(JsonValue::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            let total = facet
                .get("total")
                .and_then(|t| t.get(0))
                .and_then(|t| t.get("count"))
                .and_then(JsonValue::as_u64)
                .unwrap_or(0);
            (rows, Some(total))
        } else {
            (docs, None)
        };

        // One-to-one relations with no match come back without the key.
        for def in current.lookups.iter().filter(|d| d.kind == RelationKind::One) {
            for row in rows.iter_mut() {
                if let JsonValue::Object(map) = row {
                    map.entry(def.name.clone()).or_insert(JsonValue::Null);
                }
            }
        }

        Ok(RawPage {
            rows,
            total,
            relations_loaded: current.lookups.iter().map(|d| d.name.clone()).collect(),
            relation_errors,
        })
    }

    fn explain(&self, query: &DocumentQuery) -> JsonValue {
        json!({
            "collection": query.collection,
            "pipeline": query.pipeline(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conditions, SortSpec};
    use crate::pagination::OffsetWindow;
    use crate::planner::ExecutionStrategy;
    use crate::search::FilterGroup;

    fn entity() -> EntityDescriptor {
        EntityDescriptor::new("user", "users")
            .primary_key("_id")
            .relation(RelationDef::one("profile", "profiles", "_id", "userId"))
            .relation(RelationDef::many("orders", "orders", "_id", "userId"))
    }

    fn criteria() -> Criteria {
        let mut conditions = Conditions::new();
        conditions.insert("status".into(), json!("active"));
        Criteria {
            entity: "user".into(),
            conditions,
            search: None,
            relations: Vec::new(),
            fields: Vec::new(),
            include_errors: Vec::new(),
            sort: Some(SortSpec::asc("lastName")),
            page: 3,
            limit: 20,
            include_total_count: true,
        }
    }

    fn plan(strategy: ExecutionStrategy) -> ExecutionPlan {
        ExecutionPlan {
            fingerprint: "fp".into(),
            strategy,
            window: OffsetWindow { skip: 40, take: 20 },
            fetch_limit: if strategy == ExecutionStrategy::FetchOnly { 21 } else { 20 },
        }
    }

    fn adapter() -> DocumentAdapter<MemoryDocumentStore> {
        DocumentAdapter::new(MemoryDocumentStore::new(), entity())
    }

    #[test]
    fn count_and_fetch_uses_a_facet() {
        let q = adapter()
            .build_query(&criteria(), &plan(ExecutionStrategy::CountAndFetch))
            .unwrap();
        assert_eq!(
            q.pipeline(),
            vec![
                json!({ "$match": { "status": { "$eq": "active" } } }),
                json!({ "$sort": { "lastName": 1, "_id": 1 } }),
                json!({ "$facet": {
                    "data": [{ "$skip": 40 }, { "$limit": 20 }],
                    "total": [{ "$count": "count" }],
                } }),
            ]
        );
    }

    #[test]
    fn fetch_only_runs_page_stages_directly() {
        let mut c = criteria();
        c.relations = vec!["profile".into()];
        c.fields = vec!["email".into()];
        let q = adapter()
            .build_query(&c, &plan(ExecutionStrategy::FetchOnly))
            .unwrap();
        let pipeline = q.pipeline();
        assert_eq!(pipeline[2], json!({ "$skip": 40 }));
        assert_eq!(pipeline[3], json!({ "$limit": 21 }));
        assert_eq!(
            pipeline[4],
            json!({ "$lookup": { "from": "profiles", "localField": "_id", "foreignField": "userId", "as": "profile" } })
        );
        assert_eq!(
            pipeline[5],
            json!({ "$addFields": { "profile": { "$arrayElemAt": ["$profile", 0] } } })
        );
        assert_eq!(
            pipeline[6],
            json!({ "$project": { "_id": 1, "email": 1, "profile": 1 } })
        );
    }

    #[test]
    fn search_is_combined_with_conditions() {
        let mut c = criteria();
        c.search = Some(SearchFilter {
            term: "a.b".into(),
            groups: vec![FilterGroup {
                fields: vec!["email".into(), "tags".into()],
                is_array: false,
                strategies: vec![SearchStrategy::Contains],
                priority: 0,
                weight: 1.0,
                predicates: vec![
                    FieldPredicate {
                        field: "email".into(),
                        is_array: false,
                        strategy: SearchStrategy::Contains,
                        value: "a.b".into(),
                    },
                    FieldPredicate {
                        field: "code".into(),
                        is_array: false,
                        strategy: SearchStrategy::StartsWith,
                        value: "a.b".into(),
                    },
                ],
            }],
            algorithms: vec![SearchStrategy::Contains, SearchStrategy::StartsWith],
        });
        let q = adapter()
            .build_query(&c, &plan(ExecutionStrategy::CountAndFetch))
            .unwrap();
        assert_eq!(
            q.filter,
            json!({ "$and": [
                { "status": { "$eq": "active" } },
                { "$or": [
                    { "email": { "$regex": "a\\.b", "$options": "i" } },
                    { "code": { "$regex": "^a\\.b", "$options": "i" } },
                ] },
            ] })
        );
    }

    #[test]
    fn undeclared_relations_are_reported_not_looked_up() {
        let mut c = criteria();
        c.relations = vec!["ghost".into(), "orders".into()];
        let q = adapter()
            .build_query(&c, &plan(ExecutionStrategy::CountAndFetch))
            .unwrap();
        assert_eq!(q.lookups.len(), 1);
        assert_eq!(q.unresolved[0].relation, "ghost");
    }

    #[tokio::test]
    async fn failed_lookup_is_dropped_and_rerun() {
        let store = MemoryDocumentStore::new()
            .with_collection(
                "users",
                vec![
                    json!({ "_id": 1, "status": "active", "lastName": "B" }),
                    json!({ "_id": 2, "status": "active", "lastName": "A" }),
                ],
            )
            .with_collection("profiles", vec![json!({ "userId": 2, "bio": "x" })]);
        let a = DocumentAdapter::new(store, entity());

        let mut c = criteria();
        c.page = 1;
        c.relations = vec!["profile".into(), "orders".into()];
        let mut p = plan(ExecutionStrategy::CountAndFetch);
        p.window = OffsetWindow { skip: 0, take: 20 };
        let q = a.build_query(&c, &p).unwrap();
        let page = a.execute(&q).await.unwrap();

        assert_eq!(page.total, Some(2));
        assert_eq!(page.relations_loaded, vec!["profile"]);
        assert_eq!(page.relation_errors.len(), 1);
        assert_eq!(page.relation_errors[0].relation, "orders");
        assert_eq!(page.rows[0]["_id"], json!(2));
        assert_eq!(page.rows[0]["profile"]["bio"], json!("x"));
        assert_eq!(page.rows[1]["profile"], JsonValue::Null);
    }
}
