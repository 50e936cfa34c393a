//! Relational backend
//!
//! Criteria are rendered into parameterized PostgreSQL. Each row is
//! selected as one JSON object (`to_jsonb` or `jsonb_build_object` when
//! fields are projected). Relations are populated after the page query
//! with one batched query per relation, issued concurrently; a relation
//! whose query fails is dropped and reported instead of failing the page.

mod postgres;
mod sql;

pub use postgres::{PgExecutor, SqlExecutor};
pub use sql::{BindValue, SqlQuery};

use super::condition::parse_condition;
use super::{declared_relations, Backend, BackendAdapter, RawPage};
use crate::config::SearchSettings;
use crate::criteria::Criteria;
use crate::models::{EntityDescriptor, RelationDef, RelationError, RelationKind, SearchStrategy};
use crate::planner::ExecutionPlan;
use crate::search::{escape_like, FieldPredicate, SearchFilter};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use sql::{column, condition_sql, json_object_sql, push_bind, push_text, quote_ident, scalar_text};
use std::collections::HashMap;

const ROW_ALIAS: &str = "t";

#[derive(Debug, Clone, PartialEq)]
pub struct RelationalQuery {
    pub select: SqlQuery,
    /// Present for count-and-fetch; shares the select's filter and binds.
    pub count: Option<SqlQuery>,
    pub relations: Vec<RelationDef>,
    /// Requested relations this entity does not declare (hand-built criteria only).
    pub unresolved: Vec<RelationError>,
    /// Join keys selected only to populate relations; removed from results.
    pub helper_fields: Vec<String>,
}

pub struct RelationalAdapter<E> {
    executor: E,
    entity: EntityDescriptor,
    settings: SearchSettings,
}

impl<E: SqlExecutor> RelationalAdapter<E> {
    pub fn new(executor: E, entity: EntityDescriptor) -> Self {
        Self {
            executor,
            entity,
            settings: SearchSettings::default(),
        }
    }

    pub fn with_search_settings(mut self, settings: SearchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn where_sql(&self, criteria: &Criteria, binds: &mut Vec<BindValue>) -> String {
        let mut clauses = Vec::new();
        for (field, value) in &criteria.conditions {
            let col = column(ROW_ALIAS, field);
            for op in parse_condition(value) {
                if let Some(clause) = condition_sql(&col, &op, binds) {
                    clauses.push(clause);
                }
            }
        }
        if let Some(search) = criteria.search.as_ref().filter(|s| !s.is_empty()) {
            if let Some(clause) = self.search_sql(search, binds) {
                clauses.push(clause);
            }
        }

        if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        }
    }

    fn search_sql(&self, search: &SearchFilter, binds: &mut Vec<BindValue>) -> Option<String> {
        let groups: Vec<String> = search
            .groups
            .iter()
            .filter_map(|group| {
                let parts = group
                    .predicates
                    .iter()
                    .map(|p| self.predicate_sql(p, binds))
                    .collect();
                any_of(parts)
            })
            .collect();
        any_of(groups)
    }

    fn predicate_sql(&self, predicate: &FieldPredicate, binds: &mut Vec<BindValue>) -> String {
        let col = column(ROW_ALIAS, &predicate.field);
        let target = if predicate.is_array { "e.v" } else { col.as_str() };

        let test = match predicate.strategy {
            SearchStrategy::Exact => {
                let idx = push_text(binds, predicate.value.clone());
                format!("{}::text = ${}", target, idx)
            }
            SearchStrategy::Contains => {
                let idx = push_text(binds, format!("%{}%", escape_like(&predicate.value)));
                format!("{}::text ILIKE ${}", target, idx)
            }
            SearchStrategy::StartsWith => {
                let idx = push_text(binds, format!("{}%", escape_like(&predicate.value)));
                format!("{}::text ILIKE ${}", target, idx)
            }
            SearchStrategy::Fuzzy => {
                let edits = self
                    .settings
                    .fuzzy_max_edits
                    .min(predicate.value.chars().count().saturating_sub(1));
                let idx = push_text(binds, predicate.value.clone());
                format!(
                    "levenshtein_less_equal(lower({}::text), ${}, {}) <= {}",
                    target, idx, edits, edits
                )
            }
        };

        if predicate.is_array {
            format!("EXISTS (SELECT 1 FROM unnest({}) AS e(v) WHERE {})", col, test)
        } else {
            test
        }
    }

    fn order_sql(&self, criteria: &Criteria) -> String {
        let pk = &self.entity.primary_key;
        let tie_breaker = format!("{} ASC", column(ROW_ALIAS, pk));
        match &criteria.sort {
            Some(sort) if &sort.field != pk => {
                let direction = if sort.direction.is_ascending() {
                    "ASC NULLS FIRST"
                } else {
                    "DESC NULLS LAST"
                };
                format!(
                    " ORDER BY {} {}, {}",
                    column(ROW_ALIAS, &sort.field),
                    direction,
                    tie_breaker
                )
            }
            Some(sort) if !sort.direction.is_ascending() => {
                format!(" ORDER BY {} DESC", column(ROW_ALIAS, pk))
            }
            _ => format!(" ORDER BY {}", tie_breaker),
        }
    }

    /// Projection expression plus helper keys it adds for relation joins.
    fn projection(&self, criteria: &Criteria, relations: &[RelationDef]) -> (String, Vec<String>) {
        if criteria.fields.is_empty() {
            return (json_object_sql(ROW_ALIAS, &[]), Vec::new());
        }

        let mut keys = vec![self.entity.primary_key.clone()];
        for field in &criteria.fields {
            if !keys.contains(field) {
                keys.push(field.clone());
            }
        }
        let mut helpers = Vec::new();
        for def in relations {
            if !keys.contains(&def.local_field) {
                keys.push(def.local_field.clone());
                helpers.push(def.local_field.clone());
            }
        }
        (json_object_sql(ROW_ALIAS, &keys), helpers)
    }

    async fn load_relation(&self, def: &RelationDef, keys: Vec<String>) -> Result<Vec<JsonValue>> {
        let mut binds = Vec::new();
        let idx = push_bind(&mut binds, BindValue::TextArray(keys));
        let query = SqlQuery {
            sql: format!(
                "SELECT to_jsonb(r) AS row FROM {} r WHERE {}::text = ANY(${})",
                quote_ident(&def.target),
                column("r", &def.foreign_field),
                idx
            ),
            binds,
        };
        self.executor.fetch_rows(&query).await
    }

    async fn populate_relations(
        &self,
        rows: &mut [JsonValue],
        relations: &[RelationDef],
    ) -> (Vec<String>, Vec<RelationError>) {
        let loads = relations.iter().map(|def| {
            let keys = collect_keys(rows, &def.local_field);
            async move {
                if keys.is_empty() {
                    return Ok(Vec::new());
                }
                self.load_relation(def, keys).await
            }
        });
        let outcomes = futures::future::join_all(loads).await;

        let mut loaded = Vec::new();
        let mut errors = Vec::new();
        for (def, outcome) in relations.iter().zip(outcomes) {
            match outcome {
                Ok(related) => {
                    attach(rows, def, related);
                    loaded.push(def.name.clone());
                }
                Err(e) => {
                    tracing::debug!(relation = %def.name, target = %def.target, error = %e, "Relation query failed");
                    errors.push(RelationError::new(def.name.clone(), e.to_string()));
                }
            }
        }
        (loaded, errors)
    }
}

fn any_of(mut parts: Vec<String>) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => Some(parts.remove(0)),
        _ => Some(format!("({})", parts.join(" OR "))),
    }
}

fn collect_keys(rows: &[JsonValue], field: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for row in rows {
        if let Some(key) = row.get(field).and_then(scalar_text) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

fn attach(rows: &mut [JsonValue], def: &RelationDef, related: Vec<JsonValue>) {
    let mut by_key: HashMap<String, Vec<JsonValue>> = HashMap::new();
    for item in related {
        if let Some(key) = item.get(&def.foreign_field).and_then(scalar_text) {
            by_key.entry(key).or_default().push(item);
        }
    }

    for row in rows.iter_mut() {
        let matches = row
            .get(&def.local_field)
            .and_then(scalar_text)
            .and_then(|key| by_key.get(&key).cloned())
            .unwrap_or_default();
        let value = match def.kind {
            RelationKind::One => matches.into_iter().next().unwrap_or(JsonValue::Null),
            RelationKind::Many => JsonValue::Array(matches),
        };
        if let JsonValue::Object(map) = row {
            map.insert(def.name.clone(), value);
        }
    }
}

#[async_trait]
impl<E: SqlExecutor> BackendAdapter for RelationalAdapter<E> {
    type Query = RelationalQuery;

    fn backend(&self) -> Backend {
        Backend::Relational
    }

    fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    fn cache_scope(&self) -> String {
        format!("relational:{}", self.executor.cache_scope())
    }

    fn build_query(&self, criteria: &Criteria, plan: &ExecutionPlan) -> Result<RelationalQuery> {
        let (relations, unresolved) = declared_relations(&self.entity, &criteria.relations);
        let (projection, helper_fields) = self.projection(criteria, &relations);

        let mut binds = Vec::new();
        let from = format!(" FROM {} {}", quote_ident(&self.entity.source), ROW_ALIAS);
        let filter = self.where_sql(criteria, &mut binds);

        let select = SqlQuery {
            sql: format!(
                "SELECT {} AS row{}{}{} LIMIT {} OFFSET {}",
                projection,
                from,
                filter,
                self.order_sql(criteria),
                plan.fetch_limit,
                plan.window.skip
            ),
            binds: binds.clone(),
        };
        let count = plan.needs_count().then(|| SqlQuery {
            sql: format!("SELECT COUNT(*){}{}", from, filter),
            binds,
        });

        Ok(RelationalQuery {
            select,
            count,
            relations,
            unresolved,
            helper_fields,
        })
    }

    async fn execute(&self, query: &RelationalQuery) -> Result<RawPage> {
        let (mut rows, total) = match &query.count {
            Some(count) => {
                let (rows, total) = tokio::try_join!(
                    self.executor.fetch_rows(&query.select),
                    self.executor.fetch_count(count)
                )?;
                (rows, Some(total))
            }
            None => (self.executor.fetch_rows(&query.select).await?, None),
        };

        let (relations_loaded, mut relation_errors) =
            self.populate_relations(&mut rows, &query.relations).await;
        relation_errors.splice(0..0, query.unresolved.iter().cloned());

        if !query.helper_fields.is_empty() {
            for row in rows.iter_mut() {
                if let JsonValue::Object(map) = row {
                    for helper in &query.helper_fields {
                        map.shift_remove(helper);
                    }
                }
            }
        }

        Ok(RawPage {
            rows,
            total,
            relations_loaded,
            relation_errors,
        })
    }

    fn explain(&self, query: &RelationalQuery) -> JsonValue {
        json!({
            "select": query.select,
            "count": query.count,
            "relations": query.relations.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        })
    }
}
