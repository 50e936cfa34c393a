//! In-process document store.
//!
//! Interprets the pipeline subset the document adapter emits: `$match`
//! (field tests, `$and`/`$or`/`$nor`, comparison operators, `$in`/`$nin`,
//! `$exists`, `$regex`), `$sort`, `$skip`, `$limit`, `$lookup`,
//! `$addFields` (paths, `$arrayElemAt`, literals), `$project`, `$facet` and
//! `$count`. Array fields match when any element matches. A missing
//! collection reads as empty, except as a `$lookup` source where it fails
//! the stage.

use super::DocumentStore;
use crate::{Error, Result};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{RwLock, RwLockReadGuard};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

pub struct MemoryDocumentStore {
    id: u64,
    collections: RwLock<HashMap<String, Vec<JsonValue>>>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, AtomicOrdering::Relaxed),
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(self, name: impl Into<String>, docs: Vec<JsonValue>) -> Self {
        self.insert_many(&name.into(), docs);
        self
    }

    /// Load `{ "collection": [documents..] }`.
    pub fn from_json(value: JsonValue) -> Result<Self> {
        let JsonValue::Object(map) = value else {
            return Err(Error::Store(
                "expected an object mapping collection names to document arrays".into(),
            ));
        };
        let store = Self::new();
        for (name, docs) in map {
            let JsonValue::Array(docs) = docs else {
                return Err(Error::Store(format!("collection {} is not an array", name)));
            };
            store.insert_many(&name, docs);
        }
        Ok(store)
    }

    pub fn insert_many(&self, collection: &str, docs: impl IntoIterator<Item = JsonValue>) {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|e| e.into_inner());
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
    }

    pub fn drop_collection(&self, collection: &str) {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|e| e.into_inner());
        collections.remove(collection);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<JsonValue>>> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self, collection: &str) -> Option<Vec<JsonValue>> {
        self.read().get(collection).cloned()
    }

    fn run(&self, mut docs: Vec<JsonValue>, pipeline: &[JsonValue]) -> Result<Vec<JsonValue>> {
        for stage in pipeline {
            docs = self.run_stage(docs, stage)?;
        }
        Ok(docs)
    }

    fn run_stage(&self, docs: Vec<JsonValue>, stage: &JsonValue) -> Result<Vec<JsonValue>> {
        let (name, spec) = match stage.as_object() {
            Some(map) if map.len() == 1 => map.iter().next().map(|(k, v)| (k.as_str(), v)),
            _ => None,
        }
        .ok_or_else(|| Error::Store(format!("invalid pipeline stage: {}", stage)))?;

        match name {
            "$match" => {
                let mut matcher = Matcher::default();
                let mut out = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matcher.matches(&doc, spec)? {
                        out.push(doc);
                    }
                }
                Ok(out)
            }
            "$sort" => sort(docs, spec),
            "$skip" => {
                let n = as_count(name, spec)?;
                Ok(docs.into_iter().skip(n).collect())
            }
            "$limit" => {
                let n = as_count(name, spec)?;
                Ok(docs.into_iter().take(n).collect())
            }
            "$lookup" => self.lookup(docs, spec),
            "$addFields" => add_fields(docs, spec),
            "$project" => project(docs, spec),
            "$facet" => {
                let facets = spec
                    .as_object()
                    .ok_or_else(|| Error::Store("$facet expects a document".into()))?;
                let mut out = Map::new();
                for (name, stages) in facets {
                    let stages = stages
                        .as_array()
                        .ok_or_else(|| Error::Store(format!("facet {} is not a pipeline", name)))?;
                    let result = self.run(docs.clone(), stages)?;
                    out.insert(name.clone(), JsonValue::Array(result));
                }
                Ok(vec![JsonValue::Object(out)])
            }
            "$count" => {
                let field = spec
                    .as_str()
                    .ok_or_else(|| Error::Store("$count expects a field name".into()))?;
                if docs.is_empty() {
                    return Ok(Vec::new());
                }
                let mut out = Map::new();
                out.insert(field.to_string(), JsonValue::from(docs.len() as u64));
                Ok(vec![JsonValue::Object(out)])
            }
            other => Err(Error::Store(format!("unsupported pipeline stage {}", other))),
        }
    }

    fn lookup(&self, docs: Vec<JsonValue>, spec: &JsonValue) -> Result<Vec<JsonValue>> {
        let arg = |key: &str| {
            spec.get(key)
                .and_then(JsonValue::as_str)
                .ok_or_else(|| Error::Store(format!("$lookup requires {}", key)))
        };
        let from = arg("from")?;
        let local_field = arg("localField")?;
        let foreign_field = arg("foreignField")?;
        let as_field = arg("as")?;

        let foreign = self.snapshot(from).ok_or_else(|| Error::LookupFailed {
            collection: from.to_string(),
            reason: format!("collection {} does not exist", from),
        })?;

        let mut out = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let locals: Vec<JsonValue> = match get_path(&doc, local_field) {
                Some(JsonValue::Array(items)) => items.clone(),
                Some(v) => vec![v.clone()],
                None => vec![JsonValue::Null],
            };
            let matched: Vec<JsonValue> = foreign
                .iter()
                .filter(|f| {
                    let value = get_path(f, foreign_field);
                    locals.iter().any(|l| equals(value, l))
                })
                .cloned()
                .collect();
            if let JsonValue::Object(map) = &mut doc {
                map.insert(as_field.to_string(), JsonValue::Array(matched));
            }
            out.push(doc);
        }
        Ok(out)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn aggregate(&self, collection: &str, pipeline: &[JsonValue]) -> Result<Vec<JsonValue>> {
        let docs = self.snapshot(collection).unwrap_or_default();
        self.run(docs, pipeline)
    }

    fn cache_scope(&self) -> String {
        format!("memory:{}", self.id)
    }
}

fn as_count(stage: &str, spec: &JsonValue) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| Error::Store(format!("{} expects a non-negative integer", stage)))
}

fn get_path<'a>(doc: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(doc, |current, key| current.get(key))
}

fn type_rank(value: Option<&JsonValue>) -> u8 {
    match value {
        None | Some(JsonValue::Null) => 0,
        Some(JsonValue::Number(_)) => 1,
        Some(JsonValue::String(_)) => 2,
        Some(JsonValue::Object(_)) => 3,
        Some(JsonValue::Array(_)) => 4,
        Some(JsonValue::Bool(_)) => 5,
    }
}

/// Ordering within one type bracket; `None` across brackets.
fn compare_same_type(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        (JsonValue::Null, JsonValue::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn sort_order(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| match (a, b) {
            (Some(x), Some(y)) => compare_same_type(x, y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        })
}

fn sort(mut docs: Vec<JsonValue>, spec: &JsonValue) -> Result<Vec<JsonValue>> {
    let keys = spec
        .as_object()
        .ok_or_else(|| Error::Store("$sort expects a document".into()))?;
    let keys: Vec<(&str, bool)> = keys
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_i64().unwrap_or(1) >= 0))
        .collect();

    docs.sort_by(|a, b| {
        for (key, ascending) in &keys {
            let ord = sort_order(get_path(a, key), get_path(b, key));
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

fn scalar_equals(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Equality with array-element matching; a missing field equals null.
fn equals(value: Option<&JsonValue>, target: &JsonValue) -> bool {
    match value {
        None | Some(JsonValue::Null) => target.is_null(),
        Some(v) => {
            scalar_equals(v, target)
                || matches!(v, JsonValue::Array(items) if items.iter().any(|i| scalar_equals(i, target)))
        }
    }
}

fn compare_matches(value: Option<&JsonValue>, operand: &JsonValue, accept: fn(Ordering) -> bool) -> bool {
    let test = |v: &JsonValue| compare_same_type(v, operand).map(accept).unwrap_or(false);
    match value {
        None => false,
        Some(JsonValue::Array(items)) => items.iter().any(test),
        Some(v) => test(v),
    }
}

#[derive(Default)]
struct Matcher {
    regexes: HashMap<(String, bool), Regex>,
}

impl Matcher {
    fn matches(&mut self, doc: &JsonValue, filter: &JsonValue) -> Result<bool> {
        let map = filter
            .as_object()
            .ok_or_else(|| Error::Store("$match expects a document".into()))?;
        for (key, cond) in map {
            let ok = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for sub in logical_operands(key, cond)? {
                        if !self.matches(doc, sub)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" | "$nor" => {
                    let mut any = false;
                    for sub in logical_operands(key, cond)? {
                        if self.matches(doc, sub)? {
                            any = true;
                            break;
                        }
                    }
                    if key == "$or" {
                        any
                    } else {
                        !any
                    }
                }
                op if op.starts_with('$') => {
                    return Err(Error::Store(format!("unsupported query operator {}", op)))
                }
                field => self.field_matches(get_path(doc, field), cond)?,
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn field_matches(&mut self, value: Option<&JsonValue>, cond: &JsonValue) -> Result<bool> {
        let ops = match cond {
            JsonValue::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => ops,
            literal => return Ok(equals(value, literal)),
        };
        let options = ops.get("$options").and_then(JsonValue::as_str).unwrap_or("");

        for (op, operand) in ops {
            let ok = match op.as_str() {
                "$eq" => equals(value, operand),
                "$ne" => !equals(value, operand),
                "$gt" => compare_matches(value, operand, |o| o == Ordering::Greater),
                "$gte" => compare_matches(value, operand, |o| o != Ordering::Less),
                "$lt" => compare_matches(value, operand, |o| o == Ordering::Less),
                "$lte" => compare_matches(value, operand, |o| o != Ordering::Greater),
                "$in" | "$nin" => {
                    let list = operand
                        .as_array()
                        .ok_or_else(|| Error::Store(format!("{} expects an array", op)))?;
                    let found = list.iter().any(|t| equals(value, t));
                    found == (op == "$in")
                }
                "$exists" => value.is_some() == operand.as_bool().unwrap_or(true),
                "$regex" => {
                    let pattern = operand
                        .as_str()
                        .ok_or_else(|| Error::Store("$regex expects a string".into()))?;
                    let regex = self.regex(pattern, options.contains('i'))?;
                    match value {
                        Some(JsonValue::String(s)) => regex.is_match(s),
                        Some(JsonValue::Array(items)) => items
                            .iter()
                            .any(|i| i.as_str().is_some_and(|s| regex.is_match(s))),
                        _ => false,
                    }
                }
                "$options" => true,
                other => return Err(Error::Store(format!("unsupported query operator {}", other))),
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn regex(&mut self, pattern: &str, case_insensitive: bool) -> Result<&Regex> {
        let key = (pattern.to_string(), case_insensitive);
        if !self.regexes.contains_key(&key) {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| Error::Store(format!("invalid $regex: {}", e)))?;
            self.regexes.insert(key.clone(), regex);
        }
        self.regexes
            .get(&key)
            .ok_or_else(|| Error::Store("regex cache miss".into()))
    }
}

fn logical_operands<'a>(op: &str, cond: &'a JsonValue) -> Result<&'a Vec<JsonValue>> {
    cond.as_array()
        .ok_or_else(|| Error::Store(format!("{} expects an array", op)))
}

fn add_fields(docs: Vec<JsonValue>, spec: &JsonValue) -> Result<Vec<JsonValue>> {
    let spec = spec
        .as_object()
        .ok_or_else(|| Error::Store("$addFields expects a document".into()))?;

    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let mut computed = Vec::with_capacity(spec.len());
        for (field, expr) in spec {
            computed.push((field, evaluate(&doc, expr)?));
        }
        if let JsonValue::Object(map) = &mut doc {
            for (field, value) in computed {
                match value {
                    Some(value) => {
                        map.insert(field.clone(), value);
                    }
                    // A missing result leaves the field out, as the server does.
                    None => {
                        map.shift_remove(field);
                    }
                }
            }
        }
        out.push(doc);
    }
    Ok(out)
}

/// Supports field paths (`"$name"`), `$arrayElemAt` and literals.
fn evaluate(doc: &JsonValue, expr: &JsonValue) -> Result<Option<JsonValue>> {
    match expr {
        JsonValue::String(path) if path.starts_with('$') => {
            Ok(get_path(doc, &path[1..]).cloned())
        }
        JsonValue::Object(map) if map.len() == 1 && map.contains_key("$arrayElemAt") => {
            let args = map
                .get("$arrayElemAt")
                .and_then(JsonValue::as_array)
                .filter(|args| args.len() == 2)
                .ok_or_else(|| Error::Store("$arrayElemAt expects [array, index]".into()))?;
            let index = args[1]
                .as_i64()
                .ok_or_else(|| Error::Store("$arrayElemAt index must be an integer".into()))?;
            let items = match evaluate(doc, &args[0])? {
                Some(JsonValue::Array(items)) => items,
                None | Some(JsonValue::Null) => return Ok(Some(JsonValue::Null)),
                Some(other) => {
                    return Err(Error::Store(format!(
                        "$arrayElemAt expects an array, got {}",
                        other
                    )))
                }
            };
            let position = if index < 0 {
                items.len().checked_sub(index.unsigned_abs() as usize)
            } else {
                Some(index as usize)
            };
            Ok(position.and_then(|i| items.into_iter().nth(i)))
        }
        literal => Ok(Some(literal.clone())),
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => true,
    }
}

fn project(docs: Vec<JsonValue>, spec: &JsonValue) -> Result<Vec<JsonValue>> {
    let spec = spec
        .as_object()
        .ok_or_else(|| Error::Store("$project expects a document".into()))?;
    let inclusion = spec.iter().any(|(k, v)| k != "_id" && truthy(v));
    let keep_id = spec.get("_id").map(truthy).unwrap_or(true);

    Ok(docs
        .into_iter()
        .map(|doc| {
            let JsonValue::Object(source) = doc else {
                return doc;
            };
            let mut out = Map::new();
            if inclusion {
                if keep_id {
                    if let Some(id) = source.get("_id") {
                        out.insert("_id".to_string(), id.clone());
                    }
                }
                for (key, flag) in spec {
                    if key != "_id" && truthy(flag) {
                        if let Some(value) = source.get(key) {
                            out.insert(key.clone(), value.clone());
                        }
                    }
                }
            } else {
                for (key, value) in source {
                    let excluded = spec.get(&key).is_some_and(|f| !truthy(f));
                    if !excluded {
                        out.insert(key, value);
                    }
                }
            }
            JsonValue::Object(out)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryDocumentStore {
        MemoryDocumentStore::new()
            .with_collection(
                "users",
                vec![
                    json!({ "_id": 1, "name": "Kenny", "age": 30, "tags": ["admin", "ops"], "status": "active" }),
                    json!({ "_id": 2, "name": "Ada", "age": 25, "tags": [], "status": "active" }),
                    json!({ "_id": 3, "name": "Bola", "tags": ["ops"], "status": "disabled" }),
                ],
            )
            .with_collection(
                "orders",
                vec![
                    json!({ "_id": 10, "userId": 1, "total": 5 }),
                    json!({ "_id": 11, "userId": 1, "total": 7 }),
                ],
            )
    }

    async fn ids(pipeline: Vec<JsonValue>) -> Vec<i64> {
        store()
            .aggregate("users", &pipeline)
            .await
            .unwrap()
            .iter()
            .filter_map(|d| d["_id"].as_i64())
            .collect()
    }

    #[tokio::test]
    async fn match_operators() {
        assert_eq!(ids(vec![json!({ "$match": { "status": "active" } })]).await, vec![1, 2]);
        assert_eq!(ids(vec![json!({ "$match": { "tags": "ops" } })]).await, vec![1, 3]);
        assert_eq!(ids(vec![json!({ "$match": { "age": { "$gte": 26 } } })]).await, vec![1]);
        assert_eq!(ids(vec![json!({ "$match": { "age": { "$exists": false } } })]).await, vec![3]);
        assert_eq!(ids(vec![json!({ "$match": { "age": { "$eq": null } } })]).await, vec![3]);
        assert_eq!(ids(vec![json!({ "$match": { "_id": { "$nin": [1, 2] } } })]).await, vec![3]);
        assert_eq!(
            ids(vec![json!({ "$match": { "$or": [
                { "name": { "$regex": "^ada$", "$options": "i" } },
                { "tags": { "$regex": "^adm" } },
            ] } })])
            .await,
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn sort_puts_missing_values_first() {
        let sorted = ids(vec![json!({ "$sort": { "age": 1, "_id": 1 } })]).await;
        assert_eq!(sorted, vec![3, 2, 1]);
        let sorted = ids(vec![json!({ "$sort": { "age": -1 } }), json!({ "$skip": 1 }), json!({ "$limit": 1 })]).await;
        assert_eq!(sorted, vec![2]);
    }

    #[tokio::test]
    async fn facet_counts_and_pages() {
        let out = store()
            .aggregate(
                "users",
                &[json!({ "$facet": {
                    "data": [{ "$skip": 2 }, { "$limit": 5 }],
                    "total": [{ "$count": "count" }],
                } })],
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["total"], json!([{ "count": 3 }]));
        assert_eq!(out[0]["data"].as_array().map(Vec::len), Some(1));

        let empty = store()
            .aggregate("nothing", &[json!({ "$count": "count" })])
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn lookup_first_element_and_project() {
        let out = store()
            .aggregate(
                "users",
                &[
                    json!({ "$match": { "status": "active" } }),
                    json!({ "$lookup": { "from": "orders", "localField": "_id", "foreignField": "userId", "as": "orders" } }),
                    json!({ "$addFields": { "orders": { "$arrayElemAt": ["$orders", 0] } } }),
                    json!({ "$project": { "name": 1, "orders": 1 } }),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            out,
            vec![
                json!({ "_id": 1, "name": "Kenny", "orders": { "_id": 10, "userId": 1, "total": 5 } }),
                json!({ "_id": 2, "name": "Ada" }),
            ]
        );
    }

    #[tokio::test]
    async fn add_fields_evaluates_paths_and_literals() {
        let out = store()
            .aggregate(
                "users",
                &[
                    json!({ "$match": { "_id": 1 } }),
                    json!({ "$addFields": {
                        "alias": "$name",
                        "lastTag": { "$arrayElemAt": ["$tags", -1] },
                        "kind": "person",
                    } }),
                ],
            )
            .await
            .unwrap();
        assert_eq!(out[0]["alias"], json!("Kenny"));
        assert_eq!(out[0]["lastTag"], json!("ops"));
        assert_eq!(out[0]["kind"], json!("person"));
    }

    #[tokio::test]
    async fn missing_lookup_source_fails() {
        let err = store()
            .aggregate(
                "users",
                &[json!({ "$lookup": { "from": "ghosts", "localField": "_id", "foreignField": "userId", "as": "g" } })],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LookupFailed { ref collection, .. } if collection == "ghosts"));
    }

    #[tokio::test]
    async fn unknown_stage_is_an_error() {
        let err = store()
            .aggregate("users", &[json!({ "$group": { "_id": "$status" } })])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn loads_from_json() {
        let s = MemoryDocumentStore::from_json(json!({ "a": [{ "_id": 1 }] })).unwrap();
        assert_eq!(s.snapshot("a").map(|d| d.len()), Some(1));
        assert!(MemoryDocumentStore::from_json(json!({ "a": 1 })).is_err());
        s.drop_collection("a");
        assert!(s.snapshot("a").is_none());
    }
}
