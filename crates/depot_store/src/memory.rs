//! In-memory document store.

use crate::document::{Document, Query, ID_KEY};
use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use uuid::Uuid;

/// An in-memory document store.
///
/// Documents are held in insertion order behind a `parking_lot::RwLock`.
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral collections that don't need persistence
///
/// # Query dialect
///
/// Plain keys match by strict JSON equality, or by operator when the
/// term value is an object of `$`-prefixed operators (`$ne`, `$in`,
/// `$gt`, `$gte`, `$lt`, `$lte`). `$fields` projects, `$sort` orders,
/// `$skip`/`$limit` page. Unrecognized `$`-operators are ignored.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: RwLock<String>,
    documents: RwLock<Vec<Document>>,
}

impl MemoryStore {
    /// Creates an empty store for the given collection namespace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: RwLock::new(name.into()),
            documents: RwLock::new(Vec::new()),
        }
    }

    /// Creates a store pre-loaded with documents.
    ///
    /// Useful for tests and for file-backed stores restoring state.
    #[must_use]
    pub fn with_documents(name: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            name: RwLock::new(name.into()),
            documents: RwLock::new(documents),
        }
    }

    /// Returns the collection namespace.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Returns a snapshot of every document, in insertion order.
    #[must_use]
    pub fn dump(&self) -> Vec<Document> {
        self.documents.read().clone()
    }

    fn matching(&self, query: &Query) -> Vec<Document> {
        self.documents
            .read()
            .iter()
            .filter(|doc| matches_query(doc, query))
            .cloned()
            .collect()
    }
}

impl Store for MemoryStore {
    fn find(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let mut results = self.matching(query);

        if let Some(sort) = query.get("$sort").and_then(Value::as_object) {
            sort_documents(&mut results, sort);
        }
        if let Some(skip) = query.get("$skip").and_then(Value::as_u64) {
            let skip = (skip as usize).min(results.len());
            results.drain(..skip);
        }
        if let Some(limit) = query.get("$limit").and_then(Value::as_u64) {
            results.truncate(limit as usize);
        }
        if let Some(fields) = query.fields() {
            let projection = Projection::parse(fields)?;
            for doc in &mut results {
                projection.apply(doc);
            }
        }

        Ok(results)
    }

    fn first(&self, query: &Query) -> StoreResult<Option<Document>> {
        Ok(self.find(query)?.into_iter().next())
    }

    fn count(&self, query: &Query) -> StoreResult<u64> {
        Ok(self.matching(query).len() as u64)
    }

    fn insert(&self, mut doc: Document) -> StoreResult<Document> {
        if doc.id().is_none() {
            doc.set_id(self.create_unique_identifier());
        }
        self.documents.write().push(doc.clone());
        Ok(doc)
    }

    fn update(&self, target: &Query, changes: &Document) -> StoreResult<u64> {
        let mut documents = self.documents.write();
        let mut written = 0;

        for doc in documents.iter_mut() {
            if !matches_query(doc, target) {
                continue;
            }
            let id = doc.take_id();
            *doc = changes.clone();
            doc.remove(ID_KEY);
            if let Some(id) = id {
                doc.set_id(id);
            }
            written += 1;
        }

        Ok(written)
    }

    fn remove(&self, query: &Query) -> StoreResult<u64> {
        let mut documents = self.documents.write();
        let before = documents.len();
        documents.retain(|doc| !matches_query(doc, query));
        Ok((before - documents.len()) as u64)
    }

    fn rename(&self, new_name: &str) -> StoreResult<()> {
        *self.name.write() = new_name.to_string();
        Ok(())
    }

    fn create_unique_identifier(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Returns true if `doc` satisfies every match term of `query`.
fn matches_query(doc: &Document, query: &Query) -> bool {
    query.terms().all(|(key, expected)| {
        let actual = doc.get(key);
        match operator_terms(expected) {
            Some(operators) => operators
                .iter()
                .all(|(op, operand)| matches_operator(actual, op, operand)),
            None => actual == Some(expected),
        }
    })
}

/// Returns the operator map if `value` is an object whose keys all
/// start with `$`, i.e. an operator term rather than a literal match.
fn operator_terms(value: &Value) -> Option<&Map<String, Value>> {
    let map = value.as_object()?;
    if !map.is_empty() && map.keys().all(|key| key.starts_with('$')) {
        Some(map)
    } else {
        None
    }
}

fn matches_operator(actual: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$ne" => actual != Some(operand),
        "$in" => operand
            .as_array()
            .is_some_and(|candidates| actual.is_some_and(|value| candidates.contains(value))),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let Some(ordering) = actual.and_then(|value| compare_values(value, operand)) else {
                return false;
            };
            match op {
                "$gt" => ordering == Ordering::Greater,
                "$gte" => ordering != Ordering::Less,
                "$lt" => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
        // Unrecognized operators are pass-through dialect: ignore.
        _ => true,
    }
}

/// Orders two scalar JSON values, if they are comparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn sort_documents(documents: &mut [Document], sort: &Map<String, Value>) {
    documents.sort_by(|a, b| {
        for (field, direction) in sort {
            let ordering = match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let descending = direction.as_i64() == Some(-1);
            let ordering = if descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// A parsed `$fields` projection.
struct Projection {
    include: bool,
    keys: Vec<String>,
    id_excluded: bool,
}

impl Projection {
    fn parse(fields: &Map<String, Value>) -> StoreResult<Self> {
        let mut include = None;
        let mut keys = Vec::new();
        let mut id_excluded = false;

        for (key, value) in fields {
            let included = value.as_i64() != Some(0) && value != &Value::Bool(false);
            if key == ID_KEY && !included {
                id_excluded = true;
                continue;
            }
            match include {
                None => include = Some(included),
                Some(mode) if mode != included => {
                    return Err(StoreError::invalid_query(
                        "$fields cannot mix inclusion and exclusion",
                    ));
                }
                _ => {}
            }
            keys.push(key.clone());
        }

        Ok(Self {
            include: include.unwrap_or(false),
            keys,
            id_excluded,
        })
    }

    fn apply(&self, doc: &mut Document) {
        if self.include {
            // Keep listed keys; id survives unless excluded explicitly.
            doc.retain(|key, _| self.keys.iter().any(|k| k == key) || key == ID_KEY);
        } else {
            for key in &self.keys {
                doc.remove(key);
            }
        }
        if self.id_excluded {
            doc.remove(ID_KEY);
        }
    }
}
