//! Document and query value types.
//!
//! Documents are dynamic JSON maps: the collection layer validates and
//! sanitizes known properties, but a stored document may carry fields
//! beyond its schema if written by other paths, so the value type stays
//! schemaless here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};

/// Key under which a document carries its store-assigned identifier.
pub const ID_KEY: &str = "id";

/// A single stored record: a JSON object with a string `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(pub Map<String, Value>);

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the document's identifier, if it carries a string id.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_KEY).and_then(Value::as_str)
    }

    /// Sets the document's identifier.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert(ID_KEY.to_string(), Value::String(id.into()));
    }

    /// Removes the identifier, returning it if it was a string.
    pub fn take_id(&mut self) -> Option<String> {
        match self.0.remove(ID_KEY) {
            Some(Value::String(id)) => Some(id),
            _ => None,
        }
    }

    /// Merges `other` into `self`; fields in `other` win.
    pub fn merge(&mut self, other: Document) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }
}

impl Deref for Document {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Document {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.0)
    }
}

/// A store query: a pass-through JSON mapping.
///
/// Plain keys are match terms; `$`-prefixed keys are store-defined
/// operators (`$fields` projects, `$limit`/`$skip`/`$sort` shape the
/// result set in the bundled backends).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(pub Map<String, Value>);

impl Query {
    /// Creates an empty query (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query matching a single document by id.
    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(ID_KEY.to_string(), Value::String(id.into()));
        Self(map)
    }

    /// Returns the id term, if the query carries a literal string id.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_KEY).and_then(Value::as_str)
    }

    /// Returns the `$fields` projection, if present.
    #[must_use]
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.0.get("$fields").and_then(Value::as_object)
    }

    /// Returns the match terms: every key not starting with `$`.
    pub fn terms(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter().filter(|(key, _)| !key.starts_with('$'))
    }
}

impl Deref for Query {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Query {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Map<String, Value>> for Query {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
