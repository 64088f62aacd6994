//! Request and session model.
//!
//! The transport adapter is out of scope; this module is the surface
//! the pipeline consumes from it: method, path relative to the
//! collection mount, query mapping, payload, and the session
//! capabilities (`is_root`, broadcast).

use depot_store::{Document, ID_KEY};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// HTTP method of a collection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Find, count, or index-of.
    Get,
    /// Create, or update when an id is present.
    Post,
    /// Update, single or bulk.
    Put,
    /// Remove.
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Request payload: a single object, an ordered sequence of objects
/// (bulk create), or nothing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// No body.
    #[default]
    None,
    /// A single JSON object.
    One(Document),
    /// A sequence of JSON objects.
    Many(Vec<Document>),
}

impl Payload {
    /// Returns true if the payload is an ordered sequence.
    #[must_use]
    pub fn is_many(&self) -> bool {
        matches!(self, Self::Many(_))
    }

    /// Returns the single object, if the payload carries one.
    #[must_use]
    pub fn as_one(&self) -> Option<&Document> {
        match self {
            Self::One(doc) => Some(doc),
            _ => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::One(Document(map)),
            Value::Array(items) => Self::Many(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(map) => Some(Document(map)),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => Self::None,
        }
    }
}

/// A request addressed to one collection.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Path relative to the collection mount (`/`, `/<id>`,
    /// `/<id>/<subresource>`).
    pub path: String,
    /// Query mapping, before sanitization.
    pub query: Map<String, Value>,
    /// Request payload.
    pub body: Payload,
}

impl Request {
    /// Creates a request with an empty query and no body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Map::new(),
            body: Payload::None,
        }
    }

    /// Sets the query from a JSON object; non-objects leave it empty.
    #[must_use]
    pub fn with_query(mut self, query: Value) -> Self {
        if let Value::Object(map) = query {
            self.query = map;
        }
        self
    }

    /// Sets the payload from a JSON value.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Payload::from(body);
        self
    }

    /// Returns the non-empty path segments.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|part| !part.is_empty()).collect()
    }

    /// Returns the id slot of the URL: the segment after the
    /// collection base path.
    #[must_use]
    pub fn url_id(&self) -> Option<&str> {
        self.segments().first().copied()
    }

    /// Returns the query's id term, if it is a literal string.
    #[must_use]
    pub fn query_id(&self) -> Option<&str> {
        self.query.get(ID_KEY).and_then(Value::as_str)
    }

    /// Normalizes the query's id from `query.id`, the URL id slot, or
    /// `body.id`, in that order.
    pub fn normalize_id(&mut self) {
        if self.query.contains_key(ID_KEY) {
            return;
        }
        let resolved = self
            .url_id()
            .map(str::to_string)
            .or_else(|| match &self.body {
                Payload::One(doc) => doc.id().map(str::to_string),
                _ => None,
            });
        if let Some(id) = resolved {
            self.query.insert(ID_KEY.to_string(), Value::String(id));
        }
    }

    /// Returns true if the caller asked to skip event scripts, via
    /// `$skipEvents` in the body or the query. Only root sessions get
    /// to act on this.
    #[must_use]
    pub fn skip_events_requested(&self) -> bool {
        let from_body = self
            .body
            .as_one()
            .and_then(|doc| doc.get("$skipEvents"))
            .is_some_and(is_truthy);
        from_body || self.query.get("$skipEvents").is_some_and(is_truthy)
    }
}

/// Truthiness the way scripts expect it: `false`, `0`, `""`, and null
/// are falsy; everything else is truthy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Out-of-band event sink: the transport's "emit to every connected
/// client" capability.
pub trait Broadcast: Send + Sync {
    /// Emits a named event to all connected clients.
    fn emit_to_all(&self, event: &str);
}

/// The session surface the pipeline consumes: root flag plus an
/// optional broadcast capability.
#[derive(Clone, Default)]
pub struct Session {
    root: bool,
    broadcast: Option<Arc<dyn Broadcast>>,
}

impl Session {
    /// Creates a non-root session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Creates a root session.
    #[must_use]
    pub fn root() -> Self {
        Self {
            root: true,
            broadcast: None,
        }
    }

    /// Attaches a broadcast capability.
    #[must_use]
    pub fn with_broadcast(mut self, broadcast: Arc<dyn Broadcast>) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    /// Returns true for root sessions.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Emits an event to all connected clients, if the transport
    /// provided a broadcast capability.
    pub fn emit_to_all(&self, event: &str) {
        if let Some(broadcast) = &self.broadcast {
            broadcast.emit_to_all(event);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("root", &self.root)
            .field("broadcast", &self.broadcast.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_from_url_segment() {
        let mut req = Request::new(Method::Get, "/abc123");
        req.normalize_id();
        assert_eq!(req.query_id(), Some("abc123"));
    }

    #[test]
    fn query_id_wins_over_url() {
        let mut req = Request::new(Method::Get, "/abc").with_query(json!({"id": "xyz"}));
        req.normalize_id();
        assert_eq!(req.query_id(), Some("xyz"));
    }

    #[test]
    fn id_from_body() {
        let mut req = Request::new(Method::Post, "/").with_body(json!({"id": "b1"}));
        req.normalize_id();
        assert_eq!(req.query_id(), Some("b1"));
    }

    #[test]
    fn no_id_anywhere() {
        let mut req = Request::new(Method::Get, "/");
        req.normalize_id();
        assert_eq!(req.query_id(), None);
    }

    #[test]
    fn array_body_is_many() {
        let req = Request::new(Method::Post, "/").with_body(json!([{"a": 1}, {"b": 2}]));
        assert!(req.body.is_many());
    }

    #[test]
    fn scalar_body_is_none() {
        let req = Request::new(Method::Post, "/").with_body(json!("just a string"));
        assert_eq!(req.body, Payload::None);
    }

    #[test]
    fn skip_events_from_query_and_body() {
        let req = Request::new(Method::Post, "/").with_query(json!({"$skipEvents": true}));
        assert!(req.skip_events_requested());

        let req = Request::new(Method::Post, "/").with_body(json!({"$skipEvents": 1}));
        assert!(req.skip_events_requested());

        let req = Request::new(Method::Post, "/").with_body(json!({"$skipEvents": 0}));
        assert!(!req.skip_events_requested());

        let req = Request::new(Method::Post, "/");
        assert!(!req.skip_events_requested());
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(2)));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn segments_split() {
        let req = Request::new(Method::Get, "/index-of/abc");
        assert_eq!(req.segments(), vec!["index-of", "abc"]);
        assert_eq!(req.url_id(), Some("index-of"));
    }

    #[test]
    fn session_flags() {
        assert!(Session::root().is_root());
        assert!(!Session::anonymous().is_root());
        // No broadcast attached: emitting is a no-op.
        Session::anonymous().emit_to_all("todos:changed");
    }
}
