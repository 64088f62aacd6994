//! Script invocation contract and the per-invocation sandbox.
//!
//! The sandboxed script runtime itself lives outside this crate; only
//! the invocation contract is defined here. Each lifecycle event
//! receives a [`ScriptContext`] (the consumed request surface) and a
//! fresh [`ScriptDomain`] (the capability object for the current
//! document), and signals an engine-level failure by returning an
//! error. Validation-style failures go through [`ScriptDomain::error`]
//! instead.

use crate::error::ValidationErrors;
use crate::request::{Method, Session};
use depot_store::Document;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Lifecycle points a collection can attach a script to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Runs per document on reads.
    Get,
    /// Runs after schema validation on writes.
    Validate,
    /// Runs before inserting a new document.
    Post,
    /// Runs before committing an update.
    Put,
    /// Runs per fetched document before removal.
    Delete,
    /// Reshapes list queries before the find.
    Query,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "Get",
            Self::Validate => "Validate",
            Self::Post => "Post",
            Self::Put => "Put",
            Self::Delete => "Delete",
            Self::Query => "Query",
        };
        f.write_str(name)
    }
}

/// An engine-level script failure: the runtime itself broke, as
/// opposed to the script reporting value errors. Aborts the request.
#[derive(Debug, Clone, Error)]
#[error("script failure: {message}")]
pub struct ScriptFailure {
    /// Description from the script runtime.
    pub message: String,
}

impl ScriptFailure {
    /// Creates a script failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The request surface handed to a script alongside its domain.
#[derive(Debug, Clone, Copy)]
pub struct ScriptContext<'a> {
    /// Request method.
    pub method: Method,
    /// Request query, after id normalization.
    pub query: &'a Map<String, Value>,
    /// The caller's session.
    pub session: &'a Session,
}

/// The access decision a script can take via `allow`/`prevent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Bypass the permission verifier for this request.
    Allow,
    /// Deny the request regardless of the verifier.
    Prevent,
}

/// The sandbox passed to an event script for the current document.
///
/// Created fresh per document per event and discarded after the
/// script returns; the orchestrator takes the (possibly mutated) data
/// back out with [`ScriptDomain::into_data`].
#[derive(Debug, Clone, Default)]
pub struct ScriptDomain {
    data: Document,
    previous: Document,
    errors: ValidationErrors,
    decision: Option<AccessDecision>,
}

impl ScriptDomain {
    /// Creates a domain for a create or read: no previous snapshot.
    #[must_use]
    pub fn new(data: Document) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Creates a domain for an update, with the pre-mutation snapshot.
    #[must_use]
    pub fn with_previous(data: Document, previous: Document) -> Self {
        Self {
            data,
            previous,
            ..Self::default()
        }
    }

    /// The current document.
    #[must_use]
    pub fn data(&self) -> &Document {
        &self.data
    }

    /// Mutable access to the current document.
    pub fn data_mut(&mut self) -> &mut Document {
        &mut self.data
    }

    /// The snapshot before mutation; empty for creates and reads.
    #[must_use]
    pub fn previous(&self) -> &Document {
        &self.previous
    }

    /// Consumes the domain, returning the document as the script left
    /// it.
    #[must_use]
    pub fn into_data(self) -> Document {
        self.data
    }

    /// Records a value error against a property.
    pub fn error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(key.into(), message.into());
    }

    /// Records an error when `condition` holds.
    pub fn error_if(
        &mut self,
        condition: bool,
        key: impl Into<String>,
        message: impl Into<String>,
    ) {
        if condition {
            self.error(key, message);
        }
    }

    /// Records an error unless `condition` holds.
    pub fn error_unless(
        &mut self,
        condition: bool,
        key: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.error_if(!condition, key, message);
    }

    /// Returns true if the script reported any value errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The collected value errors.
    #[must_use]
    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Takes the collected errors out of the domain.
    pub(crate) fn take_errors(&mut self) -> ValidationErrors {
        std::mem::take(&mut self.errors)
    }

    /// Removes a property from the outgoing document.
    pub fn protect(&mut self, property: &str) {
        self.data.remove(property);
    }

    /// Removes a property from the outgoing document.
    pub fn hide(&mut self, property: &str) {
        self.data.remove(property);
    }

    /// Returns true if the property differs from the previous
    /// snapshot. On creates (empty snapshot) this is true whenever the
    /// property is present.
    #[must_use]
    pub fn changed(&self, property: &str) -> bool {
        self.data.get(property) != self.previous.get(property)
    }

    /// Bypasses the permission verifier, unless a `prevent` already
    /// stuck.
    pub fn allow(&mut self) {
        if self.decision != Some(AccessDecision::Prevent) {
            self.decision = Some(AccessDecision::Allow);
        }
    }

    /// Denies the request regardless of the verifier. Sticky: a later
    /// `allow` does not undo it.
    pub fn prevent(&mut self) {
        self.decision = Some(AccessDecision::Prevent);
    }

    /// The access decision the script took, if any.
    #[must_use]
    pub fn decision(&self) -> Option<AccessDecision> {
        self.decision
    }
}

/// A compiled event script handle.
///
/// Implementations wrap the sandboxed runtime; tests use closures,
/// which implement the trait directly.
pub trait EventScript: Send + Sync {
    /// Runs the script for one document.
    ///
    /// An `Err` is an engine-level failure and aborts the request;
    /// value errors are reported through the domain.
    fn run(
        &self,
        ctx: &ScriptContext<'_>,
        domain: &mut ScriptDomain,
    ) -> Result<(), ScriptFailure>;
}

impl<F> EventScript for F
where
    F: Fn(&ScriptContext<'_>, &mut ScriptDomain) -> Result<(), ScriptFailure> + Send + Sync,
{
    fn run(
        &self,
        ctx: &ScriptContext<'_>,
        domain: &mut ScriptDomain,
    ) -> Result<(), ScriptFailure> {
        self(ctx, domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => Document(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn error_collection() {
        let mut domain = ScriptDomain::new(Document::new());
        assert!(!domain.has_errors());

        domain.error("title", "too short");
        domain.error_if(true, "votes", "too many");
        domain.error_unless(true, "done", "unreachable");

        assert!(domain.has_errors());
        assert_eq!(domain.errors().len(), 2);
        assert!(!domain.errors().contains_key("done"));
    }

    #[test]
    fn protect_and_hide_remove_from_data() {
        let mut domain = ScriptDomain::new(doc(json!({"title": "a", "secret": "s"})));
        domain.protect("secret");
        assert!(domain.data().get("secret").is_none());

        domain.hide("title");
        assert!(domain.into_data().is_empty());
    }

    #[test]
    fn changed_against_previous() {
        let domain = ScriptDomain::with_previous(
            doc(json!({"title": "new", "votes": 3})),
            doc(json!({"title": "old", "votes": 3})),
        );
        assert!(domain.changed("title"));
        assert!(!domain.changed("votes"));
        assert!(!domain.changed("missing"));
    }

    #[test]
    fn changed_on_create_means_present() {
        let domain = ScriptDomain::new(doc(json!({"title": "a"})));
        assert!(domain.changed("title"));
        assert!(!domain.changed("votes"));
    }

    #[test]
    fn prevent_is_sticky() {
        let mut domain = ScriptDomain::new(Document::new());
        domain.prevent();
        domain.allow();
        assert_eq!(domain.decision(), Some(AccessDecision::Prevent));

        let mut domain = ScriptDomain::new(Document::new());
        domain.allow();
        assert_eq!(domain.decision(), Some(AccessDecision::Allow));
    }

    #[test]
    fn closures_are_scripts() {
        let script = |_ctx: &ScriptContext<'_>, domain: &mut ScriptDomain| -> Result<(), ScriptFailure> {
            domain.error("field", "bad");
            Ok(())
        };

        let session = Session::anonymous();
        let query = Map::new();
        let ctx = ScriptContext {
            method: Method::Get,
            query: &query,
            session: &session,
        };

        let mut domain = ScriptDomain::new(Document::new());
        EventScript::run(&script, &ctx, &mut domain).unwrap();
        assert!(domain.has_errors());
    }
}
