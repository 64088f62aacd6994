//! Collection lifecycle orchestrator.
//!
//! Wires the pipeline together: intent resolution, sanitization,
//! permission checks, event scripts, mutation commands, the store, and
//! change notification, in that order per request shape.

use crate::commands::{build_commands, exec_commands, Commands};
use crate::error::{CollectionError, CollectionResult};
use crate::notify::{ChangeEvent, ChangeKind, Notifier};
use crate::permissions::{
    required_permissions, DefaultVerifier, Permission, PermissionVerifier,
};
use crate::request::{Method, Payload, Request, Session};
use crate::schema::Schema;
use crate::script::{
    AccessDecision, EventKind, EventScript, ScriptContext, ScriptDomain, ScriptFailure,
};
use depot_store::{Document, Query, Store, StoreError, ID_KEY};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Configuration of one collection: name, schema, and scripts.
#[derive(Default)]
pub struct CollectionConfig {
    name: String,
    schema: Schema,
    events: HashMap<EventKind, Arc<dyn EventScript>>,
    routes: HashMap<String, Arc<dyn EventScript>>,
}

impl CollectionConfig {
    /// Creates a config with no scripts attached.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            events: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// The collection name; doubles as the store namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches a lifecycle event script. At most one per event; a
    /// second call for the same event replaces the first.
    #[must_use]
    pub fn on(mut self, event: EventKind, script: impl EventScript + 'static) -> Self {
        self.events.insert(event, Arc::new(script));
        self
    }

    /// Mounts a script under a subresource path segment. Requests
    /// whose id slot names it skip the standard pipeline.
    #[must_use]
    pub fn route(mut self, segment: impl Into<String>, script: impl EventScript + 'static) -> Self {
        self.routes.insert(segment.into(), Arc::new(script));
        self
    }
}

impl fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("name", &self.name)
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// The reply to a collection request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// A single document.
    One(Document),
    /// A sequence of documents.
    Many(Vec<Document>),
    /// A count reply: `{"count": n}`.
    Count(u64),
    /// An index-of reply: `{"index": n}`, -1 when absent.
    Index(i64),
    /// The ids written by a bulk update.
    UpdatedIds(Vec<String>),
    /// Nothing to report (successful delete).
    Empty,
}

impl Response {
    /// Renders the wire body for this response.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::One(doc) => Value::Object(doc.0.clone()),
            Self::Many(docs) => Value::Array(docs.iter().cloned().map(Value::from).collect()),
            Self::Count(count) => json!({ "count": count }),
            Self::Index(index) => json!({ "index": index }),
            Self::UpdatedIds(ids) => json!(ids),
            Self::Empty => Value::Null,
        }
    }
}

/// A schema-validated, event-scriptable collection resource.
///
/// Owns its schema and script handles; borrows the store for the
/// duration of each call. Holds no cross-request mutable state, so one
/// instance serves concurrent requests.
pub struct Collection {
    name: String,
    schema: Schema,
    events: HashMap<EventKind, Arc<dyn EventScript>>,
    routes: HashMap<String, Arc<dyn EventScript>>,
    store: Arc<dyn Store>,
    verifier: Arc<dyn PermissionVerifier>,
    notifier: Notifier,
}

impl Collection {
    /// Creates a collection over the given store, with the default
    /// permission verifier.
    #[must_use]
    pub fn new(config: CollectionConfig, store: Arc<dyn Store>) -> Self {
        let notifier = Notifier::new(config.name.clone());
        Self {
            name: config.name,
            schema: config.schema,
            events: config.events,
            routes: config.routes,
            store,
            verifier: Arc::new(DefaultVerifier),
            notifier,
        }
    }

    /// Replaces the permission verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn PermissionVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Subscribes to this collection's change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    /// Handles one request: resolves the intent, runs the pipeline,
    /// and returns the reply or the first error along the way.
    pub fn handle(&self, mut request: Request, session: &Session) -> CollectionResult<Response> {
        request.normalize_id();
        // Only root gets to suppress event scripts.
        let run_events = !(request.skip_events_requested() && session.is_root());

        if request.method == Method::Get {
            match request.query_id() {
                Some("count") => return self.count_route(&request, session),
                Some("index-of") => return self.index_of_route(&request, session),
                _ => {}
            }
        }

        if let Some(script) = request.url_id().and_then(|segment| self.routes.get(segment)) {
            return self.custom_route(&script.clone(), &request, session);
        }

        match request.method {
            Method::Get => self.find(request, session, run_events),
            Method::Post | Method::Put => self.save(&request, session, run_events),
            Method::Delete => self.remove(&request, session, run_events),
        }
    }

    /// Reacts to a config change: renames the store when the name
    /// differs, then adopts the new schema and scripts.
    pub fn config_changed(&mut self, config: CollectionConfig) -> CollectionResult<()> {
        if config.name != self.name {
            info!(from = %self.name, to = %config.name, "renaming collection");
            self.store.rename(&config.name)?;
            self.notifier.set_collection(&config.name);
            self.name = config.name;
        }
        self.schema = config.schema;
        self.events = config.events;
        self.routes = config.routes;
        Ok(())
    }

    /// Reacts to config deletion: drops every document.
    pub fn config_removed(&self) -> CollectionResult<()> {
        info!(collection = %self.name, "dropping collection");
        self.store.remove(&Query::new())?;
        Ok(())
    }

    fn script_context<'a>(&self, request: &'a Request, session: &'a Session) -> ScriptContext<'a> {
        ScriptContext {
            method: request.method,
            query: &request.query,
            session,
        }
    }

    fn event(&self, kind: EventKind, run_events: bool) -> Option<Arc<dyn EventScript>> {
        if run_events {
            self.events.get(&kind).cloned()
        } else {
            None
        }
    }

    /// Runs a script and folds its value errors into the pipeline
    /// error flow: engine failures abort, domain errors become a
    /// validation reply.
    fn run_script(
        &self,
        script: &Arc<dyn EventScript>,
        ctx: &ScriptContext<'_>,
        domain: &mut ScriptDomain,
    ) -> CollectionResult<()> {
        script.run(ctx, domain)?;
        if domain.has_errors() {
            return Err(CollectionError::script_errors(domain.take_errors()));
        }
        Ok(())
    }

    fn check_permissions(
        &self,
        session: &Session,
        required: &BTreeSet<Permission>,
        decision: Option<AccessDecision>,
    ) -> CollectionResult<()> {
        match decision {
            Some(AccessDecision::Prevent) => Err(CollectionError::forbidden("Not allowed")),
            Some(AccessDecision::Allow) => Ok(()),
            None => self.verifier.verify(session, required),
        }
    }

    fn count_route(&self, request: &Request, session: &Session) -> CollectionResult<Response> {
        if !session.is_root() {
            return Err(CollectionError::forbidden("Must be root to count"));
        }
        let mut query = request.query.clone();
        query.remove(ID_KEY);
        let sanitized = self.schema.sanitize_query(&query);
        Ok(Response::Count(self.store.count(&sanitized)?))
    }

    fn index_of_route(&self, request: &Request, session: &Session) -> CollectionResult<Response> {
        if !session.is_root() {
            return Err(CollectionError::forbidden("Must be root to get index-of"));
        }
        let Some(target) = request.segments().get(1).map(|s| (*s).to_string()) else {
            return Err(CollectionError::bad_request(
                "You must include an id to get the index of",
            ));
        };

        let mut query = request.query.clone();
        query.remove(ID_KEY);
        let mut sanitized = self.schema.sanitize_query(&query);
        sanitized.insert("$fields".to_string(), json!({ "id": 1 }));

        let found = self.store.find(&sanitized)?;
        let index = found
            .iter()
            .position(|doc| doc.id() == Some(target.as_str()))
            .map_or(-1, |position| position as i64);
        Ok(Response::Index(index))
    }

    fn custom_route(
        &self,
        script: &Arc<dyn EventScript>,
        request: &Request,
        session: &Session,
    ) -> CollectionResult<Response> {
        let data = request.body.as_one().cloned().unwrap_or_default();
        let ctx = self.script_context(request, session);
        let mut domain = ScriptDomain::new(data);
        self.run_script(script, &ctx, &mut domain)?;
        Ok(Response::One(domain.into_data()))
    }

    fn find(
        &self,
        mut request: Request,
        session: &Session,
        run_events: bool,
    ) -> CollectionResult<Response> {
        // Query-shaping hook: list queries only, before the find.
        let is_list = request.query_id().is_none() && request.segments().is_empty();
        if is_list {
            if let Some(script) = self.event(EventKind::Query, run_events) {
                let mut domain = ScriptDomain::new(Document(request.query.clone()));
                {
                    let ctx = self.script_context(&request, session);
                    self.run_script(&script, &ctx, &mut domain)?;
                }
                request.query = domain.into_data().0;
            }
        }

        let required = required_permissions(&request);
        self.check_permissions(session, &required, None)?;

        let sanitized = self.schema.sanitize_query(&request.query);
        let single = sanitized.id().is_some();
        let mut results = self.store.find(&sanitized)?;

        if single {
            if results.is_empty() {
                return Err(CollectionError::not_found("not found"));
            }
            let doc = results.swap_remove(0);
            let doc = match self.event(EventKind::Get, run_events) {
                Some(script) => {
                    let ctx = self.script_context(&request, session);
                    let mut domain = ScriptDomain::new(doc);
                    self.run_script(&script, &ctx, &mut domain)?;
                    domain.into_data()
                }
                None => doc,
            };
            return Ok(Response::One(doc));
        }

        if let Some(script) = self.event(EventKind::Get, run_events) {
            let ctx = self.script_context(&request, session);
            results = self.fan_out_get(&script, &ctx, results)?;
        }
        Ok(Response::Many(results))
    }

    /// Runs the Get script once per document, concurrently, and keeps
    /// the documents the script left error-free, in store order.
    fn fan_out_get(
        &self,
        script: &Arc<dyn EventScript>,
        ctx: &ScriptContext<'_>,
        documents: Vec<Document>,
    ) -> CollectionResult<Vec<Document>> {
        let outcomes: Vec<Result<Option<Document>, ScriptFailure>> = thread::scope(|scope| {
            let handles: Vec<_> = documents
                .into_iter()
                .map(|doc| {
                    scope.spawn(move || {
                        let mut domain = ScriptDomain::new(doc);
                        script.run(ctx, &mut domain)?;
                        if domain.has_errors() {
                            debug!(id = ?domain.data().id(), "filtering document from list reply");
                            Ok(None)
                        } else {
                            Ok(Some(domain.into_data()))
                        }
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(ScriptFailure::new("get script panicked")))
                })
                .collect()
        });

        let mut kept = Vec::new();
        for outcome in outcomes {
            if let Some(doc) = outcome? {
                kept.push(doc);
            }
        }
        Ok(kept)
    }

    fn save(
        &self,
        request: &Request,
        session: &Session,
        run_events: bool,
    ) -> CollectionResult<Response> {
        match request.body.clone() {
            Payload::Many(items) if request.method == Method::Post => {
                self.post_many(request, session, run_events, items)
            }
            Payload::One(raw) => {
                let commands = build_commands(&raw);
                if request.query_id().is_some() {
                    self.put_one(request, session, run_events, &raw, &commands)
                } else if request.method == Method::Put {
                    self.save_all(request, session, run_events, &raw, &commands)
                } else {
                    self.post_one(request, session, run_events, &raw)
                }
            }
            Payload::Many(_) | Payload::None => Err(CollectionError::bad_request(
                "You must include an object when saving or updating",
            )),
        }
    }

    /// Sanitizes, validates, and scripts one item on its way to an
    /// insert. Shared by single and bulk create.
    fn prepare_insert(
        &self,
        ctx: &ScriptContext<'_>,
        session: &Session,
        run_events: bool,
        required: &BTreeSet<Permission>,
        raw: &Document,
    ) -> CollectionResult<Document> {
        let mut item = self.schema.sanitize(raw);
        let errors = self.schema.validate(&mut item, true);
        if !errors.is_empty() {
            return Err(CollectionError::schema_errors(errors));
        }
        item.set_id(self.store.create_unique_identifier());

        if let Some(script) = self.event(EventKind::Validate, run_events) {
            let mut domain = ScriptDomain::new(item);
            self.run_script(&script, ctx, &mut domain)?;
            item = domain.into_data();
        }

        let mut decision = None;
        if let Some(script) = self.event(EventKind::Post, run_events) {
            let mut domain = ScriptDomain::new(item);
            self.run_script(&script, ctx, &mut domain)?;
            decision = domain.decision();
            item = domain.into_data();
        }

        self.check_permissions(session, required, decision)?;
        Ok(item)
    }

    fn post_one(
        &self,
        request: &Request,
        session: &Session,
        run_events: bool,
        raw: &Document,
    ) -> CollectionResult<Response> {
        let ctx = self.script_context(request, session);
        let required = required_permissions(request);

        let item = self.prepare_insert(&ctx, session, run_events, &required, raw)?;
        let inserted = self.store.insert(item)?;
        self.notifier.notify(ChangeKind::Created, session);
        Ok(Response::One(inserted))
    }

    fn post_many(
        &self,
        request: &Request,
        session: &Session,
        run_events: bool,
        items: Vec<Document>,
    ) -> CollectionResult<Response> {
        let ctx = self.script_context(request, session);
        let required = required_permissions(request);

        // First error short-circuits the batch before any insert.
        let mut prepared = Vec::with_capacity(items.len());
        for raw in &items {
            prepared.push(self.prepare_insert(&ctx, session, run_events, &required, raw)?);
        }

        let mut saved = Vec::with_capacity(prepared.len());
        for item in prepared {
            saved.push(self.store.insert(item)?);
        }
        if !saved.is_empty() {
            self.notifier.notify(ChangeKind::Created, session);
        }
        Ok(Response::Many(saved))
    }

    /// Merges sanitized changes over an existing document, applies
    /// commands, validates, runs the Validate and Put scripts, and
    /// checks permissions. Shared by single and bulk update.
    fn merge_for_update(
        &self,
        ctx: &ScriptContext<'_>,
        session: &Session,
        run_events: bool,
        required: &BTreeSet<Permission>,
        existing: Document,
        changes: Document,
        commands: &Commands,
    ) -> CollectionResult<Document> {
        let previous = existing.clone();
        let mut merged = existing;
        merged.merge(changes);
        exec_commands(&mut merged, commands);

        let errors = self.schema.validate(&mut merged, false);
        if !errors.is_empty() {
            return Err(CollectionError::schema_errors(errors));
        }

        if let Some(script) = self.event(EventKind::Validate, run_events) {
            let mut domain = ScriptDomain::with_previous(merged, previous.clone());
            self.run_script(&script, ctx, &mut domain)?;
            merged = domain.into_data();
        }

        let mut decision = None;
        if let Some(script) = self.event(EventKind::Put, run_events) {
            let mut domain = ScriptDomain::with_previous(merged, previous);
            self.run_script(&script, ctx, &mut domain)?;
            decision = domain.decision();
            merged = domain.into_data();
        }

        self.check_permissions(session, required, decision)?;
        Ok(merged)
    }

    fn put_one(
        &self,
        request: &Request,
        session: &Session,
        run_events: bool,
        raw: &Document,
        commands: &Commands,
    ) -> CollectionResult<Response> {
        let sanitized_query = self.schema.sanitize_query(&request.query);
        let Some(existing) = self.store.first(&sanitized_query)? else {
            let message = if sanitized_query.len() == 1 {
                "No object exists with that id"
            } else {
                "No object exists that matches that query"
            };
            return Err(CollectionError::not_found(message));
        };

        let ctx = self.script_context(request, session);
        let required = required_permissions(request);

        let mut changes = self.schema.sanitize(raw);
        changes.remove(ID_KEY);
        let mut merged = self.merge_for_update(
            &ctx, session, run_events, &required, existing, changes, commands,
        )?;

        let Some(id) = merged.take_id() else {
            return Err(StoreError::backend("stored document missing id").into());
        };
        self.store.update(&Query::by_id(&id), &merged)?;
        merged.set_id(id);

        self.notifier.notify(ChangeKind::Updated, session);
        Ok(Response::One(merged))
    }

    fn save_all(
        &self,
        request: &Request,
        session: &Session,
        run_events: bool,
        raw: &Document,
        commands: &Commands,
    ) -> CollectionResult<Response> {
        let sanitized_query = self.schema.sanitize_query(&request.query);
        let targets = self.store.find(&sanitized_query)?;

        let ctx = self.script_context(request, session);
        let required = required_permissions(request);
        let mut changes = self.schema.sanitize(raw);
        changes.remove(ID_KEY);

        // Assemble the whole batch first; any per-object failure
        // short-circuits before a single write is issued.
        let mut batch = Vec::with_capacity(targets.len());
        for existing in targets {
            let mut merged = self.merge_for_update(
                &ctx,
                session,
                run_events,
                &required,
                existing,
                changes.clone(),
                commands,
            )?;
            let Some(id) = merged.take_id() else {
                return Err(StoreError::backend("stored document missing id").into());
            };
            batch.push((id, merged));
        }

        let mut updated = Vec::with_capacity(batch.len());
        for (id, merged) in batch {
            self.store.update(&Query::by_id(&id), &merged)?;
            updated.push(id);
        }
        if !updated.is_empty() {
            self.notifier.notify(ChangeKind::Updated, session);
        }
        Ok(Response::UpdatedIds(updated))
    }

    fn remove(
        &self,
        request: &Request,
        session: &Session,
        run_events: bool,
    ) -> CollectionResult<Response> {
        let sanitized = self.schema.sanitize_query(&request.query);
        if sanitized.terms().next().is_none() {
            return Err(CollectionError::bad_request(
                "You must include a query or an id when deleting an object from a collection",
            ));
        }

        let found = self.store.find(&sanitized)?;

        let mut decision = None;
        if let Some(script) = self.event(EventKind::Delete, run_events) {
            let ctx = self.script_context(request, session);
            for doc in found {
                let mut domain = ScriptDomain::new(doc);
                self.run_script(&script, &ctx, &mut domain)?;
                match domain.decision() {
                    Some(AccessDecision::Prevent) => decision = Some(AccessDecision::Prevent),
                    Some(AccessDecision::Allow) if decision.is_none() => {
                        decision = Some(AccessDecision::Allow);
                    }
                    _ => {}
                }
            }
        }

        let required = required_permissions(request);
        self.check_permissions(session, &required, decision)?;

        self.store.remove(&sanitized)?;
        self.notifier.notify(ChangeKind::Removed, session);
        Ok(Response::Empty)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropertyDescriptor, PropertyType};
    use depot_store::MemoryStore;

    fn todo_collection() -> (Collection, Arc<MemoryStore>) {
        let schema = Schema::new()
            .with(PropertyDescriptor::new("title", PropertyType::String).required())
            .with(PropertyDescriptor::new("votes", PropertyType::Number))
            .with(PropertyDescriptor::new("done", PropertyType::Boolean));
        let store = Arc::new(MemoryStore::new("todos"));
        let collection = Collection::new(
            CollectionConfig::new("todos", schema),
            Arc::clone(&store) as Arc<dyn Store>,
        );
        (collection, store)
    }

    #[test]
    fn count_requires_root() {
        let (collection, _) = todo_collection();
        let request = Request::new(Method::Get, "/count");

        let err = collection
            .handle(request.clone(), &Session::anonymous())
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.to_string(), "Must be root to count");

        let response = collection.handle(request, &Session::root()).unwrap();
        assert_eq!(response, Response::Count(0));
    }

    #[test]
    fn index_of_finds_position() {
        let (collection, _) = todo_collection();
        for title in ["one", "two", "three"] {
            collection
                .handle(
                    Request::new(Method::Post, "/").with_body(json!({ "title": title })),
                    &Session::root(),
                )
                .unwrap();
        }
        let all = collection
            .handle(Request::new(Method::Get, "/"), &Session::root())
            .unwrap();
        let Response::Many(docs) = all else { panic!("expected list") };
        let second = docs[1].id().unwrap().to_string();

        let response = collection
            .handle(
                Request::new(Method::Get, format!("/index-of/{second}")),
                &Session::root(),
            )
            .unwrap();
        assert_eq!(response, Response::Index(1));

        let response = collection
            .handle(
                Request::new(Method::Get, "/index-of/missing"),
                &Session::root(),
            )
            .unwrap();
        assert_eq!(response, Response::Index(-1));
    }

    #[test]
    fn custom_route_preempts_pipeline() {
        let schema = Schema::new();
        let config = CollectionConfig::new("todos", schema).route(
            "echo",
            |_ctx: &ScriptContext<'_>, domain: &mut ScriptDomain| -> Result<(), ScriptFailure> {
                let value = domain.data().get("ping").cloned();
                if let Some(value) = value {
                    domain.data_mut().insert("pong".to_string(), value);
                }
                Ok(())
            },
        );
        let collection = Collection::new(config, Arc::new(MemoryStore::new("todos")));

        let response = collection
            .handle(
                Request::new(Method::Post, "/echo").with_body(json!({ "ping": 1 })),
                &Session::anonymous(),
            )
            .unwrap();
        let Response::One(doc) = response else { panic!("expected document") };
        assert_eq!(doc.get("pong"), Some(&json!(1)));
    }

    #[test]
    fn config_rename_propagates_to_store() {
        let (mut collection, store) = todo_collection();
        collection
            .config_changed(CollectionConfig::new("tasks", Schema::new()))
            .unwrap();
        assert_eq!(collection.name(), "tasks");
        assert_eq!(store.name(), "tasks");
    }

    #[test]
    fn config_removed_drops_documents() {
        let (collection, store) = todo_collection();
        collection
            .handle(
                Request::new(Method::Post, "/").with_body(json!({ "title": "x" })),
                &Session::root(),
            )
            .unwrap();
        assert_eq!(store.dump().len(), 1);

        collection.config_removed().unwrap();
        assert!(store.dump().is_empty());
    }

    #[test]
    fn delete_without_query_is_rejected() {
        let (collection, _) = todo_collection();
        let err = collection
            .handle(Request::new(Method::Delete, "/"), &Session::root())
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn response_bodies() {
        assert_eq!(Response::Count(3).to_json(), json!({ "count": 3 }));
        assert_eq!(Response::Index(-1).to_json(), json!({ "index": -1 }));
        assert_eq!(
            Response::UpdatedIds(vec!["a".to_string()]).to_json(),
            json!(["a"])
        );
        assert_eq!(Response::Empty.to_json(), Value::Null);
    }
}
