//! Store trait definition.

use crate::document::{Document, Query};
use crate::error::StoreResult;

/// A document store for one collection namespace.
///
/// Stores are **opaque persistence backends**. The collection pipeline
/// owns validation, sanitization, and id assignment; the store only
/// matches, projects, and persists documents.
///
/// # Invariants
///
/// - Every persisted document has a non-empty string `id`
/// - `find` preserves a stable order between calls absent mutations
/// - `create_unique_identifier` never returns the same value twice
///   within one store
/// - Stores must be `Send + Sync`; locking across concurrent requests
///   is the store's responsibility
///
/// # Implementors
///
/// - [`crate::MemoryStore`] - For tests and ephemeral data
/// - [`crate::FileStore`] - For JSON-file persistence
pub trait Store: Send + Sync {
    /// Returns all documents matching `query`, shaped by any
    /// `$fields`/`$limit`/`$skip`/`$sort` operators the store supports.
    fn find(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Returns the first document matching `query`, if any.
    fn first(&self, query: &Query) -> StoreResult<Option<Document>>;

    /// Returns the number of documents matching `query`.
    fn count(&self, query: &Query) -> StoreResult<u64>;

    /// Inserts a document and returns it as stored.
    ///
    /// The caller assigns the id before insert; a store assigns one
    /// itself only if the document arrives without one.
    fn insert(&self, doc: Document) -> StoreResult<Document>;

    /// Replaces the non-id fields of every document matching `target`
    /// with `changes`. Returns the number of documents written.
    fn update(&self, target: &Query, changes: &Document) -> StoreResult<u64>;

    /// Removes every document matching `query`. An empty query removes
    /// the whole collection. Returns the number of documents removed.
    fn remove(&self, query: &Query) -> StoreResult<u64>;

    /// Renames the store's namespace.
    fn rename(&self, new_name: &str) -> StoreResult<()>;

    /// Returns a new identifier, collision-free within this store.
    fn create_unique_identifier(&self) -> String;
}
