//! File-backed document store.

use crate::document::{Document, Query};
use crate::error::StoreResult;
use crate::memory::MemoryStore;
use crate::store::Store;
use std::fs;
use std::path::{Path, PathBuf};

/// A document store persisted as a JSON file.
///
/// Documents live in memory (an inner [`MemoryStore`]) and are written
/// to `<dir>/<name>.json` after every mutation. Writes go to a sibling
/// temp file first and are moved into place, so a crash mid-write
/// leaves the previous snapshot intact.
///
/// # Example
///
/// ```no_run
/// use depot_store::{FileStore, Store, Document};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("data"), "todos").unwrap();
/// let mut doc = Document::new();
/// doc.set_id(store.create_unique_identifier());
/// store.insert(doc).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Opens or creates a file store for `name` under `dir`.
    ///
    /// If `<dir>/<name>.json` exists its documents are loaded;
    /// otherwise the store starts empty. The directory is created if
    /// needed.
    pub fn open(dir: &Path, name: &str) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let path = dir.join(format!("{name}.json"));
        let documents = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str::<Vec<Document>>(&text)?
        } else {
            Vec::new()
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: MemoryStore::with_documents(name, documents),
        })
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.inner.name()))
    }

    fn persist(&self) -> StoreResult<()> {
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(&self.inner.dump())?;
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl Store for FileStore {
    fn find(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.inner.find(query)
    }

    fn first(&self, query: &Query) -> StoreResult<Option<Document>> {
        self.inner.first(query)
    }

    fn count(&self, query: &Query) -> StoreResult<u64> {
        self.inner.count(query)
    }

    fn insert(&self, doc: Document) -> StoreResult<Document> {
        let inserted = self.inner.insert(doc)?;
        self.persist()?;
        Ok(inserted)
    }

    fn update(&self, target: &Query, changes: &Document) -> StoreResult<u64> {
        let written = self.inner.update(target, changes)?;
        if written > 0 {
            self.persist()?;
        }
        Ok(written)
    }

    fn remove(&self, query: &Query) -> StoreResult<u64> {
        let removed = self.inner.remove(query)?;
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    fn rename(&self, new_name: &str) -> StoreResult<()> {
        let old_path = self.path();
        self.inner.rename(new_name)?;
        if old_path.exists() {
            fs::rename(&old_path, self.path())?;
        }
        Ok(())
    }

    fn create_unique_identifier(&self) -> String {
        self.inner.create_unique_identifier()
    }
}
