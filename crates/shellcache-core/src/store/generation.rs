use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::http::{RequestKey, Response};
use crate::utils::format_age;

use super::persist;

/// Immutable snapshot of a response captured at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    response: Response,
    stored_at: DateTime<Utc>,
}

impl StoredResponse {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            stored_at: Utc::now(),
        }
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.stored_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        format_age(self.age_minutes())
    }
}

type Entries = BTreeMap<RequestKey, Arc<StoredResponse>>;

/// One versioned snapshot of the cache.
///
/// Entries are shared as `Arc`s and never mutated; a write to an existing
/// key swaps in a new snapshot. Concurrent writes to one key are
/// last-writer-wins.
pub struct Generation {
    name: String,
    entries: RwLock<Entries>,
    /// Backing file when the store is persisted
    file: Option<PathBuf>,
    deleted: AtomicBool,
    /// Serializes file writes against each other and against deletion
    save_lock: Mutex<()>,
}

impl Generation {
    pub(crate) fn new(name: &str, file: Option<PathBuf>) -> Self {
        Self::with_entries(name, file, BTreeMap::new())
    }

    pub(crate) fn with_entries(name: &str, file: Option<PathBuf>, entries: Entries) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(entries),
            file,
            deleted: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pure lookup.
    pub fn get(&self, key: &RequestKey) -> Option<Arc<StoredResponse>> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.read().contains_key(key)
    }

    /// Store a response, replacing any previous snapshot for `key`.
    ///
    /// Rejects non-2xx and non-basic responses; the generation is left
    /// untouched in that case.
    pub fn put(&self, key: RequestKey, response: Response) -> Result<(), StoreError> {
        self.insert(key, response)?;
        self.save()
    }

    /// Insert without persisting; callers batch a single `save` afterwards.
    pub(crate) fn insert(&self, key: RequestKey, response: Response) -> Result<(), StoreError> {
        if self.is_deleted() {
            return Err(StoreError::GenerationDeleted(self.name.clone()));
        }
        response.check_cacheable()?;
        self.write()
            .insert(key, Arc::new(StoredResponse::new(response)));
        Ok(())
    }

    pub fn delete(&self, key: &RequestKey) -> Result<bool, StoreError> {
        let removed = self.write().remove(key).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn keys(&self) -> Vec<RequestKey> {
        self.read().keys().cloned().collect()
    }

    /// Time of the most recent write, if any.
    pub fn last_stored_at(&self) -> Option<DateTime<Utc>> {
        self.read().values().map(|r| r.stored_at()).max()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub(crate) fn save(&self) -> Result<(), StoreError> {
        let Some(ref path) = self.file else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_deleted() {
            // A write racing a purge must not resurrect the file
            return Ok(());
        }
        let contents = {
            let entries = self.read();
            persist::encode(&self.name, &entries)?
        };
        persist::write_atomic(&self.name, path, &contents)
    }

    pub(crate) fn mark_deleted(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.deleted.store(true, Ordering::SeqCst);
        self.write().clear();
        match self.file {
            Some(ref path) => persist::remove(&self.name, path),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("name", &self.name)
            .field("entries", &self.len())
            .field("persisted", &self.file.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{ok, request};
    use crate::http::ResponseType;
    use chrono::Duration;

    #[test]
    fn test_put_then_get() {
        let generation = Generation::new("app-v1", None);
        let key = request("/static/app.js").key();
        generation.put(key.clone(), ok("console.log(1)")).expect("put");

        let stored = generation.get(&key).expect("stored");
        assert_eq!(stored.response().text(), "console.log(1)");
        assert_eq!(generation.len(), 1);
    }

    #[test]
    fn test_put_rejects_error_and_opaque() {
        let generation = Generation::new("app-v1", None);
        let key = request("/missing").key();

        let not_found = Response::new(404, ResponseType::Basic).with_body("Not Found");
        assert!(matches!(
            generation.put(key.clone(), not_found),
            Err(StoreError::Ineligible(_))
        ));

        let opaque = Response::new(200, ResponseType::Opaque);
        assert!(generation.put(key, opaque).is_err());
        assert!(generation.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_snapshot() {
        let generation = Generation::new("app-v1", None);
        let key = request("/").key();
        generation.put(key.clone(), ok("v1")).expect("put");
        let first = generation.get(&key).expect("first");

        generation.put(key.clone(), ok("v2")).expect("put");
        let second = generation.get(&key).expect("second");

        // The earlier snapshot handed out is unchanged
        assert_eq!(first.response().text(), "v1");
        assert_eq!(second.response().text(), "v2");
        assert_eq!(generation.len(), 1);
    }

    #[test]
    fn test_deleted_generation_rejects_writes() {
        let generation = Generation::new("app-v1", None);
        generation.mark_deleted().expect("delete");
        let result = generation.put(request("/").key(), ok("x"));
        assert!(matches!(result, Err(StoreError::GenerationDeleted(_))));
    }

    #[test]
    fn test_stored_response_age() {
        let mut stored = StoredResponse::new(ok("x"));
        assert_eq!(stored.age_display(), "just now");
        stored.stored_at = Utc::now() - Duration::minutes(61);
        assert_eq!(stored.age_display(), "1h ago");
    }
}
