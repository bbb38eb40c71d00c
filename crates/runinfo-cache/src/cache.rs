use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use runinfo_core::{Exception, ExceptionKey, LoadedMark, Mark, MarkKind, Store, clean_path};
use runinfo_store::{StoreError, StoreReader};

use crate::registry::StoreRegistry;

/// Where the cache pulls records from on a miss.
pub trait MarkSource: Send + Sync {
    fn find_marks(
        &self,
        store: &Store,
        file_path: &Path,
        kind: MarkKind,
    ) -> Result<Vec<Mark>, StoreError>;

    fn find_marks_at(
        &self,
        store: &Store,
        file_path: &Path,
        kind: MarkKind,
        begin_line: usize,
    ) -> Result<Vec<Mark>, StoreError>;

    fn find_exception(&self, store: &Store, exception_id: i64)
    -> Result<Option<Exception>, StoreError>;
}

/// Reads straight from the SQLite store files.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteMarkSource;

impl MarkSource for SqliteMarkSource {
    fn find_marks(
        &self,
        store: &Store,
        file_path: &Path,
        kind: MarkKind,
    ) -> Result<Vec<Mark>, StoreError> {
        StoreReader::new(store).find_marks(file_path, kind)
    }

    fn find_marks_at(
        &self,
        store: &Store,
        file_path: &Path,
        kind: MarkKind,
        begin_line: usize,
    ) -> Result<Vec<Mark>, StoreError> {
        StoreReader::new(store).find_marks_at(file_path, kind, begin_line)
    }

    fn find_exception(
        &self,
        store: &Store,
        exception_id: i64,
    ) -> Result<Option<Exception>, StoreError> {
        StoreReader::new(store).find_exception(exception_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MarkCacheKey {
    file_path: PathBuf,
    kind: MarkKind,
    line: Option<usize>,
}

#[derive(Debug, Default)]
struct CacheState {
    generation: u64,
    marks: HashMap<MarkCacheKey, Arc<[LoadedMark]>>,
    exceptions: HashMap<ExceptionKey, Option<Arc<Exception>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub source_calls: u64,
    pub clears: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    source_calls: AtomicU64,
    clears: AtomicU64,
}

/// Memoizes mark and exception lookups across every store of a project.
///
/// Entries are whole-result snapshots. `clear` swaps the state for an empty
/// one under the write lock, so a lookup sees either the old maps or the new
/// empty ones. A miss that was computed while a `clear` happened is returned
/// to its caller but not stored.
pub struct AnnotationCache {
    registry: Arc<StoreRegistry>,
    source: Arc<dyn MarkSource>,
    state: RwLock<CacheState>,
    counters: Counters,
}

impl AnnotationCache {
    pub fn new(registry: Arc<StoreRegistry>, source: Arc<dyn MarkSource>) -> Self {
        Self {
            registry,
            source,
            state: RwLock::new(CacheState::default()),
            counters: Counters::default(),
        }
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// Marks of `kind` for the file at `file_path`, concatenated over the
    /// stores covering it in discovery order.
    pub fn get_marks(&self, file_path: &Path, kind: MarkKind) -> Arc<[LoadedMark]> {
        self.lookup_marks(MarkCacheKey {
            file_path: clean_path(file_path),
            kind,
            line: None,
        })
    }

    /// As [`get_marks`](Self::get_marks), limited to marks recorded at `begin_line`.
    pub fn get_marks_at(&self, file_path: &Path, kind: MarkKind, begin_line: usize) -> Arc<[LoadedMark]> {
        let file_path = clean_path(file_path);

        let full_key = MarkCacheKey {
            file_path: file_path.clone(),
            kind,
            line: None,
        };
        if let Some(full) = self.read().marks.get(&full_key).cloned() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return full
                .iter()
                .filter(|loaded| loaded.mark.begin_line == begin_line)
                .cloned()
                .collect();
        }

        self.lookup_marks(MarkCacheKey {
            file_path,
            kind,
            line: Some(begin_line),
        })
    }

    pub fn get_exception(&self, key: &ExceptionKey) -> Option<Arc<Exception>> {
        let generation = {
            let state = self.read();
            if let Some(hit) = state.exceptions.get(key) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return hit.clone();
            }
            state.generation
        };

        let store = self.registry.store_by_id(&key.store)?;
        self.load_exception(&store, key.id, generation)
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let generation = state.generation + 1;
        *state = CacheState {
            generation,
            ..CacheState::default()
        };
        self.counters.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            source_calls: self.counters.source_calls.load(Ordering::Relaxed),
            clears: self.counters.clears.load(Ordering::Relaxed),
        }
    }

    fn lookup_marks(&self, key: MarkCacheKey) -> Arc<[LoadedMark]> {
        let generation = {
            let state = self.read();
            if let Some(hit) = state.marks.get(&key) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return hit.clone();
            }
            state.generation
        };
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let mut loaded = Vec::new();
        for store in self.registry.stores_for_file(&key.file_path) {
            self.counters.source_calls.fetch_add(1, Ordering::Relaxed);
            let result = match key.line {
                Some(line) => self
                    .source
                    .find_marks_at(&store, &key.file_path, key.kind, line),
                None => self.source.find_marks(&store, &key.file_path, key.kind),
            };

            let marks = match result {
                Ok(marks) => marks,
                Err(err) => {
                    tracing::warn!(
                        store = %store.file_path.display(),
                        file = %key.file_path.display(),
                        error = %err,
                        "store read failed, serving no marks from it"
                    );
                    continue;
                }
            };

            for mark in marks {
                let exception = mark
                    .exception_id
                    .and_then(|id| self.cached_or_load_exception(&store, id, generation));
                loaded.push(LoadedMark {
                    mark,
                    store: store.clone(),
                    exception,
                });
            }
        }

        let loaded: Arc<[LoadedMark]> = loaded.into();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            state.marks.insert(key, loaded.clone());
        }
        loaded
    }

    fn cached_or_load_exception(
        &self,
        store: &Arc<Store>,
        id: i64,
        generation: u64,
    ) -> Option<Arc<Exception>> {
        let key = store.exception_key(id);
        if let Some(hit) = self.read().exceptions.get(&key) {
            return hit.clone();
        }
        self.load_exception(store, id, generation)
    }

    fn load_exception(&self, store: &Store, id: i64, generation: u64) -> Option<Arc<Exception>> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.counters.source_calls.fetch_add(1, Ordering::Relaxed);

        let exception = match self.source.find_exception(store, id) {
            Ok(exception) => exception.map(Arc::new),
            Err(err) => {
                tracing::warn!(
                    store = %store.file_path.display(),
                    exception_id = id,
                    error = %err,
                    "exception lookup failed"
                );
                None
            }
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            state
                .exceptions
                .insert(store.exception_key(id), exception.clone());
        }
        exception
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}
