use std::path::Path;
use std::sync::Arc;

use runinfo_config::RuninfoConfig;
use runinfo_core::{Exception, ExceptionKey, LoadedMark, MarkKind};

use crate::cache::{AnnotationCache, CacheStats, MarkSource, SqliteMarkSource};
use crate::registry::{ContentRoot, StoreChange, StoreRegistry};

/// Annotation state for one project: the store registry plus the cache over it.
///
/// Filesystem events come in through the `on_store_*` handlers, editor
/// queries through `marks`, `marks_at` and `exception`.
pub struct ProjectAnnotations {
    registry: Arc<StoreRegistry>,
    cache: AnnotationCache,
}

impl ProjectAnnotations {
    pub fn new(registry: Arc<StoreRegistry>, source: Arc<dyn MarkSource>) -> Self {
        let cache = AnnotationCache::new(registry.clone(), source);
        Self { registry, cache }
    }

    /// Builds a registry from `config`, scans `roots` and reads stores through SQLite.
    pub fn open(roots: &[ContentRoot], config: &RuninfoConfig) -> Self {
        let registry = Arc::new(StoreRegistry::from_config(config));
        let stores = registry.scan(roots);
        for store in &stores {
            tracing::info!(
                store = %store.file_path.display(),
                module = %store.module,
                "runtime-info store found"
            );
        }

        Self::new(registry, Arc::new(SqliteMarkSource))
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &AnnotationCache {
        &self.cache
    }

    pub fn on_store_created(&self, path: &Path) -> Option<StoreChange> {
        let change = self.registry.on_created(path)?;
        self.invalidate(&change);
        Some(change)
    }

    pub fn on_store_removed(&self, path: &Path) -> Option<StoreChange> {
        let change = self.registry.on_removed(path)?;
        self.invalidate(&change);
        Some(change)
    }

    pub fn on_store_content_changed(&self, path: &Path) -> Option<StoreChange> {
        let change = self.registry.on_content_changed(path)?;
        self.invalidate(&change);
        Some(change)
    }

    pub fn add_content_root(&self, root: ContentRoot) -> Option<StoreChange> {
        let change = self.registry.add_content_root(root)?;
        self.invalidate(&change);
        Some(change)
    }

    pub fn marks(&self, file_path: &Path, kind: MarkKind) -> Arc<[LoadedMark]> {
        self.cache.get_marks(file_path, kind)
    }

    pub fn marks_at(&self, file_path: &Path, kind: MarkKind, begin_line: usize) -> Arc<[LoadedMark]> {
        self.cache.get_marks_at(file_path, kind, begin_line)
    }

    pub fn exception(&self, key: &ExceptionKey) -> Option<Arc<Exception>> {
        self.cache.get_exception(key)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn invalidate(&self, change: &StoreChange) {
        self.cache.clear();

        let action = match change {
            StoreChange::Added(_) => "added",
            StoreChange::Removed(_) => "removed",
            StoreChange::ContentChanged(_) => "changed",
        };
        for store in change.stores() {
            tracing::info!(
                store = %store.file_path.display(),
                module = %store.module,
                action,
                "runtime-info store {action}, annotation cache cleared"
            );
        }
    }
}
