use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use runinfo_config::RuninfoConfig;
use runinfo_core::{Store, StoreId, clean_path};
use walkdir::WalkDir;

/// A directory tree owned by one project module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRoot {
    pub module: String,
    pub path: PathBuf,
}

impl ContentRoot {
    pub fn new(module: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            module: module.into(),
            path: clean_path(path.as_ref()),
        }
    }
}

/// Result of a lifecycle event that touched the store set.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Added(Vec<Arc<Store>>),
    Removed(Vec<Arc<Store>>),
    ContentChanged(Arc<Store>),
}

impl StoreChange {
    pub fn stores(&self) -> Vec<&Store> {
        match self {
            Self::Added(stores) | Self::Removed(stores) => {
                stores.iter().map(|store| store.as_ref()).collect()
            }
            Self::ContentChanged(store) => vec![store.as_ref()],
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    roots: Vec<ContentRoot>,
    stores: Vec<Arc<Store>>,
}

/// The set of known stores for one project. Holds locations only, no query results.
#[derive(Debug)]
pub struct StoreRegistry {
    store_file_name: String,
    ignored_dirs: Vec<String>,
    state: RwLock<RegistryState>,
}

impl StoreRegistry {
    pub fn new(store_file_name: impl Into<String>, ignored_dirs: Vec<String>) -> Self {
        Self {
            store_file_name: store_file_name.into(),
            ignored_dirs,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn from_config(config: &RuninfoConfig) -> Self {
        Self::new(
            config.store.file_name.clone(),
            config.watch.ignored_dirs.clone(),
        )
    }

    pub fn store_file_name(&self) -> &str {
        &self.store_file_name
    }

    /// Replaces the content roots and walks each of them for stores.
    pub fn scan(&self, roots: &[ContentRoot]) -> Vec<Arc<Store>> {
        let found: Vec<PathBuf> = roots
            .iter()
            .flat_map(|root| self.walk_for_stores(&root.path))
            .collect();

        let mut state = self.write();
        state.roots = roots.to_vec();
        state.stores.clear();
        for path in &found {
            insert_store(&mut state, path);
        }

        tracing::debug!(
            roots = state.roots.len(),
            stores = state.stores.len(),
            "store scan complete"
        );
        state.stores.clone()
    }

    pub fn add_content_root(&self, root: ContentRoot) -> Option<StoreChange> {
        let found = self.walk_for_stores(&root.path);

        let mut state = self.write();
        if !state.roots.contains(&root) {
            state.roots.push(root);
        }

        let added: Vec<_> = found
            .iter()
            .filter_map(|path| insert_store(&mut state, path))
            .collect();
        (!added.is_empty()).then_some(StoreChange::Added(added))
    }

    /// Registers the store at `path`, or every store below `path` when a directory appeared.
    ///
    /// A create event for a store that is already known means the file was
    /// replaced, so it is reported as a content change.
    pub fn on_created(&self, path: &Path) -> Option<StoreChange> {
        let path = clean_path(path);
        if !self.is_watched(&path) {
            return None;
        }

        let candidates = if path.is_dir() {
            self.walk_for_stores(&path)
        } else if self.is_store_path(&path) {
            vec![path]
        } else {
            return None;
        };

        let mut state = self.write();
        if let [single] = candidates.as_slice()
            && let Some(known) = state.stores.iter().find(|store| &store.file_path == single)
        {
            return single
                .is_file()
                .then(|| StoreChange::ContentChanged(known.clone()));
        }

        let added: Vec<_> = candidates
            .iter()
            .filter_map(|path| insert_store(&mut state, path))
            .collect();
        (!added.is_empty()).then_some(StoreChange::Added(added))
    }

    /// Drops the store at `path`, or every store below `path` when a directory went away.
    pub fn on_removed(&self, path: &Path) -> Option<StoreChange> {
        let path = clean_path(path);

        let mut state = self.write();
        let (removed, kept): (Vec<_>, Vec<_>) = state
            .stores
            .drain(..)
            .partition(|store| store.file_path.starts_with(&path));
        state.stores = kept;

        (!removed.is_empty()).then_some(StoreChange::Removed(removed))
    }

    pub fn on_content_changed(&self, path: &Path) -> Option<StoreChange> {
        let path = clean_path(path);
        if !self.is_store_path(&path) {
            return None;
        }

        let known = self
            .read()
            .stores
            .iter()
            .find(|store| store.file_path == path)
            .cloned();

        match known {
            Some(store) => Some(StoreChange::ContentChanged(store)),
            // A store written before its creation event was seen.
            None if path.is_file() => self.on_created(&path),
            None => None,
        }
    }

    pub fn is_store_path(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy() == self.store_file_name)
    }

    pub fn stores(&self) -> Vec<Arc<Store>> {
        self.read().stores.clone()
    }

    pub fn content_roots(&self) -> Vec<ContentRoot> {
        self.read().roots.clone()
    }

    /// Stores whose root directory contains `path`, in discovery order.
    pub fn stores_for_file(&self, path: &Path) -> Vec<Arc<Store>> {
        let path = clean_path(path);
        self.read()
            .stores
            .iter()
            .filter(|store| store.covers(&path))
            .cloned()
            .collect()
    }

    pub fn store_by_id(&self, id: &StoreId) -> Option<Arc<Store>> {
        self.read()
            .stores
            .iter()
            .find(|store| &store.id == id)
            .cloned()
    }

    fn walk_for_stores(&self, dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self.is_ignored_dir(&entry.file_name().to_string_lossy())
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry during store scan");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.is_store_path(entry.path()))
            .map(|entry| clean_path(entry.path()))
            .collect()
    }

    /// Inside a content root and not below one of its ignored directories.
    fn is_watched(&self, path: &Path) -> bool {
        let state = self.read();
        let Some(root) = state.root_for(path) else {
            return false;
        };
        path.strip_prefix(&root.path)
            .is_ok_and(|relative| !self.is_ignored_path(relative))
    }

    /// True when any component of `path` is an ignored directory name.
    pub fn is_ignored_path(&self, path: &Path) -> bool {
        path.components()
            .any(|component| self.is_ignored_dir(&component.as_os_str().to_string_lossy()))
    }

    fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignored_dirs.iter().any(|ignored| ignored == name)
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegistryState {
    /// Deepest content root containing `path`.
    fn root_for(&self, path: &Path) -> Option<&ContentRoot> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(&root.path))
            .max_by_key(|root| root.path.components().count())
    }

    fn module_for(&self, path: &Path) -> Option<&str> {
        self.root_for(path).map(|root| root.module.as_str())
    }
}

fn insert_store(state: &mut RegistryState, path: &Path) -> Option<Arc<Store>> {
    if state.stores.iter().any(|store| store.file_path == path) {
        return None;
    }

    let module = state.module_for(path)?.to_owned();
    let store = Arc::new(Store::new(path, module));
    state.stores.push(store.clone());
    Some(store)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use runinfo_core::DEFAULT_STORE_FILE_NAME;
    use tempfile::tempdir;

    use super::*;

    fn registry() -> StoreRegistry {
        StoreRegistry::new(DEFAULT_STORE_FILE_NAME, vec![".git".to_owned()])
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(path, b"").expect("touch file");
    }

    #[test]
    fn scan_finds_stores_by_name_and_tags_modules() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("app/.runtime_info0"));
        touch(&root.join("lib/nested/.runtime_info0"));
        touch(&root.join("lib/not_a_store.db"));
        touch(&root.join(".git/.runtime_info0"));

        let registry = registry();
        let stores = registry.scan(&[
            ContentRoot::new("app", root.join("app")),
            ContentRoot::new("lib", root.join("lib")),
        ]);

        assert_eq!(stores.len(), 2);
        assert_eq!(stores[0].module, "app");
        assert_eq!(stores[0].root_path, root.join("app"));
        assert_eq!(stores[1].module, "lib");
        assert_eq!(stores[1].root_path, root.join("lib/nested"));
    }

    #[test]
    fn nested_roots_tag_stores_with_the_deepest_module() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("plugins/extra/.runtime_info0"));

        let registry = registry();
        let stores = registry.scan(&[
            ContentRoot::new("main", root),
            ContentRoot::new("extra", root.join("plugins/extra")),
        ]);

        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].module, "extra");
    }

    #[test]
    fn lifecycle_events_update_the_store_set() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let registry = registry();
        registry.scan(&[ContentRoot::new("main", root)]);
        assert!(registry.stores().is_empty());

        let store_path = root.join("pkg/.runtime_info0");
        touch(&store_path);

        let change = registry.on_created(&store_path).expect("store added");
        assert!(matches!(change, StoreChange::Added(ref added) if added.len() == 1));
        assert_eq!(registry.on_created(&store_path), None);

        let change = registry
            .on_content_changed(&store_path)
            .expect("content change reported");
        assert!(matches!(change, StoreChange::ContentChanged(_)));

        let change = registry.on_removed(&store_path).expect("store removed");
        assert!(matches!(change, StoreChange::Removed(ref removed) if removed.len() == 1));
        assert_eq!(registry.on_removed(&store_path), None);
        assert!(registry.stores().is_empty());
    }

    #[test]
    fn non_store_and_out_of_root_paths_are_no_ops() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let outside = temp.path().join("elsewhere/.runtime_info0");
        touch(&root.join("main.py"));
        touch(&outside);

        let registry = registry();
        registry.scan(&[ContentRoot::new("main", &root)]);

        assert_eq!(registry.on_created(&root.join("main.py")), None);
        assert_eq!(registry.on_content_changed(&root.join("main.py")), None);
        assert_eq!(registry.on_removed(&root.join("main.py")), None);
        assert_eq!(registry.on_created(&outside), None);
        assert!(registry.stores().is_empty());
    }

    #[test]
    fn directory_events_cover_every_store_below() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let registry = registry();
        registry.scan(&[ContentRoot::new("main", root)]);

        touch(&root.join("batch/a/.runtime_info0"));
        touch(&root.join("batch/b/.runtime_info0"));

        let change = registry
            .on_created(&root.join("batch"))
            .expect("directory creation adds stores");
        assert!(matches!(change, StoreChange::Added(ref added) if added.len() == 2));

        fs::remove_dir_all(root.join("batch")).expect("remove batch dir");
        let change = registry
            .on_removed(&root.join("batch"))
            .expect("directory removal drops stores");
        assert!(matches!(change, StoreChange::Removed(ref removed) if removed.len() == 2));
    }

    #[test]
    fn content_change_for_unseen_store_registers_it() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let registry = registry();
        registry.scan(&[ContentRoot::new("main", root)]);

        let store_path = root.join(".runtime_info0");
        touch(&store_path);

        let change = registry
            .on_content_changed(&store_path)
            .expect("unseen store is added");
        assert!(matches!(change, StoreChange::Added(_)));
    }

    #[test]
    fn stores_for_file_only_returns_ancestor_stores() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join(".runtime_info0"));
        touch(&root.join("a/.runtime_info0"));
        touch(&root.join("b/.runtime_info0"));

        let registry = registry();
        registry.scan(&[ContentRoot::new("main", root)]);

        let for_a = registry.stores_for_file(&root.join("a/tests/test_x.py"));
        let roots: Vec<_> = for_a.iter().map(|store| store.root_path.clone()).collect();
        assert_eq!(roots.len(), 2);
        assert!(roots.contains(&root.to_path_buf()));
        assert!(roots.contains(&root.join("a")));
        assert!(!roots.contains(&root.join("b")));

        let store = &for_a[0];
        assert_eq!(
            registry.store_by_id(&store.id).as_deref(),
            Some(store.as_ref())
        );
    }

    #[test]
    fn ignored_paths_match_any_component() {
        let registry = registry();
        assert!(registry.is_ignored_path(Path::new("/w/.git/objects/.runtime_info0")));
        assert!(!registry.is_ignored_path(Path::new("/w/src/.runtime_info0")));
    }

    #[test]
    fn create_event_for_known_store_reports_a_content_change() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let store_path = root.join(DEFAULT_STORE_FILE_NAME);
        touch(&store_path);

        let registry = registry();
        registry.scan(&[ContentRoot::new("main", root)]);

        fs::remove_file(&store_path).expect("delete store");
        touch(&store_path);
        let change = registry.on_created(&store_path).expect("replaced store is reported");
        assert!(matches!(change, StoreChange::ContentChanged(ref store) if store.file_path == store_path));
        assert_eq!(registry.stores().len(), 1);

        fs::remove_file(&store_path).expect("delete store");
        assert_eq!(registry.on_created(&store_path), None);
    }

    #[test]
    fn events_below_ignored_dirs_are_no_ops() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        let hidden = root.join(".git/hooks").join(DEFAULT_STORE_FILE_NAME);
        touch(&hidden);

        let registry = registry();
        registry.scan(&[ContentRoot::new("main", root)]);
        assert!(registry.stores().is_empty());

        assert_eq!(registry.on_created(&hidden), None);
        assert_eq!(registry.on_content_changed(&hidden), None);
        assert_eq!(registry.on_created(&root.join(".git")), None);
        assert!(registry.stores().is_empty());
    }
}
