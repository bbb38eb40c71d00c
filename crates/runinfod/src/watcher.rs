use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use runinfo_cache::{ProjectAnnotations, StoreChange};

/// Filesystem change to a store path, as dispatched to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Created,
    Removed,
    ContentChanged,
}

impl StoreEvent {
    /// Maps a notify event kind. Renames are resolved by checking whether the path exists.
    pub fn from_kind(kind: &EventKind, path: &Path) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Remove(_) => Some(Self::Removed),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Self::Removed),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Self::Created),
            EventKind::Modify(ModifyKind::Name(_)) => Some(if path.exists() {
                Self::Created
            } else {
                Self::Removed
            }),
            EventKind::Modify(_) => Some(Self::ContentChanged),
            EventKind::Any | EventKind::Other => Some(if path.exists() {
                Self::ContentChanged
            } else {
                Self::Removed
            }),
            EventKind::Access(_) => None,
        }
    }

    /// Folds a newer event for the same path into a pending one.
    fn merge(self, newer: Self) -> Self {
        match (self, newer) {
            (Self::Created, Self::ContentChanged) => Self::Created,
            (Self::Removed, Self::Created) => Self::ContentChanged,
            (_, newer) => newer,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    event: StoreEvent,
    last_seen: Instant,
}

/// Coalesces bursts of events per path until the path has been quiet for a window.
#[derive(Debug, Default)]
pub struct DebounceQueue {
    pending: BTreeMap<PathBuf, PendingEvent>,
}

impl DebounceQueue {
    pub fn mark(&mut self, path: PathBuf, event: StoreEvent, now: Instant) {
        self.pending
            .entry(path)
            .and_modify(|pending| {
                pending.event = pending.event.merge(event);
                pending.last_seen = now;
            })
            .or_insert(PendingEvent {
                event,
                last_seen: now,
            });
    }

    /// Takes every path quiet for at least `debounce`, in path order.
    pub fn drain_due(&mut self, now: Instant, debounce: Duration) -> Vec<(PathBuf, StoreEvent)> {
        let mut due = Vec::new();

        self.pending.retain(|path, pending| {
            if now.duration_since(pending.last_seen) >= debounce {
                due.push((path.clone(), pending.event));
                false
            } else {
                true
            }
        });

        due
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce: Duration,
    pub poll_interval: Duration,
}

/// Hands a debounced event to the project. Non-store paths are no-ops.
pub fn dispatch(project: &ProjectAnnotations, path: &Path, event: StoreEvent) -> Option<StoreChange> {
    match event {
        StoreEvent::Created => project.on_store_created(path),
        StoreEvent::Removed => project.on_store_removed(path),
        StoreEvent::ContentChanged => project.on_store_content_changed(path),
    }
}

/// Queues the store-relevant paths of one notify event.
///
/// Only paths named like a store are kept; directory creation is picked up
/// through the store files inside it. Paths under ignored directories of a
/// content root are dropped.
pub fn enqueue_event(
    project: &ProjectAnnotations,
    event: notify::Result<Event>,
    queue: &mut DebounceQueue,
    now: Instant,
) -> Result<()> {
    let event = event.context("notify error")?;
    let registry = project.registry();
    let roots = registry.content_roots();

    for path in event.paths {
        if !registry.is_store_path(&path) {
            continue;
        }

        let ignored = roots
            .iter()
            .find_map(|root| path.strip_prefix(&root.path).ok())
            .is_none_or(|relative| registry.is_ignored_path(relative));
        if ignored {
            continue;
        }

        let Some(store_event) = StoreEvent::from_kind(&event.kind, &path) else {
            continue;
        };
        queue.mark(path, store_event, now);
    }

    Ok(())
}

/// Watches every content root and feeds store lifecycle events to `project` until the watcher fails.
pub fn run_watch_loop(project: &ProjectAnnotations, options: &WatchOptions) -> Result<()> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = PollWatcher::new(
        move |result| {
            let _ = tx.send(result);
        },
        Config::default().with_poll_interval(options.poll_interval),
    )
    .context("failed to initialize file watcher")?;

    for root in project.registry().content_roots() {
        watcher
            .watch(&root.path, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch content root {}", root.path.display()))?;
        tracing::info!(module = %root.module, root = %root.path.display(), "watching content root");
    }

    let recv_interval = Duration::from_millis(50);
    let mut queue = DebounceQueue::default();

    loop {
        match rx.recv_timeout(recv_interval) {
            Ok(result) => {
                if let Err(err) = enqueue_event(project, result, &mut queue, Instant::now()) {
                    tracing::warn!(error = ?err, "watch event error");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(anyhow::anyhow!("watcher channel disconnected"));
            }
        }

        while let Ok(result) = rx.try_recv() {
            if let Err(err) = enqueue_event(project, result, &mut queue, Instant::now()) {
                tracing::warn!(error = ?err, "watch event error");
            }
        }

        for (path, event) in queue.drain_due(Instant::now(), options.debounce) {
            if dispatch(project, &path, event).is_none() {
                tracing::debug!(path = %path.display(), ?event, "store event ignored");
            }
        }
    }
}
