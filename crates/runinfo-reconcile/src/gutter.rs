use std::path::PathBuf;

use runinfo_core::{GutterDirection, LoadedMark, MarkKind};
use serde::Serialize;

use crate::document::{DocumentSource, LiveDocument};
use crate::reconcile::{LiveElement, ResolvedMark, matching};

/// Place a gutter link navigates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationTarget {
    pub path: PathBuf,
    pub line: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GutterLink {
    pub resolved: ResolvedMark,
    pub direction: GutterDirection,
    /// `None` when the target file could not be read; the icon is still drawn.
    pub target: Option<NavigationTarget>,
}

/// The caller-side and callee-side links for one live element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GutterLinks {
    pub up: Option<GutterLink>,
    pub down: Option<GutterLink>,
}

impl GutterLinks {
    pub fn is_empty(&self) -> bool {
        self.up.is_none() && self.down.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GutterLink> {
        self.up.iter().chain(self.down.iter())
    }
}

/// Picks at most one gutter link per direction for `element`.
///
/// The link whose exception has the shortest stacktrace wins; equal lengths
/// keep the first candidate. Links without an exception rank last.
pub fn gutter_links(
    doc: &LiveDocument,
    element: LiveElement<'_>,
    candidates: &[LoadedMark],
    documents: &dyn DocumentSource,
) -> GutterLinks {
    let mut up: Option<ResolvedMark> = None;
    let mut down: Option<ResolvedMark> = None;

    for resolved in matching(doc, element, MarkKind::GutterLink, candidates) {
        let Some(direction) = resolved.mark.mark.direction() else {
            continue;
        };
        let slot = match direction {
            GutterDirection::Up => &mut up,
            GutterDirection::Down => &mut down,
        };
        let shorter = slot.as_ref().is_none_or(|current| {
            resolved.mark.stacktrace_length() < current.mark.stacktrace_length()
        });
        if shorter {
            *slot = Some(resolved);
        }
    }

    let link = |resolved: ResolvedMark, direction| {
        let target = resolve_target(&resolved.mark, documents);
        GutterLink {
            resolved,
            direction,
            target,
        }
    };

    GutterLinks {
        up: up.map(|resolved| link(resolved, GutterDirection::Up)),
        down: down.map(|resolved| link(resolved, GutterDirection::Down)),
    }
}

/// Resolves where a gutter link jumps to.
///
/// Store-relative target paths are joined to the store root. A target line
/// past the end of the document clamps to the last line. Unreadable targets
/// yield `None`.
pub fn resolve_target(mark: &LoadedMark, documents: &dyn DocumentSource) -> Option<NavigationTarget> {
    let target = mark.mark.target.as_ref()?;
    let path = mark.store.resolve(&target.path);
    let doc = match documents.document(&path) {
        Ok(doc) => doc,
        Err(err) => {
            tracing::debug!(
                target = %path.display(),
                error = %err,
                "gutter link target unreadable"
            );
            return None;
        }
    };

    let line = target.line.min(doc.line_count().saturating_sub(1));
    let offset = doc.first_non_blank_offset(line)?;
    Some(NavigationTarget { path, line, offset })
}
