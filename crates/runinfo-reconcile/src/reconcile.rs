use std::collections::HashSet;

use runinfo_core::{GutterDirection, LoadedMark, MarkKind};

use crate::anchor::{Anchor, anchor};
use crate::document::LiveDocument;

/// A cached mark pinned to its live position.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMark {
    pub mark: LoadedMark,
    pub anchor: Anchor,
}

impl ResolvedMark {
    pub fn line(&self) -> usize {
        self.anchor.line
    }

    pub fn kind(&self) -> MarkKind {
        self.mark.mark.kind
    }
}

/// Text of a live syntax element and the line it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveElement<'a> {
    pub text: &'a str,
    pub line: usize,
}

impl<'a> LiveElement<'a> {
    pub fn new(text: &'a str, line: usize) -> Self {
        Self { text, line }
    }
}

/// Best mark of `kind` for `element`, or `None` when no candidate still applies.
///
/// Candidates whose recorded line equals the element line come first;
/// otherwise discovery order decides.
pub fn reconcile(
    doc: &LiveDocument,
    element: LiveElement<'_>,
    kind: MarkKind,
    candidates: &[LoadedMark],
) -> Option<ResolvedMark> {
    matching(doc, element, kind, candidates).min_by_key(|resolved| {
        resolved.mark.mark.begin_line != element.line
    })
}

/// Every mark of `kind` applying to `element`, one per distinct exception text.
pub fn reconcile_all(
    doc: &LiveDocument,
    element: LiveElement<'_>,
    kind: MarkKind,
    candidates: &[LoadedMark],
) -> Vec<ResolvedMark> {
    let (mut resolved, drifted): (Vec<_>, Vec<_>) = matching(doc, element, kind, candidates)
        .partition(|resolved| resolved.mark.mark.begin_line == element.line);
    resolved.extend(drifted);

    let mut seen = HashSet::new();
    resolved.retain(|resolved| seen.insert(resolved.mark.exception_text().to_owned()));
    resolved
}

/// Marks of `kind` anchored on `line`, one per distinct display text.
///
/// This is the line-painter query: no element text is known, only the line.
pub fn marks_on_line(
    doc: &LiveDocument,
    line: usize,
    kind: MarkKind,
    candidates: &[LoadedMark],
) -> Vec<ResolvedMark> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|candidate| candidate.mark.kind == kind)
        .filter_map(|candidate| resolve(doc, candidate))
        .filter(|resolved| resolved.line() == line)
        .filter(|resolved| seen.insert(resolved.mark.mark.display_text.clone()))
        .collect()
}

/// Anchors every candidate in `doc`, dropping stale marks.
///
/// Results are ordered by live line and keep discovery order within a line.
/// Marks sharing a line, kind, gutter direction and exception text collapse
/// into the first one.
pub fn annotate_document(doc: &LiveDocument, candidates: &[LoadedMark]) -> Vec<ResolvedMark> {
    let mut seen: HashSet<(usize, MarkKind, Option<GutterDirection>, String)> = HashSet::new();
    let mut resolved: Vec<ResolvedMark> = candidates
        .iter()
        .filter_map(|candidate| resolve(doc, candidate))
        .filter(|resolved| {
            seen.insert((
                resolved.line(),
                resolved.kind(),
                resolved.mark.mark.direction(),
                resolved.mark.exception_text().to_owned(),
            ))
        })
        .collect();

    let dropped = candidates.len() - resolved.len();
    if dropped > 0 {
        tracing::debug!(
            candidates = candidates.len(),
            dropped,
            "marks dropped as stale or duplicate"
        );
    }

    resolved.sort_by_key(|resolved| resolved.line());
    resolved
}

pub(crate) fn matching<'c>(
    doc: &'c LiveDocument,
    element: LiveElement<'c>,
    kind: MarkKind,
    candidates: &'c [LoadedMark],
) -> impl Iterator<Item = ResolvedMark> + 'c {
    let text = element.text.trim();
    candidates
        .iter()
        .filter(move |candidate| candidate.mark.kind == kind)
        .filter(move |candidate| !text.is_empty() && candidate.mark.check_content.trim() == text)
        .filter_map(move |candidate| resolve(doc, candidate))
        .filter(move |resolved| resolved.line() == element.line)
}

fn resolve(doc: &LiveDocument, candidate: &LoadedMark) -> Option<ResolvedMark> {
    anchor(doc, &candidate.mark).map(|anchor| ResolvedMark {
        mark: candidate.clone(),
        anchor,
    })
}
