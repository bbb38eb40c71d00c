use runinfo_core::{Mark, MarkKind};
use serde::Serialize;

use crate::document::LiveDocument;

/// Where a mark's recorded content sits in the live document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Anchor {
    pub line: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    /// False when the content was still found at the recorded line.
    pub relocated: bool,
}

/// Re-locates `mark` in `doc` by its recorded content.
///
/// An occurrence only counts when it stands on its own: for red underlines
/// and suffixes it must be the whole statement, with nothing but whitespace
/// around it on its lines; for gutter links it must not run into a
/// neighbouring identifier. An occurrence on the recorded line wins,
/// otherwise the first one in the document is used. Content that cannot be
/// found, or is blank, yields `None`; the recorded line number alone is never
/// trusted.
pub fn anchor(doc: &LiveDocument, mark: &Mark) -> Option<Anchor> {
    let content = mark.check_content.trim();
    if content.is_empty() {
        return None;
    }

    let occurrences: Vec<usize> = doc
        .text()
        .match_indices(content)
        .map(|(start, _)| start)
        .filter(|start| stands_alone(doc, mark.kind, *start, start + content.len()))
        .collect();

    let on_recorded_line = occurrences
        .iter()
        .copied()
        .find(|start| doc.line_of_offset(*start) == mark.begin_line);
    let (start, relocated) = match on_recorded_line {
        Some(start) => (start, false),
        None => (*occurrences.first()?, true),
    };

    Some(Anchor {
        line: doc.line_of_offset(start),
        start_offset: start,
        end_offset: start + content.len(),
        relocated,
    })
}

fn stands_alone(doc: &LiveDocument, kind: MarkKind, start: usize, end: usize) -> bool {
    let text = doc.text();
    match kind {
        MarkKind::GutterLink => {
            let before = text[..start].chars().next_back();
            let after = text[end..].chars().next();
            !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char)
        }
        MarkKind::RedUnderline | MarkKind::Suffix => {
            let line_start = doc
                .line_start_offset(doc.line_of_offset(start))
                .unwrap_or(start);
            let line_end = doc
                .line_end_offset(doc.line_of_offset(end))
                .unwrap_or(end)
                .max(end);
            text[line_start..start].trim().is_empty() && text[end..line_end].trim().is_empty()
        }
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
