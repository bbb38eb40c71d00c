//! Re-projects cached marks onto the current text of a source file.
//!
//! Recorded line numbers are only a hint. A mark applies where its captured
//! content is found in the live document, or nowhere.

mod anchor;
mod document;
mod gutter;
mod reconcile;

pub use anchor::{Anchor, anchor};
pub use document::{DocumentSource, FsDocuments, LiveDocument};
pub use gutter::{GutterLink, GutterLinks, NavigationTarget, gutter_links, resolve_target};
pub use reconcile::{
    LiveElement, ResolvedMark, annotate_document, marks_on_line, reconcile, reconcile_all,
};
