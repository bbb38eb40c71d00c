use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use runinfo_cache::ProjectAnnotations;
use runinfo_core::{LoadedMark, MarkKind, clean_path};
use runinfo_reconcile::{
    DocumentSource, LiveDocument, LiveElement, NavigationTarget, ResolvedMark, annotate_document,
    gutter_links,
};
use runinfo_store::StoreReader;
use serde::Serialize;

use crate::cli::OutputFormat;

/// One annotation as the editor would render it. Lines are 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationRow {
    pub kind: MarkKind,
    pub line: usize,
    pub recorded_line: usize,
    pub relocated: bool,
    pub content: String,
    pub text: String,
    pub exception: Option<String>,
    pub direction: Option<String>,
    pub target: Option<NavigationTarget>,
    pub store: String,
    pub module: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreRow {
    pub id: String,
    pub module: String,
    pub root: PathBuf,
    pub file: PathBuf,
    /// `None` when the store could not be read.
    pub exceptions: Option<usize>,
}

pub fn run_annotate_once(
    project: &ProjectAnnotations,
    file: &Path,
    documents: &dyn DocumentSource,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let file = clean_path(file);
    let doc = documents
        .document(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let rows = annotate_file(project, &file, &doc, documents);
    tracing::debug!(file = %file.display(), rows = rows.len(), "annotated file");

    match format {
        OutputFormat::Table => write_annotation_table(&rows, out),
        OutputFormat::Json => write_json_lines(&rows, out),
    }
    .context("failed to write annotations")
}

/// Resolves every cached mark for `file` against `doc`.
///
/// Red underlines and suffixes come straight from reconciliation. Gutter
/// links are reduced to the best link per direction for each anchored
/// element, with navigation targets resolved through `documents`.
pub fn annotate_file(
    project: &ProjectAnnotations,
    file: &Path,
    doc: &LiveDocument,
    documents: &dyn DocumentSource,
) -> Vec<AnnotationRow> {
    let candidates: Vec<LoadedMark> = MarkKind::ALL
        .iter()
        .flat_map(|kind| project.marks(file, *kind).iter().cloned().collect::<Vec<_>>())
        .collect();

    let mut rows = Vec::new();
    let mut gutter_elements: Vec<(usize, String)> = Vec::new();
    for resolved in annotate_document(doc, &candidates) {
        if resolved.kind() != MarkKind::GutterLink {
            rows.push(row(&resolved, None));
            continue;
        }

        let element = (resolved.line(), resolved.mark.mark.check_content.trim().to_owned());
        if !gutter_elements.contains(&element) {
            gutter_elements.push(element);
        }
    }

    for (line, text) in &gutter_elements {
        let links = gutter_links(doc, LiveElement::new(text, *line), &candidates, documents);
        for link in links.iter() {
            rows.push(row(&link.resolved, link.target.clone()));
        }
    }

    rows.sort_by_key(|row| (row.line, row.kind));
    rows
}

pub fn list_stores(project: &ProjectAnnotations) -> Vec<StoreRow> {
    project
        .registry()
        .stores()
        .iter()
        .map(|store| {
            let exceptions = match StoreReader::new(store).find_exceptions() {
                Ok(exceptions) => Some(exceptions.len()),
                Err(err) => {
                    tracing::warn!(
                        store = %store.file_path.display(),
                        error = %err,
                        "failed to count store exceptions"
                    );
                    None
                }
            };

            StoreRow {
                id: store.id.to_string(),
                module: store.module.clone(),
                root: store.root_path.clone(),
                file: store.file_path.clone(),
                exceptions,
            }
        })
        .collect()
}

pub fn run_list_stores_once(
    project: &ProjectAnnotations,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let rows = list_stores(project);
    match format {
        OutputFormat::Table => write_store_table(&rows, out),
        OutputFormat::Json => write_json_lines(&rows, out),
    }
    .context("failed to write store list")
}

pub fn write_annotation_table(rows: &[AnnotationRow], out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "line\tkind\ttext\texception\tdirection\ttarget\tmodule")?;

    for row in rows {
        let target = row
            .target
            .as_ref()
            .map(|target| format!("{}:{}", target.path.display(), target.line))
            .unwrap_or_else(|| "-".to_owned());
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.line,
            row.kind,
            normalize_field(&row.text),
            normalize_field(row.exception.as_deref().unwrap_or("-")),
            row.direction.as_deref().unwrap_or("-"),
            normalize_field(&target),
            normalize_field(&row.module),
        )?;
    }

    Ok(())
}

pub fn write_store_table(rows: &[StoreRow], out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "store_id\tmodule\texceptions\tfile")?;

    for row in rows {
        let exceptions = row
            .exceptions
            .map(|count| count.to_string())
            .unwrap_or_else(|| "unavailable".to_owned());
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            row.id,
            normalize_field(&row.module),
            exceptions,
            normalize_field(&row.file.display().to_string()),
        )?;
    }

    Ok(())
}

fn write_json_lines<T: Serialize>(rows: &[T], out: &mut dyn Write) -> std::io::Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *out, row)?;
        writeln!(out)?;
    }
    Ok(())
}

fn row(resolved: &ResolvedMark, target: Option<NavigationTarget>) -> AnnotationRow {
    let loaded = &resolved.mark;
    let text = match loaded.mark.kind {
        MarkKind::GutterLink => loaded.exception_text().to_owned(),
        _ => loaded.mark.display_text.clone(),
    };

    AnnotationRow {
        kind: loaded.mark.kind,
        line: resolved.line(),
        recorded_line: loaded.mark.begin_line,
        relocated: resolved.anchor.relocated,
        content: loaded.mark.check_content.clone(),
        text,
        exception: loaded
            .exception
            .as_ref()
            .map(|exception| exception.description.clone()),
        direction: loaded
            .mark
            .direction()
            .map(|direction| direction.as_str().to_owned()),
        target,
        store: loaded.store.id.to_string(),
        module: loaded.store.module.clone(),
    }
}

fn normalize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
