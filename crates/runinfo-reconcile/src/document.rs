use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Current text of one source file with a line index.
///
/// Lines are 0-based. A trailing newline opens an empty last line, so
/// `"a\n"` has two lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDocument {
    text: String,
    line_starts: Vec<usize>,
}

impl LiveDocument {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, byte)| *byte == b'\n')
                .map(|(index, _)| index + 1),
        );
        Self { text, line_starts }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn line_start_offset(&self, line: usize) -> Option<usize> {
        self.line_starts.get(line).copied()
    }

    /// Offset just past the last character of `line`, excluding its line break.
    pub fn line_end_offset(&self, line: usize) -> Option<usize> {
        let start = self.line_start_offset(line)?;
        let end = match self.line_starts.get(line + 1) {
            Some(next) => next - 1,
            None => self.text.len(),
        };
        let end = if end > start && self.text.as_bytes()[end - 1] == b'\r' {
            end - 1
        } else {
            end
        };
        Some(end)
    }

    pub fn line_text(&self, line: usize) -> Option<&str> {
        let start = self.line_start_offset(line)?;
        let end = self.line_end_offset(line)?;
        self.text.get(start..end)
    }

    /// Line containing `offset`. Offsets past the end map to the last line.
    pub fn line_of_offset(&self, offset: usize) -> usize {
        self.line_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1)
    }

    /// Offset of the first non-blank character on `line`, or the line end for blank lines.
    pub fn first_non_blank_offset(&self, line: usize) -> Option<usize> {
        let start = self.line_start_offset(line)?;
        let text = self.line_text(line)?;
        let indent = text.len() - text.trim_start_matches([' ', '\t']).len();
        Some(start + indent)
    }
}

/// Read access to the current text of files, by absolute path.
pub trait DocumentSource {
    fn document(&self, path: &Path) -> io::Result<LiveDocument>;
}

/// Reads documents straight from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDocuments;

impl DocumentSource for FsDocuments {
    fn document(&self, path: &Path) -> io::Result<LiveDocument> {
        fs::read_to_string(path).map(LiveDocument::new)
    }
}

/// Open editor buffers keyed by path. Unknown paths report `NotFound`.
impl DocumentSource for HashMap<PathBuf, String> {
    fn document(&self, path: &Path) -> io::Result<LiveDocument> {
        self.get(path)
            .map(|text| LiveDocument::new(text.as_str()))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_lines_and_offsets() {
        let doc = LiveDocument::new("first\r\n  second\n\nlast");
        assert_eq!(doc.line_count(), 4);
        assert_eq!(doc.line_text(0), Some("first"));
        assert_eq!(doc.line_text(1), Some("  second"));
        assert_eq!(doc.line_text(2), Some(""));
        assert_eq!(doc.line_text(3), Some("last"));
        assert_eq!(doc.line_text(4), None);

        assert_eq!(doc.line_start_offset(1), Some(7));
        assert_eq!(doc.first_non_blank_offset(1), Some(9));
        assert_eq!(doc.line_of_offset(0), 0);
        assert_eq!(doc.line_of_offset(8), 1);
        assert_eq!(doc.line_of_offset(1_000), 3);
    }

    #[test]
    fn trailing_newline_opens_an_empty_line() {
        let doc = LiveDocument::new("a\n");
        assert_eq!(doc.line_count(), 2);
        assert_eq!(doc.line_text(1), Some(""));
        assert_eq!(LiveDocument::new("").line_count(), 1);
    }

    #[test]
    fn fs_documents_report_missing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("present.py");
        fs::write(&path, "x = 1\n").expect("write file");

        let doc = FsDocuments.document(&path).expect("read document");
        assert_eq!(doc.line_text(0), Some("x = 1"));

        let err = FsDocuments
            .document(&temp.path().join("missing.py"))
            .expect_err("missing file");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn buffer_map_serves_documents() {
        let mut buffers = HashMap::new();
        buffers.insert(PathBuf::from("/w/a.py"), "unsaved()\n".to_owned());

        let doc = buffers.document(Path::new("/w/a.py")).expect("buffer");
        assert_eq!(doc.line_text(0), Some("unsaved()"));
        assert!(buffers.document(Path::new("/w/b.py")).is_err());
    }
}
