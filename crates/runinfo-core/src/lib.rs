use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const DEFAULT_STORE_FILE_NAME: &str = ".runtime_info0";
pub const DEFAULT_MODULE_NAME: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum MarkKind {
    RedUnderline,
    Suffix,
    GutterLink,
}

impl MarkKind {
    pub const ALL: [MarkKind; 3] = [Self::RedUnderline, Self::Suffix, Self::GutterLink];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RedUnderline => "red_underline",
            Self::Suffix => "suffix",
            Self::GutterLink => "gutter_link",
        }
    }

    /// Value of the `type` column written by the test-run producer.
    pub fn store_value(self) -> &'static str {
        match self {
            Self::RedUnderline => "RedUnderLineDecoration",
            Self::Suffix => "Suffix",
            Self::GutterLink => "GutterLink",
        }
    }

    pub fn from_store_value(value: &str) -> Option<Self> {
        match value.trim() {
            "RedUnderLineDecoration" => Some(Self::RedUnderline),
            "Suffix" => Some(Self::Suffix),
            "GutterLink" => Some(Self::GutterLink),
            _ => None,
        }
    }
}

impl std::str::FromStr for MarkKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "red_underline" => Ok(Self::RedUnderline),
            "suffix" => Ok(Self::Suffix),
            "gutter_link" => Ok(Self::GutterLink),
            other => Err(format!(
                "invalid mark kind '{other}', expected one of: red_underline, suffix, gutter_link"
            )),
        }
    }
}

impl fmt::Display for MarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a gutter link along the recorded call stack.
///
/// `Up` points at the caller frame, `Down` at the callee frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GutterDirection {
    Up,
    Down,
}

impl GutterDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn from_store_value(value: &str) -> Option<Self> {
        match value.trim() {
            "U" | "u" | "up" | "UP" => Some(Self::Up),
            "D" | "d" | "down" | "DOWN" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GutterTarget {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub direction: GutterDirection,
}

/// One recorded annotation. Lines and columns are 0-based and describe the
/// document as it was when the test run captured it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub id: i64,
    pub kind: MarkKind,
    pub source_file: String,
    pub begin_line: usize,
    pub begin_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub check_content: String,
    pub display_text: String,
    pub target: Option<GutterTarget>,
    pub exception_id: Option<i64>,
}

impl Mark {
    /// Marks without content cannot be re-located and are never matched.
    pub fn is_relocatable(&self) -> bool {
        !self.check_content.trim().is_empty()
    }

    pub fn direction(&self) -> Option<GutterDirection> {
        self.target.as_ref().map(|target| target.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    pub id: i64,
    pub source_file: String,
    pub line: usize,
    pub short_text: String,
    pub description: String,
    pub stacktrace_length: u32,
}

/// Identity of a store, stable for a given store file location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(String);

impl StoreId {
    pub fn for_path(file_path: &Path) -> Self {
        let normalized = normalize_path(&file_path.to_string_lossy());
        Self(blake3::hash(normalized.as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// Exception ids are only unique inside one store, so lookups carry the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExceptionKey {
    pub store: StoreId,
    pub id: i64,
}

/// A metadata store discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub file_path: PathBuf,
    pub root_path: PathBuf,
    pub module: String,
}

impl Store {
    pub fn new(file_path: impl Into<PathBuf>, module: impl Into<String>) -> Self {
        let file_path = clean_path(&file_path.into());
        let root_path = file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            id: StoreId::for_path(&file_path),
            file_path,
            root_path,
            module: module.into(),
        }
    }

    pub fn covers(&self, path: &Path) -> bool {
        clean_path(path).starts_with(&self.root_path)
    }

    /// Path of `path` relative to the store root, with forward slashes.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        clean_path(path)
            .strip_prefix(&self.root_path)
            .ok()
            .map(|relative| normalize_path(&relative.to_string_lossy()))
    }

    /// Resolves a recorded path, which may be store-relative, to a filesystem path.
    pub fn resolve(&self, recorded: &str) -> PathBuf {
        let recorded = Path::new(recorded);
        if recorded.is_absolute() {
            clean_path(recorded)
        } else {
            clean_path(&self.root_path.join(recorded))
        }
    }

    pub fn exception_key(&self, id: i64) -> ExceptionKey {
        ExceptionKey {
            store: self.id.clone(),
            id,
        }
    }
}

/// A cached mark together with the store it came from and its exception.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedMark {
    pub mark: Mark,
    pub store: Arc<Store>,
    pub exception: Option<Arc<Exception>>,
}

impl LoadedMark {
    pub fn exception_key(&self) -> Option<ExceptionKey> {
        self.mark
            .exception_id
            .map(|id| self.store.exception_key(id))
    }

    /// Text that identifies the failure this mark belongs to.
    pub fn exception_text(&self) -> &str {
        match &self.exception {
            Some(exception) => &exception.short_text,
            None => &self.mark.display_text,
        }
    }

    pub fn stacktrace_length(&self) -> u32 {
        self.exception
            .as_ref()
            .map(|exception| exception.stacktrace_length)
            .unwrap_or(u32::MAX)
    }

    pub fn target_path(&self) -> Option<PathBuf> {
        self.mark
            .target
            .as_ref()
            .map(|target| self.store.resolve(&target.path))
    }
}

pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Lexically removes `.` and `..` components without touching the filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
