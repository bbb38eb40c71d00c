use std::path::{Path, PathBuf};
use std::str::FromStr;

use runinfo_cache::ContentRoot;
use runinfo_core::DEFAULT_MODULE_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!("unsupported output format '{other}', expected table or json")),
        }
    }
}

/// Parses `MODULE=PATH`. Relative paths are taken against `workspace`.
pub fn parse_content_root(value: &str, workspace: &Path) -> Result<ContentRoot, String> {
    let Some((module, path)) = value.split_once('=') else {
        return Err(format!("content root '{value}' must look like MODULE=PATH"));
    };

    let module = module.trim();
    let path = path.trim();
    if module.is_empty() || path.is_empty() {
        return Err(format!("content root '{value}' has an empty module or path"));
    }

    let path = PathBuf::from(path);
    let path = if path.is_absolute() {
        path
    } else {
        workspace.join(path)
    };
    Ok(ContentRoot::new(module, path))
}

/// Content roots from `--root` flags, or the workspace itself as the default module.
pub fn content_roots(values: &[String], workspace: &Path) -> Result<Vec<ContentRoot>, String> {
    if values.is_empty() {
        return Ok(vec![ContentRoot::new(DEFAULT_MODULE_NAME, workspace)]);
    }

    values
        .iter()
        .map(|value| parse_content_root(value, workspace))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_output_formats() {
        assert_eq!("table".parse::<OutputFormat>(), Ok(OutputFormat::Table));
        assert_eq!(" JSON ".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn parses_content_roots_relative_to_workspace() {
        let workspace = Path::new("/work");
        let root = parse_content_root("billing=services/billing", workspace).expect("parse root");
        assert_eq!(root.module, "billing");
        assert_eq!(root.path, PathBuf::from("/work/services/billing"));

        let absolute = parse_content_root("ops=/srv/ops", workspace).expect("parse root");
        assert_eq!(absolute.path, PathBuf::from("/srv/ops"));

        assert!(parse_content_root("no-separator", workspace).is_err());
        assert!(parse_content_root("=path", workspace).is_err());
    }

    #[test]
    fn defaults_to_workspace_as_main_module() {
        let roots = content_roots(&[], Path::new("/work")).expect("roots");
        assert_eq!(roots, vec![ContentRoot::new("main", "/work")]);
    }
}
