use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use runinfo_config::{config_path, write_default_config};

/// Writes `.runinfo/config.toml` with default values and prints its path.
///
/// An existing config is left untouched and reported as an error.
pub fn run_init_config_once(workspace: &Path, out: &mut dyn Write) -> Result<()> {
    let path = config_path(workspace);
    if path.exists() {
        bail!("config already exists at {}", path.display());
    }

    let path = write_default_config(workspace)
        .with_context(|| format!("failed to write default config at {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote default config");
    writeln!(out, "{}", path.display())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use runinfo_config::{RuninfoConfig, load_workspace_config};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn writes_a_loadable_default_config_once() {
        let temp = tempdir().expect("tempdir");
        let mut out = Vec::new();

        run_init_config_once(temp.path(), &mut out).expect("init config");
        let printed = String::from_utf8(out).expect("utf8 output");
        assert_eq!(printed.trim(), config_path(temp.path()).display().to_string());
        assert_eq!(
            load_workspace_config(temp.path()).expect("load config"),
            RuninfoConfig::default()
        );

        let mut again = Vec::new();
        assert!(run_init_config_once(temp.path(), &mut again).is_err());
        assert!(again.is_empty());
    }
}
