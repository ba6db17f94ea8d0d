//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/kb.sqlite"
//!
//! [project]
//! name = "main"
//! root = "~/notes"
//! update_permalinks_on_move = false
//! exclude_globs = ["drafts/**"]
//!
//! [search]
//! default_limit = 10
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub project: ProjectConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    pub name: String,
    pub root: PathBuf,
    /// Rewrite a moved note's permalink (and frontmatter) to match its new path.
    #[serde(default)]
    pub update_permalinks_on_move: bool,
    /// Extra glob patterns (relative to `root`) the scanner skips.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

fn default_limit() -> i64 {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.db.path = expand_tilde(&config.db.path);
    config.project.root = expand_tilde(&config.project.root);
    validate(&config)?;
    Ok(config)
}

/// Replace a leading `~` with `$HOME`. Other paths are returned unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s == "~" || s.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            return match s.strip_prefix("~/") {
                Some(rest) => home.join(rest),
                None => home,
            };
        }
    }
    path.to_path_buf()
}

pub fn validate(config: &Config) -> Result<()> {
    if config.project.name.trim().is_empty() {
        anyhow::bail!("project.name must not be empty");
    }

    if config.search.default_limit < 1 {
        anyhow::bail!("search.default_limit must be >= 1");
    }

    for pattern in &config.project.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid exclude glob in project.exclude_globs: {}", pattern))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn defaults_apply() {
        let cfg = parse(
            r#"
[db]
path = "kb.sqlite"

[project]
name = "main"
root = "notes"
"#,
        );
        assert!(!cfg.project.update_permalinks_on_move);
        assert!(cfg.project.exclude_globs.is_empty());
        assert_eq!(cfg.search.default_limit, 10);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn rejects_empty_project_name() {
        let cfg = parse(
            r#"
[db]
path = "kb.sqlite"

[project]
name = "  "
root = "notes"
"#,
        );
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_bad_glob() {
        let cfg = parse(
            r#"
[db]
path = "kb.sqlite"

[project]
name = "main"
root = "notes"
exclude_globs = ["a/[b"]

[search]
default_limit = 5
"#,
        );
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("exclude"));
    }

    #[test]
    fn expand_tilde_uses_home() {
        let expanded = expand_tilde(Path::new("~/notes/inbox"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("notes/inbox"));

        let absolute = Path::new("/srv/notes");
        assert_eq!(expand_tilde(absolute), absolute.to_path_buf());
        assert_eq!(expand_tilde(Path::new("notes/~draft")), PathBuf::from("notes/~draft"));
    }

    #[test]
    fn load_config_expands_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.toml");
        std::fs::write(
            &path,
            "[db]\npath = \"~/data/kb.sqlite\"\n\n[project]\nname = \"main\"\nroot = \"~/notes\"\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert!(!cfg.project.root.to_string_lossy().starts_with('~'));
        assert!(cfg.project.root.ends_with("notes"));
        assert!(cfg.db.path.ends_with("data/kb.sqlite"));
    }
}
