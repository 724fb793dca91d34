//! Configuration loading and parsing.
//!
//! Parses `metav.toml` (or an override path provided by the binary),
//! extracting `[search]` include and module path lists that seed the
//! command line's `-I`/`-y` flags. Everything is optional: a missing file,
//! a missing section, or unknown fields all degrade to defaults so a bare
//! checkout works without any configuration at all.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct SearchConfig {
    /// Directories searched by `` `include `` resolution.
    #[serde(default)]
    pub include: Vec<PathBuf>,
    /// Directories searched for module source files.
    #[serde(default)]
    pub modules: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
}

/// Config path: project-local `metav.toml`. Search paths are per-project
/// concerns, so no platform config directory is consulted.
pub fn discover() -> PathBuf {
    PathBuf::from("metav.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), "loaded configuration");
                Ok(Config {
                    raw: Some(content),
                    file,
                })
            }
            Err(e) => {
                // A broken config must not take the tool down; fall back to
                // defaults and say so.
                warn!(target: "config", path = %path.display(), error = %e, "config parse failed, using defaults");
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

impl Config {
    /// Effective search paths: command-line entries first, then configured
    /// ones, then the working directory as a last resort.
    fn search_paths(cli: &[PathBuf], configured: &[PathBuf]) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = cli.to_vec();
        paths.extend(configured.iter().cloned());
        if paths.is_empty() {
            paths.push(PathBuf::from("."));
        }
        paths
    }

    pub fn include_paths(&self, cli: &[PathBuf]) -> Vec<PathBuf> {
        Self::search_paths(cli, &self.file.search.include)
    }

    pub fn module_paths(&self, cli: &[PathBuf]) -> Vec<PathBuf> {
        Self::search_paths(cli, &self.file.search.modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_defaults() {
        let config = load_from(Some(PathBuf::from("/nonexistent/metav.toml"))).unwrap();
        assert!(config.raw.is_none());
        assert!(config.file.search.include.is_empty());
    }

    #[test]
    fn parses_search_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metav.toml");
        fs::write(
            &path,
            "[search]\ninclude = [\"rtl/include\"]\nmodules = [\"rtl\", \"lib\"]\n",
        )
        .unwrap();
        let config = load_from(Some(path)).unwrap();
        assert_eq!(
            config.file.search.include,
            vec![PathBuf::from("rtl/include")]
        );
        assert_eq!(config.file.search.modules.len(), 2);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metav.toml");
        fs::write(&path, "[search]\ninclude = []\nfuture_knob = 3\n").unwrap();
        let config = load_from(Some(path)).unwrap();
        assert!(config.file.search.include.is_empty());
    }

    #[test]
    fn broken_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metav.toml");
        fs::write(&path, "not toml at all [").unwrap();
        let config = load_from(Some(path)).unwrap();
        assert!(config.raw.is_none());
    }

    #[test]
    fn cli_paths_come_first() {
        let config = Config {
            raw: None,
            file: ConfigFile {
                search: SearchConfig {
                    include: vec![PathBuf::from("cfg")],
                    modules: vec![],
                },
            },
        };
        let paths = config.include_paths(&[PathBuf::from("cli")]);
        assert_eq!(paths, vec![PathBuf::from("cli"), PathBuf::from("cfg")]);
        assert_eq!(config.module_paths(&[]), vec![PathBuf::from(".")]);
    }
}
