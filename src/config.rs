//! Configuration for clipforge paths and default limits.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CLIPFORGE_HOME, CLIPFORGE_PIPELINES)
//! 2. Config file (.clipforge/config.yaml)
//! 3. Defaults (~/.clipforge, ./pipelines)
//!
//! Config file discovery:
//! - Searches current directory and parents for .clipforge/config.yaml
//! - `paths.home` is relative to the .clipforge/ directory, every other
//!   path is relative to the project root (the parent of .clipforge/)
//!
//! The configuration is resolved once by the CLI and passed down
//! explicitly.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::RunLimits;

const CONFIG_DIR: &str = ".clipforge";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub limits: Option<RunLimits>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .clipforge/)
    pub home: Option<String>,
    /// Pipeline definitions (relative to the project root)
    pub pipelines: Option<String>,
    /// Where finished clips are copied (relative to the project root)
    pub output: Option<String>,
}

/// Environment overrides
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<PathBuf>,
    pub pipelines: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            home: std::env::var_os("CLIPFORGE_HOME").map(PathBuf::from),
            pipelines: std::env::var_os("CLIPFORGE_PIPELINES").map(PathBuf::from),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state (run journals)
    pub home: PathBuf,
    /// Directory searched for `<name>.yaml` pipelines
    pub pipelines_dir: PathBuf,
    /// Default destination for finished clips
    pub output_dir: Option<PathBuf>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Limits for pipelines that do not set their own
    pub limits: RunLimits,
}

impl ResolvedConfig {
    /// Load configuration for the current process
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR);

        Self::resolve(&EnvOverrides::from_env(), &cwd, default_home)
    }

    /// Resolve configuration from explicit sources
    pub fn resolve(env: &EnvOverrides, cwd: &Path, default_home: PathBuf) -> Result<Self> {
        let config_file = find_config_file(cwd);

        let (home, pipelines_dir, output_dir, limits) = match &config_file {
            Some(config_path) => {
                let config = load_config_file(config_path)?;

                // .clipforge/ and the project root above it
                let config_dir = config_path.parent().unwrap_or(Path::new("."));
                let base_dir = config_dir.parent().unwrap_or(Path::new("."));

                let home = match (&env.home, &config.paths.home) {
                    (Some(home), _) => home.clone(),
                    (None, Some(home)) => resolve_path(config_dir, home),
                    (None, None) => default_home,
                };
                let pipelines_dir = match (&env.pipelines, &config.paths.pipelines) {
                    (Some(dir), _) => dir.clone(),
                    (None, Some(dir)) => resolve_path(base_dir, dir),
                    (None, None) => base_dir.join("pipelines"),
                };
                let output_dir = config
                    .paths
                    .output
                    .as_deref()
                    .map(|dir| resolve_path(base_dir, dir));

                (home, pipelines_dir, output_dir, config.limits.unwrap_or_default())
            }
            None => (
                env.home.clone().unwrap_or(default_home),
                env.pipelines.clone().unwrap_or_else(|| cwd.join("pipelines")),
                None,
                RunLimits::default(),
            ),
        };

        Ok(Self {
            home,
            pipelines_dir,
            output_dir,
            config_file,
            limits,
        })
    }

    /// Run journals ($CLIPFORGE_HOME/runs)
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Locate a pipeline by name or path.
    ///
    /// Tries, in order: the argument as a file path, `<pipelines_dir>/<name>.yaml`,
    /// `<name>.yaml` in the current directory.
    pub fn pipeline_path(&self, name: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(name);
        let candidates = [
            direct.clone(),
            self.pipelines_dir.join(format!("{}.yaml", name)),
            PathBuf::from(format!("{}.yaml", name)),
        ];

        candidates.into_iter().find(|path| path.is_file())
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let temp = TempDir::new().unwrap();
        let config = ResolvedConfig::resolve(
            &EnvOverrides::default(),
            temp.path(),
            PathBuf::from("/users/me/.clipforge"),
        )
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/users/me/.clipforge"));
        assert_eq!(config.runs_dir(), PathBuf::from("/users/me/.clipforge/runs"));
        assert_eq!(config.pipelines_dir, temp.path().join("pipelines"));
        assert_eq!(config.limits, RunLimits::default());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_env_overrides_win() {
        let temp = TempDir::new().unwrap();
        let env = EnvOverrides {
            home: Some(PathBuf::from("/srv/clipforge")),
            pipelines: Some(PathBuf::from("/srv/pipelines")),
        };

        let config = ResolvedConfig::resolve(&env, temp.path(), PathBuf::from("/unused")).unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/clipforge"));
        assert_eq!(config.pipelines_dir, PathBuf::from("/srv/pipelines"));
    }

    #[test]
    fn test_config_file_discovered_from_subdirectory() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::create_dir_all(&nested).unwrap();

        let mut file = std::fs::File::create(config_dir.join(CONFIG_FILE)).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
  pipelines: defs
  output: out
limits:
  default_timeout_seconds: 30
"#
        )
        .unwrap();

        let config =
            ResolvedConfig::resolve(&EnvOverrides::default(), &nested, PathBuf::from("/unused"))
                .unwrap();

        assert_eq!(config.home, config_dir.join("./state"));
        assert_eq!(config.pipelines_dir, temp.path().join("defs"));
        assert_eq!(config.output_dir, Some(temp.path().join("out")));
        assert_eq!(config.limits.default_timeout_seconds, 30);
        assert_eq!(config.limits.run_timeout_seconds, 1800);
        assert!(config.config_file.is_some());
    }

    #[test]
    fn test_pipeline_lookup() {
        let temp = TempDir::new().unwrap();
        let pipelines = temp.path().join("pipelines");
        std::fs::create_dir_all(&pipelines).unwrap();
        std::fs::write(pipelines.join("short.yaml"), "name: short").unwrap();

        let config = ResolvedConfig::resolve(
            &EnvOverrides::default(),
            temp.path(),
            PathBuf::from("/unused"),
        )
        .unwrap();

        assert_eq!(config.pipeline_path("short"), Some(pipelines.join("short.yaml")));
        assert_eq!(config.pipeline_path("missing-pipeline-name"), None);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
    }
}
