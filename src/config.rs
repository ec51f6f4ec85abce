//! Configuration for pagesync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PAGESYNC_HOME, PAGESYNC_STORE)
//! 2. Config file (.pagesync/config.yaml)
//! 3. Defaults (~/.pagesync)
//!
//! Config file discovery:
//! - Searches current directory and parents for .pagesync/config.yaml
//! - `paths.home` is relative to the .pagesync/ directory, `paths.store`
//!   to the project root that contains it

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{EditorTiming, SyncLimits};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub limits: SyncLimits,
    #[serde(default)]
    pub timing: EditorTiming,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .pagesync/)
    pub home: Option<String>,
    /// Asset store root (relative to the project root)
    pub store: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to pagesync home
    pub home: PathBuf,
    /// Root of the file asset store
    pub store: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub limits: SyncLimits,
    pub timing: EditorTiming,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".pagesync").join("config.yaml");
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

/// Resolve a path that may be relative to the config file's parent
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

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".pagesync");

    let config_file = find_config_file();

    let (home, store, limits, timing) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        let pagesync_dir = config_path.parent().unwrap_or(Path::new("."));
        let base_dir = pagesync_dir.parent().unwrap_or(Path::new("."));

        let home = if let Ok(env_home) = std::env::var("PAGESYNC_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            resolve_path(pagesync_dir, home_path)
        } else {
            default_home.clone()
        };

        let store = if let Ok(env_store) = std::env::var("PAGESYNC_STORE") {
            PathBuf::from(env_store)
        } else if let Some(ref store_path) = config.paths.store {
            resolve_path(base_dir, store_path)
        } else {
            home.join("projects")
        };

        (home, store, config.limits, config.timing)
    } else {
        let home = std::env::var("PAGESYNC_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let store = std::env::var("PAGESYNC_STORE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("projects"));

        (home, store, SyncLimits::default(), EditorTiming::default())
    };

    Ok(ResolvedConfig {
        home,
        store,
        config_file,
        limits,
        timing,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the pagesync home directory
pub fn pagesync_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the asset store root
pub fn store_dir() -> Result<PathBuf> {
    Ok(config()?.store.clone())
}
