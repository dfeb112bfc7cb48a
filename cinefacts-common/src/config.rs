//! Bootstrap configuration and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`CINEFACTS_ROOT_FOLDER`, then `CINEFACTS_ROOT`)
//! 3. TOML bootstrap file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! Missing or unreadable TOML files never abort startup: a warning is logged
//! and compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Primary root folder environment variable
pub const ROOT_FOLDER_ENV: &str = "CINEFACTS_ROOT_FOLDER";

/// Alternative (short) root folder environment variable
pub const ROOT_ENV: &str = "CINEFACTS_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "cinefacts.db";

/// Policy file name inside the root folder
pub const POLICY_FILE: &str = "policy.toml";

/// Bootstrap configuration loaded from TOML
///
/// Only static startup concerns live here. Resolution policy (trust tiers,
/// weights, governance rules) is a separate document owned by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and policy file
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP port for the query surface
    #[serde(default = "default_port")]
    pub port: u16,

    /// Explicit policy file (defaults to `<root>/policy.toml`)
    #[serde(default)]
    pub policy_file: Option<PathBuf>,

    /// Entities resolved in parallel during batch runs
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Maximum time spent retrying a locked database write
    #[serde(default = "default_max_lock_wait_ms")]
    pub database_max_lock_wait_ms: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            policy_file: None,
            batch_concurrency: default_batch_concurrency(),
            database_max_lock_wait_ms: default_max_lock_wait_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_port() -> u16 {
    5830
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Compiled-in defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/cinefacts (or /var/lib/cinefacts for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("cinefacts"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/cinefacts"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("cinefacts"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/cinefacts"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("cinefacts"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\cinefacts"))
    } else {
        PathBuf::from("./cinefacts_data")
    }
}

/// Default bootstrap file location for a module
///
/// `~/.config/cinefacts/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cinefacts").join(format!("{}.toml", module_name)))
}

/// Load a bootstrap TOML file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the bootstrap file for a module, falling back to defaults
///
/// Never fails: a missing file is silent, an invalid file logs a warning.
pub fn load_or_default(module_name: &str) -> TomlConfig {
    let Some(path) = default_config_path(module_name) else {
        return TomlConfig::default();
    };

    if !path.exists() {
        debug!("No bootstrap config at {}, using defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; using compiled defaults", e);
            TomlConfig::default()
        }
    }
}

/// Write a bootstrap TOML file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolves the root folder following the documented priority order
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_config: Option<TomlConfig>,
}

impl RootFolderResolver {
    /// Create a resolver for a module (used to locate its TOML file)
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_config: None,
        }
    }

    /// Supply the command-line override
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Supply an already loaded bootstrap config instead of reading the default file
    pub fn with_toml_config(mut self, config: TomlConfig) -> Self {
        self.toml_config = Some(config);
        self
    }

    /// Resolve the root folder
    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        // Priority 2: Environment variables
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var(ROOT_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        let toml_root = match &self.toml_config {
            Some(config) => config.root_folder.clone(),
            None => load_or_default(&self.module_name).root_folder,
        };
        if let Some(path) = toml_root {
            return path;
        }

        // Priority 4: OS-dependent compiled default
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and derives file locations inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            debug!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// `<root>/cinefacts.db`
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    /// `<root>/policy.toml`
    pub fn policy_path(&self) -> PathBuf {
        self.root_folder.join(POLICY_FILE)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_config_defaults_from_empty_document() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 5830);
        assert_eq!(config.batch_concurrency, 4);
        assert_eq!(config.database_max_lock_wait_ms, 5000);
        assert_eq!(config.logging.level, "info");
        assert!(config.policy_file.is_none());
    }

    #[test]
    fn test_toml_config_partial_override() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 9000
            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.batch_concurrency, 4);
    }

    #[test]
    fn test_cli_arg_wins() {
        let resolver = RootFolderResolver::new("test-module")
            .with_cli_arg(Some(PathBuf::from("/tmp/cinefacts-cli")));
        assert_eq!(resolver.resolve(), PathBuf::from("/tmp/cinefacts-cli"));
    }

    #[test]
    fn test_write_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("resolver.toml");

        let mut config = TomlConfig::default();
        config.port = 7001;
        config.policy_file = Some(PathBuf::from("/etc/cinefacts/policy.toml"));

        write_toml_config(&config, &path).unwrap();
        let loaded = load_toml_config(&path).unwrap();

        assert_eq!(loaded.port, 7001);
        assert_eq!(
            loaded.policy_file,
            Some(PathBuf::from("/etc/cinefacts/policy.toml"))
        );
    }

    #[test]
    fn test_load_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        let result = load_toml_config(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
