//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root data folder
pub const ROOT_FOLDER_ENV: &str = "QRTRACE_ROOT_FOLDER";

/// Bootstrap configuration read from the TOML config file
///
/// Only bootstrap concerns live here (where the data folder is, how to log,
/// initial credentials). Tunable runtime settings live in the `settings`
/// table once the database exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root data folder (overridden by env var and CLI argument)
    pub root_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Anthropic API key for destination classification (optional feature)
    pub anthropic_api_key: Option<String>,

    /// Twilio REST credentials for the SMS channel
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file path (stdout when absent)
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

fn default_log_level() -> String {
    "info".to_string()
}

/// Load the bootstrap TOML config from the default platform location
///
/// A missing or unparseable file degrades to defaults; the service must be
/// able to start with zero configuration.
pub fn load_toml_config() -> TomlConfig {
    let path = match find_config_file() {
        Ok(path) => path,
        Err(_) => return TomlConfig::default(),
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str::<TomlConfig>(&content) {
            Ok(config) => {
                info!("Loaded config file: {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                TomlConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            TomlConfig::default()
        }
    }
}

/// Resolves the root data folder for a service
///
/// Priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable `QRTRACE_ROOT_FOLDER`
/// 3. TOML config file `root_folder` key
/// 4. OS-dependent compiled default (fallback)
pub struct RootFolderResolver {
    module_name: String,
    cli_override: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_override: None,
        }
    }

    /// Attach the CLI-provided root folder, if any
    pub fn with_cli_override(mut self, path: Option<PathBuf>) -> Self {
        self.cli_override = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_override {
            info!(module = %self.module_name, "Root folder from CLI: {}", path.display());
            return path.clone();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            info!(module = %self.module_name, "Root folder from {}: {}", ROOT_FOLDER_ENV, path);
            return PathBuf::from(path);
        }

        // Priority 3: TOML config file
        if let Some(path) = load_toml_config().root_folder {
            info!(module = %self.module_name, "Root folder from config file: {}", path.display());
            return path;
        }

        // Priority 4: OS-dependent compiled default
        let path = get_default_root_folder();
        info!(module = %self.module_name, "Root folder defaulted: {}", path.display());
        path
    }
}

/// Prepares the root folder layout on first run
///
/// The root folder holds the database plus the capture and snapshot
/// artifact directories:
///
/// ```text
/// <root>/qrtrace.db
/// <root>/images/      submitted QR photographs
/// <root>/snapshots/   fetched destination page bodies
/// ```
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder and artifact subdirectories if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.images_dir())?;
        std::fs::create_dir_all(self.snapshots_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("qrtrace.db")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root_folder.join("images")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root_folder.join("snapshots")
    }
}

/// Get default configuration file path for the platform
fn find_config_file() -> Result<PathBuf> {
    let config_path = if cfg!(target_os = "linux") {
        // Try ~/.config/qrtrace/config.toml first, then /etc/qrtrace/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("qrtrace").join("config.toml"));
        let system_config = PathBuf::from("/etc/qrtrace/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    } else if cfg!(target_os = "macos") || cfg!(target_os = "windows") {
        dirs::config_dir()
            .map(|d| d.join("qrtrace").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?
    } else {
        return Err(Error::Config("Unsupported platform".to_string()));
    };

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {:?}",
            config_path
        )))
    }
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/qrtrace (or /var/lib/qrtrace for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("qrtrace"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/qrtrace"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/qrtrace
        dirs::data_dir()
            .map(|d| d.join("qrtrace"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/qrtrace"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\qrtrace
        dirs::data_local_dir()
            .map(|d| d.join("qrtrace"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\qrtrace"))
    } else {
        PathBuf::from("./qrtrace_data")
    }
}
