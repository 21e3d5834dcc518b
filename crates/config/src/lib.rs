#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for kiln
//!
//! Values are layered in this order, later layers winning:
//! - Default values (hard-coded)
//! - Configuration file (`~/.config/kiln/config.toml` or `--config`)
//! - Environment variables (`KILN_*`)

pub mod constants;

use kiln_errors::{ConfigError, Error};
use kiln_types::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use constants::{
    COMPILATION_LOG_DIR, DEFAULT_BASE_DIR, ENV_BASE_DIR, ENV_BLOBS_DIR, ENV_COMPILE_DIR,
    ENV_NETWORK_RETRIES, ENV_NETWORK_TIMEOUT, ENV_OUTPUT,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub paths: PathConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub compile: CompileConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeneralConfig {
    #[serde(default)]
    pub default_output: OutputFormat,
}

/// Directory layout of the agent
///
/// Every directory left unset is derived from `base_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    pub compile_dir: Option<PathBuf>,
    pub packages_dir: Option<PathBuf>,
    pub enable_dir: Option<PathBuf>,
    pub blobs_dir: Option<PathBuf>,
    pub tmp_dir: Option<PathBuf>,
    pub logs_dir: Option<PathBuf>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64, // seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64, // seconds
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64, // seconds
}

/// Compilation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Interpreter the packaging script is run with
    #[serde(default = "default_script_shell")]
    pub script_shell: String,
    #[serde(default = "default_script_shell_args")]
    pub script_shell_args: Vec<String>,
    /// Bytes of script output kept in memory and in error messages
    #[serde(default = "default_output_truncate_bytes")]
    pub output_truncate_bytes: usize,
    /// Serialize concurrent compiles of the same package name
    #[serde(default = "default_serialize_by_name")]
    pub serialize_by_name: bool,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            compile_dir: None,
            packages_dir: None,
            enable_dir: None,
            blobs_dir: None,
            tmp_dir: None,
            logs_dir: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            retries: default_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            script_shell: default_script_shell(),
            script_shell_args: default_script_shell_args(),
            output_truncate_bytes: default_output_truncate_bytes(),
            serialize_by_name: default_serialize_by_name(),
        }
    }
}

// Default value functions for serde
fn default_base_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DIR)
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1
}

fn default_script_shell() -> String {
    "bash".to_string()
}

fn default_script_shell_args() -> Vec<String> {
    vec!["-x".to_string()]
}

fn default_output_truncate_bytes() -> usize {
    10 * 1024
}

fn default_serialize_by_name() -> bool {
    true
}

impl PathConfig {
    /// Parent of every per-package compile directory
    #[must_use]
    pub fn compile_dir(&self) -> PathBuf {
        self.resolve(self.compile_dir.as_ref(), &["data", "compile"])
    }

    /// Root of installed package bundles
    #[must_use]
    pub fn packages_dir(&self) -> PathBuf {
        self.resolve(self.packages_dir.as_ref(), &["data", "packages"])
    }

    /// Directory holding the enable symlinks of active bundles
    #[must_use]
    pub fn enable_dir(&self) -> PathBuf {
        self.resolve(self.enable_dir.as_ref(), &["packages"])
    }

    /// Local blobstore root
    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.resolve(self.blobs_dir.as_ref(), &["data", "blobs"])
    }

    /// Scratch space for downloads and compressed artifacts
    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.resolve(self.tmp_dir.as_ref(), &["data", "tmp"])
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.resolve(self.logs_dir.as_ref(), &["data", "sys", "log"])
    }

    /// Where packaging script output is written
    #[must_use]
    pub fn compilation_logs_dir(&self) -> PathBuf {
        self.logs_dir().join(COMPILATION_LOG_DIR)
    }

    fn resolve(&self, explicit: Option<&PathBuf>, default: &[&str]) -> PathBuf {
        explicit.cloned().unwrap_or_else(|| {
            default
                .iter()
                .fold(self.base_dir.clone(), |path, part| path.join(part))
        })
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("kiln").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if fs::try_exists(&config_path).await.unwrap_or(false) {
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        self.merge_from(|key| std::env::var(key).ok())
    }

    /// Apply `KILN_*` overrides looked up through `lookup`
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed into the expected type.
    pub fn merge_from<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(output) = lookup(ENV_OUTPUT) {
            self.general.default_output = match output.as_str() {
                "plain" => OutputFormat::Plain,
                "tty" => OutputFormat::Tty,
                "json" => OutputFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: ENV_OUTPUT.to_string(),
                        value: output,
                    }
                    .into())
                }
            };
        }

        if let Some(base) = lookup(ENV_BASE_DIR) {
            self.paths.base_dir = PathBuf::from(base);
        }

        if let Some(dir) = lookup(ENV_COMPILE_DIR) {
            self.paths.compile_dir = Some(PathBuf::from(dir));
        }

        if let Some(dir) = lookup(ENV_BLOBS_DIR) {
            self.paths.blobs_dir = Some(PathBuf::from(dir));
        }

        if let Some(timeout) = lookup(ENV_NETWORK_TIMEOUT) {
            self.network.timeout = timeout.parse().map_err(|_| ConfigError::InvalidValue {
                field: ENV_NETWORK_TIMEOUT.to_string(),
                value: timeout,
            })?;
        }

        if let Some(retries) = lookup(ENV_NETWORK_RETRIES) {
            self.network.retries = retries.parse().map_err(|_| ConfigError::InvalidValue {
                field: ENV_NETWORK_RETRIES.to_string(),
                value: retries,
            })?;
        }

        Ok(())
    }

    /// Check values that serde cannot
    ///
    /// # Errors
    ///
    /// Returns an error for relative directories, an empty script shell or
    /// a zero network timeout.
    pub fn validate(&self) -> Result<(), Error> {
        let paths = [
            ("paths.base_dir", self.paths.base_dir.clone()),
            ("paths.compile_dir", self.paths.compile_dir()),
            ("paths.packages_dir", self.paths.packages_dir()),
            ("paths.enable_dir", self.paths.enable_dir()),
            ("paths.blobs_dir", self.paths.blobs_dir()),
            ("paths.tmp_dir", self.paths.tmp_dir()),
            ("paths.logs_dir", self.paths.logs_dir()),
        ];
        for (field, path) in paths {
            if path.is_relative() {
                return Err(ConfigError::RelativePath {
                    field: field.to_string(),
                    path: path.display().to_string(),
                }
                .into());
            }
        }

        if self.compile.script_shell.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "compile.script_shell".to_string(),
                value: self.compile.script_shell.clone(),
            }
            .into());
        }

        if self.network.timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "network.timeout".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
