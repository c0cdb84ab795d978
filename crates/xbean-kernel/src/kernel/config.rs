use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kernel::constants::{DEFAULT_CONDITION_WAIT_MS, DEFAULT_KERNEL_NAME, DEFAULT_LOCK_TIMEOUT_MS};
use crate::kernel::error::{Error, Result};

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }

    /// Parse `data` into any deserializable document.
    pub fn parse<T: for<'de> Deserialize<'de>>(&self, data: &str) -> std::result::Result<T, String> {
        match self {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| format!("Failed to deserialize from JSON: {}", e)),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| format!("Failed to deserialize from YAML: {}", e)),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| format!("Failed to deserialize from TOML: {}", e)),
        }
    }

    /// Render any serializable document.
    pub fn render<T: Serialize>(&self, value: &T) -> std::result::Result<String, String> {
        match self {
            ConfigFormat::Json => {
                serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize to JSON: {}", e))
            }
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(value).map_err(|e| format!("Failed to serialize to YAML: {}", e)),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(value).map_err(|e| format!("Failed to serialize to TOML: {}", e)),
        }
    }
}

/// Settings of a [`StandaloneKernel`](crate::kernel::StandaloneKernel).
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Name reported in logs and errors
    pub kernel_name: String,
    /// How long an operation waits for a service's lock before failing
    pub lock_timeout_ms: u64,
    /// Longest single wait on conditions before they are re-evaluated
    pub condition_wait_ms: u64,
    /// Install a logging monitor for every service
    pub log_transitions: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kernel_name: DEFAULT_KERNEL_NAME.to_string(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            condition_wait_ms: DEFAULT_CONDITION_WAIT_MS,
            log_transitions: false,
        }
    }
}

impl KernelConfig {
    pub fn named(kernel_name: impl Into<String>) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            ..Self::default()
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_condition_wait(mut self, wait: Duration) -> Self {
        self.condition_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn condition_wait(&self) -> Duration {
        Duration::from_millis(self.condition_wait_ms)
    }

    /// Load a configuration file, picking the format from its extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path).ok_or_else(|| Error::Config {
            path: path.to_path_buf(),
            message: "Unsupported configuration file extension".to_string(),
        })?;
        let data = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: format!("Failed to read file: {}", e),
        })?;
        Self::parse_at(&data, format, path)
    }

    /// Parse a configuration held in memory.
    pub fn from_str(data: &str, format: ConfigFormat) -> Result<Self> {
        Self::parse_at(data, format, Path::new("<inline>"))
    }

    fn parse_at(data: &str, format: ConfigFormat, path: &Path) -> Result<Self> {
        let config: KernelConfig = format.parse(data).map_err(|message| Error::Config {
            path: path.to_path_buf(),
            message,
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Reject values no kernel can run with. `path` is only used for the error.
    pub fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |message: &str| Error::Config {
            path: PathBuf::from(path),
            message: message.to_string(),
        };
        if self.kernel_name.trim().is_empty() {
            return Err(invalid("kernel_name must not be empty"));
        }
        if self.lock_timeout_ms == 0 {
            return Err(invalid("lock_timeout_ms must be greater than zero"));
        }
        if self.condition_wait_ms == 0 {
            return Err(invalid("condition_wait_ms must be greater than zero"));
        }
        Ok(())
    }

    pub fn serialize(&self, format: ConfigFormat) -> Result<String> {
        format.render(self).map_err(|message| Error::Config {
            path: PathBuf::from("<inline>"),
            message,
        })
    }
}
