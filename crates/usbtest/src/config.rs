//! Harness configuration management

use anyhow::{Context, Result, anyhow};
use common::VALID_LOG_LEVELS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use usbctrl::DeviceFilter;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub events: EventSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// Device class to enumerate and monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Kernel subsystem (e.g. "usb")
    pub subsystem: String,
    /// Device type within the subsystem; empty matches every type
    pub devtype: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let filter = DeviceFilter::default();
        Self {
            subsystem: filter.subsystem,
            devtype: filter.devtype.unwrap_or_default(),
        }
    }
}

impl MonitorSettings {
    pub fn filter(&self) -> DeviceFilter {
        DeviceFilter {
            subsystem: self.subsystem.clone(),
            devtype: (!self.devtype.is_empty()).then(|| self.devtype.clone()),
        }
    }
}

/// Event delivery from the monitor thread to the async printer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Bounded queue length; a full queue stalls the monitor thread
    #[serde(default = "EventSettings::default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_capacity: Self::default_queue_capacity(),
        }
    }
}

impl EventSettings {
    fn default_queue_capacity() -> usize {
        64
    }
}

impl HarnessConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbctrl/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HarnessConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbctrl").join("config.toml")
        } else {
            PathBuf::from(".config/usbctrl/config.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if self.monitor.subsystem.trim().is_empty() {
            return Err(anyhow!("Monitor subsystem must not be empty"));
        }

        if self.events.queue_capacity == 0 {
            return Err(anyhow!("Event queue capacity must be greater than 0"));
        }

        Ok(())
    }
}
