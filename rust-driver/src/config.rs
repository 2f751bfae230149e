use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{bus::RetryBudget, constants::BAR_INDEX};

const DEFAULT_CONFIG_PATH: &str = "/etc/dagcfg/config.toml";

const DEFAULT_SETTLE_US: u64 = 15;
const DEFAULT_READY_BUDGET: usize = 500;
const DEFAULT_CONTROLLER_POLL_BUDGET: usize = 1000;

/// Errors raised while loading the configuration file
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The file is not valid TOML for [`CardConfig`]
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Timing of the bit-banged two-wire bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Delay after every line transition, in microseconds
    pub settle_us: u64,
    /// Attempts made by "wait for ready" loops
    pub ready_budget: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            settle_us: DEFAULT_SETTLE_US,
            ready_budget: DEFAULT_READY_BUDGET,
        }
    }
}

impl BusConfig {
    /// The settle delay as a [`Duration`]
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_micros(self.settle_us)
    }

    /// The ready polling budget
    #[must_use]
    pub fn ready_budget(&self) -> RetryBudget {
        RetryBudget::new(self.ready_budget)
    }
}

/// Register-mediated bus controller settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Status polls before a command is declared stuck
    pub poll_budget: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_budget: DEFAULT_CONTROLLER_POLL_BUDGET,
        }
    }
}

impl ControllerConfig {
    /// The status polling budget
    #[must_use]
    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.poll_budget)
    }
}

/// How the register window is mapped
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PciBackend {
    /// The sysfs `resourceN` file
    #[default]
    Sysfs,
    /// A device bound to vfio-pci
    Vfio,
}

/// PCI device selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PciConfig {
    /// BAR holding the register window
    pub bar_index: usize,
    /// Explicit sysfs device directory, bypassing discovery
    pub sysfs_path: Option<String>,
    /// Register window mapping
    pub backend: PciBackend,
    /// Issue a function reset before the enumeration table is scanned
    pub reset_on_open: bool,
}

impl Default for PciConfig {
    fn default() -> Self {
        Self {
            bar_index: BAR_INDEX,
            sysfs_path: None,
            backend: PciBackend::Sysfs,
            reset_on_open: false,
        }
    }
}

/// Card runtime configuration
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardConfig {
    /// Two-wire bus timing
    pub bus: BusConfig,
    /// Bus controller polling
    pub controller: ControllerConfig,
    /// Device selection
    pub pci: PciConfig,
}

/// Loads [`CardConfig`] from TOML files
#[derive(Debug, Clone, Copy)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration from the default path.
    ///
    /// # Errors
    /// Returns an error if the file is missing or malformed
    pub fn load_default() -> Result<CardConfig, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads the configuration from the default path, falling back to defaults
    /// when the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed
    pub fn load_default_or_builtin() -> Result<CardConfig, ConfigError> {
        match Self::load_default() {
            Err(ConfigError::IoError(ref err)) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {DEFAULT_CONFIG_PATH}, using defaults");
                Ok(CardConfig::default())
            }
            other => other,
        }
    }

    /// Loads the configuration from the specified path.
    ///
    /// # Errors
    /// Returns an error if the file is missing or malformed
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<CardConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Parses the configuration from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid configuration
    pub fn load_from_str(content: &str) -> Result<CardConfig, ConfigError> {
        let config: CardConfig = toml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = ConfigLoader::load_from_str("").unwrap();
        assert_eq!(config, CardConfig::default());
        assert_eq!(config.bus.settle(), Duration::from_micros(15));
        assert_eq!(config.bus.ready_budget().attempts(), 500);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ConfigLoader::load_from_str(
            r#"
            [bus]
            settle_us = 20

            [pci]
            sysfs_path = "/sys/bus/pci/devices/0000:03:00.0"
            "#,
        )
        .unwrap();
        assert_eq!(config.bus.settle_us, 20);
        assert_eq!(config.bus.ready_budget, 500);
        assert_eq!(config.controller.poll_budget, 1000);
        assert_eq!(
            config.pci.sysfs_path.as_deref(),
            Some("/sys/bus/pci/devices/0000:03:00.0")
        );
    }

    #[test]
    fn pci_backend_and_reset_are_selectable() {
        let config = ConfigLoader::load_from_str(
            r#"
            [pci]
            backend = "vfio"
            reset_on_open = true
            "#,
        )
        .unwrap();
        assert_eq!(config.pci.backend, PciBackend::Vfio);
        assert!(config.pci.reset_on_open);
        assert_eq!(config.pci.bar_index, BAR_INDEX);

        let defaults = CardConfig::default();
        assert_eq!(defaults.pci.backend, PciBackend::Sysfs);
        assert!(!defaults.pci.reset_on_open);
        assert!(ConfigLoader::load_from_str("[pci]\nbackend = \"uio\"").is_err());
    }

    #[test]
    fn malformed_file_is_rejected() {
        let err = ConfigLoader::load_from_str("[bus]\nsettle_us = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ConfigLoader::load_from_path("/nonexistent/dagcfg.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
