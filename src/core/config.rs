//! Configuration management for the plugin runtime.
//!
//! Handles loading and saving configuration from TOML files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::plugin::{ColorScheme, StyleLayer};

/// Default attribute used to scope plugin CSS to a host element.
pub const DEFAULT_SCOPE_ATTRIBUTE: &str = "data-lumina-plugin-scope";

/// Runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Style runtime settings
    pub style: StyleConfig,

    /// Theme runtime settings
    pub theme: ThemeConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Style runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Layer used when a registration does not name one
    pub default_layer: StyleLayer,

    /// Whether selector conflicts are reported
    pub detect_conflicts: bool,

    /// Attribute used to scope non-global plugin CSS
    pub scope_attribute: String,
}

/// Theme runtime settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    /// Color scheme active at startup
    pub mode: ColorScheme,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter (e.g. "warn", "lumina_plugins=debug")
    pub level: String,
}

impl RuntimeConfig {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.lumina-plugins.toml` in current directory
    /// 2. `~/.config/lumina/plugins.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let local_config = PathBuf::from(".lumina-plugins.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("plugins.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the global config file.
    pub fn save(&self) -> anyhow::Result<()> {
        let config_dir =
            Self::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        self.save_to(&config_dir.join("plugins.toml"))
    }

    /// Save configuration to a specific file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("lumina"))
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            default_layer: StyleLayer::Component,
            detect_conflicts: true,
            scope_attribute: DEFAULT_SCOPE_ATTRIBUTE.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.style.default_layer, StyleLayer::Component);
        assert!(config.style.detect_conflicts);
        assert_eq!(config.style.scope_attribute, DEFAULT_SCOPE_ATTRIBUTE);
        assert_eq!(config.theme.mode, ColorScheme::Light);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[style]"));
        assert!(toml_str.contains("default_layer = \"component\""));
        assert!(toml_str.contains("[theme]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [style]
            default_layer = "override"
            detect_conflicts = false

            [theme]
            mode = "dark"
        "#;

        let config: RuntimeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.style.default_layer, StyleLayer::Override);
        assert!(!config.style.detect_conflicts);
        // Unspecified keys keep their defaults
        assert_eq!(config.style.scope_attribute, DEFAULT_SCOPE_ATTRIBUTE);
        assert_eq!(config.theme.mode, ColorScheme::Dark);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_invalid_layer_rejected() {
        let toml_str = r#"
            [style]
            default_layer = "sideways"
        "#;
        assert!(toml::from_str::<RuntimeConfig>(toml_str).is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("plugins.toml");

        let mut config = RuntimeConfig::default();
        config.logging.level = "debug".to_string();
        config.save_to(&path).unwrap();

        let loaded = RuntimeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    #[serial_test::serial]
    fn test_load_prefers_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".lumina-plugins.toml"), "[theme]\nmode = \"dark\"\n").unwrap();

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let loaded = RuntimeConfig::load();
        std::env::set_current_dir(previous).unwrap();

        assert_eq!(loaded.unwrap().theme.mode, ColorScheme::Dark);
    }
}
