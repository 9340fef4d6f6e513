//! Configuration file handling for ledm-scan

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default scanner host
    pub host: Option<String>,
    /// Default scanner port
    pub port: Option<u16>,
    /// Directory scans are written to
    pub output_dir: Option<PathBuf>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("ledm-scan");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(
        &self,
        host: Option<&str>,
        port: Option<u16>,
        no_color: bool,
    ) -> MergedConfig {
        MergedConfig {
            host: host
                .map(String::from)
                .or_else(|| self.host.clone())
                .unwrap_or_else(|| "localhost".to_string()),
            port: port.or(self.port).unwrap_or(80),
            output_dir: self.output_dir.clone(),
            no_color: no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub host: String,
    pub port: u16,
    pub output_dir: Option<PathBuf>,
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(
            r#"
host = "printer.local"
port = 8080
output_dir = "/home/me/scans"
"#,
        )
        .unwrap();

        assert_eq!(config.host.as_deref(), Some("printer.local"));
        assert_eq!(config.port, Some(8080));
        assert_eq!(config.output_dir, Some(PathBuf::from("/home/me/scans")));
        assert_eq!(config.no_color, None);
    }

    #[test]
    fn test_args_override_file() {
        let config = Config {
            host: Some("printer.local".to_string()),
            port: Some(8080),
            output_dir: None,
            no_color: Some(true),
        };

        let merged = config.merge_with_args(Some("10.0.0.9"), None, false);
        assert_eq!(merged.host, "10.0.0.9");
        assert_eq!(merged.port, 8080);
        assert!(merged.no_color);

        let merged = Config::default().merge_with_args(None, None, false);
        assert_eq!(merged.host, "localhost");
        assert_eq!(merged.port, 80);
        assert!(!merged.no_color);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "host = \"scanner\"\nno_color = true\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.host.as_deref(), Some("scanner"));
        assert_eq!(config.no_color, Some(true));

        assert!(Config::load_from(&dir.path().join("missing.toml")).is_err());
    }
}
