//! Cartographer project configuration
//!
//! Defines the optional `cartographer.toml` file. Every field has a default,
//! so an empty file (or no file at all) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "cartographer.toml";

/// Name of the local copy of the remote map inside the data directory
pub const LOCAL_MAP_FILE: &str = "map.json";

/// Game world a map database belongs to
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum World {
    #[default]
    Gemstone,
    Dragonrealms,
}

impl World {
    /// Published map for this world
    pub fn remote_map(&self) -> &'static str {
        match self {
            World::Gemstone => {
                "https://github.com/FarFigNewGut/lich_repo_mirror/raw/main/gs_map/gs_map.json"
            }
            World::Dragonrealms => {
                "https://raw.githubusercontent.com/FarFigNewGut/lich_repo_mirror/refs/heads/main/dr_map/dr_map.json"
            }
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            World::Gemstone => "gs",
            World::Dragonrealms => "dr",
        }
    }
}

/// The project configuration file (cartographer.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// World to work on
    #[serde(default)]
    pub world: World,

    /// Where downloaded maps and the default tree live
    /// (default: `{cache dir}/cartographer/{world}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Override for the world's published map URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_map: Option<String>,

    /// External script formatter
    #[serde(default)]
    pub formatter: FormatterConfig,
}

impl ProjectConfig {
    /// Parse a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ProjectConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` when given, else `cartographer.toml` in `dir` if present,
    /// else defaults
    pub fn discover(path: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = dir.join(CONFIG_FILE);
        if default_path.exists() {
            tracing::debug!("Using config {}", default_path.display());
            return Self::load(&default_path);
        }
        Ok(Self::default())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("cartographer")
                .join(self.world.short_name())
        })
    }

    /// Local copy of the remote map
    pub fn local_map(&self) -> PathBuf {
        self.data_dir().join(LOCAL_MAP_FILE)
    }

    pub fn remote_map_url(&self) -> String {
        self.remote_map
            .clone()
            .unwrap_or_else(|| self.world.remote_map().to_string())
    }
}

/// External formatter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatterConfig {
    /// Program to run (default: standardrb)
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the file list
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Maximum files per invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-invocation timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_program() -> String {
    "standardrb".to_string()
}

fn default_args() -> Vec<String> {
    vec!["--fix-unsafely".to_string()]
}

fn default_batch_size() -> usize {
    500
}

fn default_timeout_secs() -> u64 {
    120
}

impl FormatterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ProjectConfig::default();
        assert_eq!(config.world, World::Gemstone);
        assert_eq!(config.formatter.program, "standardrb");
        assert_eq!(config.formatter.args, vec!["--fix-unsafely"]);
        assert_eq!(config.formatter.batch_size, 500);
        assert!(config.data_dir().ends_with("cartographer/gs"));
        assert_eq!(config.remote_map_url(), World::Gemstone.remote_map());
    }

    #[test]
    fn test_partial_toml() {
        let config: ProjectConfig = toml::from_str(
            r#"
            world = "dragonrealms"
            data_dir = "/srv/maps"

            [formatter]
            batch_size = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.world, World::Dragonrealms);
        assert_eq!(config.local_map(), PathBuf::from("/srv/maps/map.json"));
        assert_eq!(config.formatter.batch_size, 50);
        assert_eq!(config.formatter.program, "standardrb");
        assert_eq!(config.formatter.timeout(), Duration::from_secs(120));
        assert!(config.remote_map_url().contains("dr_map"));
    }

    #[test]
    fn test_discover() {
        let temp_dir = TempDir::new().unwrap();
        let config = ProjectConfig::discover(None, temp_dir.path()).unwrap();
        assert_eq!(config.world, World::Gemstone);

        std::fs::write(
            temp_dir.path().join(CONFIG_FILE),
            "remote_map = \"http://localhost/map.json\"\n",
        )
        .unwrap();
        let config = ProjectConfig::discover(None, temp_dir.path()).unwrap();
        assert_eq!(config.remote_map_url(), "http://localhost/map.json");

        let broken = temp_dir.path().join("broken.toml");
        std::fs::write(&broken, "world = ").unwrap();
        assert!(matches!(
            ProjectConfig::discover(Some(&broken), temp_dir.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
