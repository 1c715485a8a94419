//! Configuration loaded from `<root>/.skelgraph/config.toml`.
//!
//! Every key is optional. A missing file yields the defaults; a file that
//! exists but does not parse is an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory under the scan root holding config and the graph snapshot.
pub const STATE_DIR: &str = ".skelgraph";

/// File name of the config inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SkelConfig {
    pub scan: ScanConfig,
    pub pipeline: PipelineConfig,
    pub write: WriteConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// File suffixes (without the dot) treated as source modules.
    pub extensions: Vec<String>,
    pub follow_links: bool,
    pub respect_gitignore: bool,
    pub include_hidden: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["py".to_string()],
            follow_links: false,
            respect_gitignore: true,
            include_hidden: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on concurrent extraction and write units.
    pub workers: usize,
    pub read_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            read_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WriteConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshot path, relative to the state directory unless absolute.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("graph.bin"),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl SkelConfig {
    /// Load config from a TOML file, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SkelConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<root>/.skelgraph/config.toml`.
    pub fn load_for_root(root: &Path) -> Result<Self, ConfigError> {
        Self::load(&root.join(STATE_DIR).join(CONFIG_FILE))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "scan.extensions must name at least one suffix".to_string(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the snapshot path against the state directory.
    pub fn resolve_store_path(&self, state_dir: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            state_dir.join(&self.store.path)
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.write.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SkelConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, SkelConfig::default());
        assert_eq!(config.scan.extensions, vec!["py".to_string()]);
        assert!(config.pipeline.workers >= 1);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[scan]\nextensions = [\"py\", \"pyi\"]\n\n[write]\nmax_retries = 7\n",
        )
        .unwrap();

        let config = SkelConfig::load(&path).unwrap();
        assert_eq!(config.scan.extensions, vec!["py", "pyi"]);
        assert!(config.scan.respect_gitignore);
        assert_eq!(config.write.max_retries, 7);
        assert_eq!(config.write.timeout_ms, 30_000);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan\nextensions = 3").unwrap();
        assert!(matches!(
            SkelConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline]\nworkers = 0\n").unwrap();
        assert!(matches!(SkelConfig::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_resolve_store_path() {
        let config = SkelConfig::default();
        let state = Path::new("/proj/.skelgraph");
        assert_eq!(
            config.resolve_store_path(state),
            PathBuf::from("/proj/.skelgraph/graph.bin")
        );

        let mut config = SkelConfig::default();
        config.store.path = PathBuf::from("/var/graph.bin");
        assert_eq!(
            config.resolve_store_path(state),
            PathBuf::from("/var/graph.bin")
        );
    }
}
