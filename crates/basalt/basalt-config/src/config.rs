use serde::Deserialize;
use std::path::{Path, PathBuf};

use basalt_arena::FileOptions;

#[derive(Deserialize, Debug)]
pub struct BusConfig {
    #[serde(default = "defaults::root")]
    pub root: String,
    #[serde(default = "defaults::file_size")]
    pub file_size: u64,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn root() -> String {
        "/dev/shm".into()
    }

    pub fn file_size() -> u64 {
        16 * 1024 * 1024
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            root: defaults::root(),
            file_size: defaults::file_size(),
            log_level: defaults::log_level(),
        }
    }
}

impl BusConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: BusConfig = toml::from_str(&text)?;
        Ok(config)
    }

    /// Arena-file creation options matching this config.
    pub fn file_options(&self) -> FileOptions {
        FileOptions { size: self.file_size, ..FileOptions::default() }
    }

    /// Absolute path for a bus file below the configured root.
    pub fn abs_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        PathBuf::from(&self.root).join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gets_defaults() {
        let cfg: BusConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.root, "/dev/shm");
        assert_eq!(cfg.file_size, 16 * 1024 * 1024);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg: BusConfig = toml::from_str(
            r#"
            root = "/tmp/bus"
            file_size = 4096
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.root, "/tmp/bus");
        assert_eq!(cfg.file_options().size, 4096);
        assert_eq!(cfg.abs_path("a.pubsub.a0"), PathBuf::from("/tmp/bus/a.pubsub.a0"));
    }
}
