use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_ROOT_PATH;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Store node under which capability types are published
    #[serde(default = "default_root_path")]
    pub root_path: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
        }
    }
}

impl WatchConfig {
    /// Validates watch configuration
    /// # Errors
    /// Returns `Error::InvalidConfig` when the root is not an absolute store path
    pub fn validate(&self) -> Result<()> {
        if !self.root_path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "watch.root_path must be absolute, got {:?}",
                self.root_path
            )));
        }
        if self.root_path.len() > 1 && self.root_path.ends_with('/') {
            return Err(Error::InvalidConfig(format!(
                "watch.root_path must not end with '/', got {:?}",
                self.root_path
            )));
        }
        Ok(())
    }
}

fn default_root_path() -> String {
    DEFAULT_ROOT_PATH.to_string()
}
