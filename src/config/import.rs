use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// Upper bound for a single provider import attempt (unit: milliseconds).
    /// An attempt that exceeds it counts as a transport failure.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Capacity of the import lifecycle broadcast channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout_ms == 0 {
            return Err(Error::InvalidConfig("import.attempt_timeout_ms must be > 0".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "import.event_channel_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}
fn default_event_channel_capacity() -> usize {
    256
}
