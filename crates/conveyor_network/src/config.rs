//! Timing and capacity configuration for a conveyor network.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConveyorError;

/// Protocol timing for every conveyor of a layout.
///
/// Durations are wall-clock and fixed; nothing adapts them at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConveyorConfig {
    /// Length of one `transfer_time` unit.
    #[serde(with = "duration_millis")]
    pub time_unit: Duration,

    /// How long a discovery source collects replies.
    #[serde(with = "duration_millis")]
    pub discovery_window: Duration,

    /// First wait for the next conveyor's load decision.
    #[serde(with = "duration_millis")]
    pub load_reply_timeout: Duration,

    /// Wait for the load decision on each retry.
    #[serde(with = "duration_millis")]
    pub retry_reply_timeout: Duration,

    /// Pause between load attempts.
    #[serde(with = "duration_millis")]
    pub retry_backoff: Duration,

    /// Load attempts after the first one before giving up on a hop.
    pub max_retries: u32,

    /// Mailbox size of each conveyor.
    pub mailbox_capacity: usize,

    /// Buffered events per conveyor before slow subscribers lag.
    pub event_capacity: usize,
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        Self {
            time_unit: Duration::from_secs(1),
            discovery_window: Duration::from_secs(1),
            load_reply_timeout: Duration::from_secs(1),
            retry_reply_timeout: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(5),
            max_retries: 2,
            mailbox_capacity: 256,
            event_capacity: 256,
        }
    }
}

impl ConveyorConfig {
    /// Time a conveyor spends moving a pallet across itself.
    pub fn hop_duration(&self, transfer_time: u32) -> Duration {
        self.time_unit.saturating_mul(transfer_time)
    }

    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConveyorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<ConveyorConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
