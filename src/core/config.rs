//! Controller configuration
//!
//! Loaded from TOML. Only `uid_range` is required:
//!
//! ```toml
//! uid_range = "1000000000-1999999999/10000"
//! mcs_range = "s0:/2"
//! mcs_labels_per_project = 5
//! ```

use crate::core::controller::ControllerOptions;
use crate::core::error::ConfigError;
use crate::core::mcs::{default_label_allocation, LabelAllocationFn, LabelRange};
use crate::core::queue::ExponentialBackoff;
use crate::core::uid::UidRange;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Range to allocate from, `<start>-<end>/<blockSize>`
    #[validate(custom(function = "validate_uid_range"))]
    pub uid_range: String,

    /// MCS label range, `<prefix>/<numLabels>[,<maxCategory>]`
    #[validate(custom(function = "validate_label_range"))]
    pub mcs_range: Option<String>,

    /// UID blocks sharing one label offset
    #[validate(range(min = 1))]
    pub mcs_labels_per_project: u32,

    #[validate(range(min = 1))]
    pub periodic_repair_interval_secs: u64,

    #[validate(range(min = 1))]
    pub repair_poll_interval_secs: u64,

    #[validate(range(min = 1))]
    pub repair_timeout_secs: u64,

    #[validate(range(min = 1))]
    pub resync_interval_secs: u64,

    #[validate(range(min = 1))]
    pub backoff_base_millis: u64,

    #[validate(range(min = 1))]
    pub backoff_max_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            uid_range: String::new(),
            mcs_range: None,
            mcs_labels_per_project: 5,
            periodic_repair_interval_secs: 8 * 60 * 60,
            repair_poll_interval_secs: 10,
            repair_timeout_secs: 5 * 60,
            resync_interval_secs: 10 * 60,
            backoff_base_millis: 5,
            backoff_max_secs: 1000,
        }
    }
}

fn validate_uid_range(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<UidRange>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("uid_range"))
}

fn validate_label_range(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<LabelRange>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("mcs_range"))
}

impl ControllerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn uid_range(&self) -> Result<UidRange, ConfigError> {
        Ok(self.uid_range.parse()?)
    }

    pub fn label_range(&self) -> Result<Option<LabelRange>, ConfigError> {
        match &self.mcs_range {
            Some(range) => Ok(Some(range.parse()?)),
            None => Ok(None),
        }
    }

    /// Label derivation for the configured ranges; `None` without `mcs_range`
    pub fn label_allocation(&self) -> Result<Option<LabelAllocationFn>, ConfigError> {
        let uids = self.uid_range()?;
        Ok(self
            .label_range()?
            .map(|labels| default_label_allocation(uids, labels, self.mcs_labels_per_project)))
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.backoff_base_millis),
            Duration::from_secs(self.backoff_max_secs),
        )
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            periodic_repair_interval: Duration::from_secs(self.periodic_repair_interval_secs),
            repair_poll_interval: Duration::from_secs(self.repair_poll_interval_secs),
            repair_timeout: Duration::from_secs(self.repair_timeout_secs),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
        }
    }
}
