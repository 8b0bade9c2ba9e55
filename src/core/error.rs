use thiserror::Error;

/// Errors from the versioned range allocation store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("range allocation {0} not found")]
    NotFound(String),

    #[error("range allocation {0} already exists")]
    AlreadyExists(String),

    #[error("range allocation {name} was modified: expected version {expected}, found {actual}")]
    Conflict {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("range allocation store unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the namespace API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("namespace {0} not found")]
    NotFound(String),

    #[error("namespace API unavailable: {0}")]
    Unavailable(String),

    #[error("invalid patch for namespace {name}: {reason}")]
    InvalidPatch { name: String, reason: String },
}

/// Errors parsing or constructing UID ranges, blocks and MCS labels
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("block not in the format \"<start>/<size>\" or \"<start>-<end>\": {0}")]
    BadBlockFormat(String),

    #[error("range not in the format \"<start>-<end>/<blockSize>\": {0}")]
    BadRangeFormat(String),

    #[error("start {start} must be less than end {end}")]
    StartAfterEnd { start: u32, end: u32 },

    #[error("block size must be a positive integer")]
    ZeroBlockSize,

    #[error("block size must be less than or equal to the range")]
    BlockSizeTooLarge,

    #[error("label range not in the format \"<prefix>/<numLabels>[,<maxCategory>]\": {0}")]
    BadLabelRangeFormat(String),

    #[error("label max value must be a positive integer")]
    ZeroCategories,

    #[error("label length must be a positive integer")]
    ZeroLabelLength,

    #[error("label not in the format \"<prefix>c<n>,c<n>\": {0}")]
    BadLabelFormat(String),
}

/// Errors from the in-memory block allocator
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("provided UID range is not in the valid range")]
    NotInRange,

    #[error("provided range is already allocated")]
    Allocated,

    #[error("range is full")]
    Full,
}

/// Errors loading controller configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("invalid range in config: {0}")]
    Range(#[from] RangeError),
}

/// Top-level controller error
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("namespace error: {0}")]
    Namespace(#[from] NamespaceError),

    #[error("range error: {0}")]
    Range(#[from] RangeError),

    #[error("allocator error: {0}")]
    Allocator(#[from] AllocatorError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("conflicting UID range; expected {expected}, got {actual}")]
    RangeMismatch { expected: String, actual: String },

    #[error("uid range exceeded")]
    RangeExceeded,

    #[error("the UID range {0} is full; you must widen the range in order to allocate more UIDs")]
    RangeFull(String),

    #[error("timed out waiting for initial repair")]
    RepairTimeout,
}

impl ControllerError {
    /// Whether retrying the same operation later can succeed without operator action
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::Store(StoreError::Conflict { .. })
            | ControllerError::Store(StoreError::Unavailable(_))
            | ControllerError::Store(StoreError::NotFound(_))
            | ControllerError::Namespace(NamespaceError::Unavailable(_)) => true,
            ControllerError::RangeMismatch { .. }
            | ControllerError::RangeExceeded
            | ControllerError::RangeFull(_)
            | ControllerError::Config(_) => false,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        let err = ControllerError::from(StoreError::Conflict {
            name: "scc-uid".to_string(),
            expected: 1,
            actual: 2,
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_mismatch_is_not_retryable() {
        let err = ControllerError::RangeMismatch {
            expected: "0-3/1".to_string(),
            actual: "0-7/1".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("expected 0-3/1"));
    }

    #[test]
    fn test_exhaustion_messages() {
        assert_eq!(ControllerError::RangeExceeded.to_string(), "uid range exceeded");
        let full = ControllerError::RangeFull("0-3/1".to_string());
        assert!(full.to_string().contains("you must widen the range"));
        assert!(!full.is_retryable());
    }
}
