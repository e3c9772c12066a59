use thiserror::Error;

/// Failure reported by an external capability.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    /// Permanent failure; retrying will not help.
    #[error("{0}")]
    Failed(String),

    /// Failure that may succeed on a later attempt (rate limit, dropped connection).
    #[error("transient: {0}")]
    Transient(String),

    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl CapabilityError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Whether a caller-level retry policy may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout { .. })
    }
}

/// One failed branch of a parallel join.
#[derive(Debug)]
pub struct BranchFailure {
    /// Declaration index of the branch within its parallel node.
    pub index: usize,
    /// Path of the branch root.
    pub branch: String,
    pub error: WeftError,
}

#[derive(Debug, Error)]
pub enum WeftError {
    // Template errors
    #[error("missing state key '{key}' referenced by template \"{template}\"")]
    MissingStateKey { key: String, template: String },

    // Leaf errors
    #[error("agent '{agent}' at {path} failed: {cause}")]
    AgentExecution {
        agent: String,
        path: String,
        #[source]
        cause: Box<WeftError>,
    },

    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    // Parallel join errors
    #[error("merge conflict at {path}: key '{key}' written by both '{first}' and '{second}'")]
    MergeConflict {
        path: String,
        key: String,
        first: String,
        second: String,
    },

    #[error("type mismatch at {path}: branch '{branch}' wrote {found} to key '{key}', which holds {expected}")]
    MergeTypeMismatch {
        path: String,
        key: String,
        branch: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{} of {total} parallel branches failed at {path}: {}", .failures.len(), summarize(.failures))]
    AggregateBranch {
        path: String,
        total: usize,
        failures: Vec<BranchFailure>,
    },

    // Construction errors
    #[error("loop config error: {0}")]
    LoopConfig(String),

    #[error("workflow build error: {0}")]
    Build(String),

    #[error("run cancelled before {path}")]
    Cancelled { path: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn summarize(failures: &[BranchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.branch, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl WeftError {
    /// Node path the failure is attributed to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::AgentExecution { path, .. }
            | Self::MergeConflict { path, .. }
            | Self::MergeTypeMismatch { path, .. }
            | Self::AggregateBranch { path, .. }
            | Self::Cancelled { path } => Some(path),
            _ => None,
        }
    }

    /// Strip `AgentExecution` wrappers down to the underlying cause.
    pub fn root_cause(&self) -> &WeftError {
        match self {
            Self::AgentExecution { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// True if this error, or any branch failure it aggregates, is a missing state key.
    pub fn is_missing_state_key(&self) -> bool {
        match self.root_cause() {
            Self::MissingStateKey { .. } => true,
            Self::AggregateBranch { failures, .. } => {
                failures.iter().any(|f| f.error.is_missing_state_key())
            }
            _ => false,
        }
    }

    /// True if the root cause is a capability timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Capability(CapabilityError::Timeout { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
