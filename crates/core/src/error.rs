use crate::{GroupId, SourceId};

/// Result alias that carries the custom [`MotionError`] type.
pub type Result<T> = std::result::Result<T, MotionError>;

/// Common error type for the core crate.
///
/// Every variant is returned synchronously from a configuration call and
/// leaves the engine state untouched. Runtime numeric problems inside the
/// per-frame loop never surface here; see [`ComponentFault`].
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("unknown source id {0}")]
    UnknownSourceId(SourceId),
    #[error("unknown group id {0}")]
    UnknownGroupId(GroupId),
    #[error("source {source_id} is not a member of group {group}")]
    SourceNotInGroup { source_id: SourceId, group: GroupId },
    #[error("source id {0} already exists")]
    DuplicateSourceId(SourceId),
    #[error("invalid formation parameters: {0}")]
    InvalidFormationParams(String),
    /// Out-of-range parameter or unknown enum name at the configuration
    /// boundary.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("malformed configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

impl MotionError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }

    pub fn formation<T: Into<String>>(msg: T) -> Self {
        Self::InvalidFormationParams(msg.into())
    }
}

impl From<&str> for MotionError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MotionError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Fault raised by a single motion component while computing its delta.
///
/// Faults are isolated at the component boundary: the faulting component
/// contributes nothing for the tick and the rest of the composition proceeds.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComponentFault {
    #[error("numeric degeneracy in {what}")]
    NumericDegeneracy { what: &'static str },
    #[error("non-finite value produced by {what}")]
    NonFinite { what: &'static str },
}

/// Delivery failure reported by a [`crate::Transport`]. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport rejected frame: {0}")]
    Rejected(String),
}
