//! Typed failures surfaced by the index.
//!
//! Negative lookups are not errors: `find` returns `None`. Routing to an
//! invalid expert is logged and counted but still reported as `None` to the
//! caller, so it never shows up here either.

/// Errors produced while configuring or rebuilding an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// A configuration value is out of its valid range.
    InvalidConfig(String),
    /// A background rebuild was cancelled before it produced a generation.
    RebuildCancelled,
    /// A background rebuild task panicked or was torn down.
    RebuildFailed(String),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::InvalidConfig(msg) => write!(f, "Invalid index configuration: {}", msg),
            IndexError::RebuildCancelled => write!(f, "Index rebuild cancelled"),
            IndexError::RebuildFailed(msg) => write!(f, "Index rebuild failed: {}", msg),
        }
    }
}

impl std::error::Error for IndexError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            IndexError::InvalidConfig("stage_count must be > 0".into()).to_string(),
            "Invalid index configuration: stage_count must be > 0"
        );
        assert_eq!(IndexError::RebuildCancelled.to_string(), "Index rebuild cancelled");
    }

    #[test]
    fn test_converts_into_anyhow() {
        let err: anyhow::Error = IndexError::RebuildFailed("join error".into()).into();
        assert!(err.downcast_ref::<IndexError>().is_some());
    }
}
