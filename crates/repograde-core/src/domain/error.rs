//! Error taxonomy for technique execution and the progress channel.

/// Structured failure of a single technique run.
///
/// Failures are recorded per technique and surfaced as data in
/// [`CategoryResult`](super::CategoryResult); they never abort sibling
/// techniques or the category.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TechniqueError {
    #[error("technique timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("{0}")]
    Failed(String),

    #[error("technique panicked: {0}")]
    Panicked(String),
}

impl TechniqueError {
    /// Convenience constructor for technique-side failures.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors produced when constructing the progress channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("progress channel requires a running tokio runtime")]
    NoRuntime,
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_mentions_timeout() {
        let err = TechniqueError::Timeout { timeout_ms: 250 };
        assert!(err.to_string().contains("timeout"));
        assert!(err.to_string().contains("250ms"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_failed_carries_message_verbatim() {
        let err = TechniqueError::failed("analyzer crashed");
        assert_eq!(err.to_string(), "analyzer crashed");
        assert!(!err.is_timeout());
    }
}
