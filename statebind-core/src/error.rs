//! Core error types.

use thiserror::Error;

/// Errors from building a machine or a service.
///
/// Runtime dispatch never fails: unknown events, unresolved guard/action/effect
/// names and guards that reject every candidate are all silent no-ops.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("unknown state: '{state}'")]
    UnknownState { state: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns a stable error code suitable for CLI output and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::InvalidGuard { .. } => "INVALID_GUARD",
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CoreError::InvalidDefinition {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CoreError::invalid("boom").error_code(),
            "INVALID_DEFINITION"
        );
        assert_eq!(
            CoreError::UnknownState {
                state: "nowhere".to_string()
            }
            .error_code(),
            "UNKNOWN_STATE"
        );
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::UnknownState {
            state: "nowhere".to_string(),
        };
        assert_eq!(err.to_string(), "unknown state: 'nowhere'");
    }
}
