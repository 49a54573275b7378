use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubgenError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{stage} subprocess failed: {message}")]
    Subprocess { stage: String, message: String },

    #[error("Translation provider error: {0}")]
    Provider(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SubgenError {
    /// Build a stage-scoped subprocess error.
    pub fn subprocess(stage: impl Into<String>, message: impl Into<String>) -> Self {
        SubgenError::Subprocess {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// True for the cancellation outcome, which is terminal but not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SubgenError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, SubgenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subprocess_error_names_stage() {
        let err = SubgenError::subprocess("extraction", "exit code 1");
        assert_eq!(err.to_string(), "extraction subprocess failed: exit code 1");
    }

    #[test]
    fn test_is_cancelled() {
        assert!(SubgenError::Cancelled.is_cancelled());
        assert!(!SubgenError::Provider("rate limit".to_string()).is_cancelled());
    }
}
