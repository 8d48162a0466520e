use crate::tag::Tag;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootError {
    #[error("Container registry has not been initialized")]
    NotReady,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt header: {0}")]
    CorruptHeader(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Destination buffer too small: need {required} bytes, got {provided}")]
    BufferTooSmall { required: usize, provided: usize },

    #[error("Out of resources: {0}")]
    OutOfResources(String),

    #[error("Container {0} is already registered")]
    DuplicateContainer(Tag),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BootError {
    /// True for failures that must never expose unvalidated bytes to a caller.
    ///
    /// Callers in the boot flow treat malformed layouts the same way as an
    /// explicit authentication failure.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            BootError::CorruptHeader(_)
                | BootError::Unsupported(_)
                | BootError::SecurityViolation(_)
        )
    }
}

impl From<toml::de::Error> for BootError {
    fn from(err: toml::de::Error) -> Self {
        BootError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_classification() {
        assert!(BootError::CorruptHeader("x".into()).is_integrity_failure());
        assert!(BootError::Unsupported("x".into()).is_integrity_failure());
        assert!(BootError::SecurityViolation("x".into()).is_integrity_failure());
        assert!(!BootError::NotFound("x".into()).is_integrity_failure());
        assert!(!BootError::NotReady.is_integrity_failure());
        assert!(!BootError::BufferTooSmall {
            required: 2,
            provided: 1
        }
        .is_integrity_failure());
    }

    #[test]
    fn test_buffer_too_small_message() {
        let err = BootError::BufferTooSmall {
            required: 4096,
            provided: 16,
        };
        assert_eq!(
            err.to_string(),
            "Destination buffer too small: need 4096 bytes, got 16"
        );
    }
}
