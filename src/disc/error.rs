//! Error types shared by the block sources and the volume parser

use thiserror::Error;

/// Result type for volume operations
pub type VolumeResult<T> = Result<T, VolumeError>;

/// Errors that can occur while reading a volume
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Invalid volume format: {0}")]
    Format(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Entry not found: {0}")]
    NotFound(String),
}

impl VolumeError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Whether this error comes from the underlying block source rather than
    /// from the on-disk data
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Device(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_message() {
        let err: VolumeError =
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read at block 7").into();
        assert!(err.is_io());
        assert_eq!(err.to_string(), "IO error: short read at block 7");
    }

    #[test]
    fn test_format_error_is_not_io() {
        let err = VolumeError::format("bad magic");
        assert!(!err.is_io());
        assert_eq!(err.to_string(), "Invalid volume format: bad magic");
    }
}
