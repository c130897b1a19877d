use thiserror::Error;

/// The errors that may occur while parsing or decrypting mp4 data.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("invalid mp4 format: {0}")]
    InvalidFormat(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid IV size: expected {expected} bytes, got {actual} bytes")]
    InvalidIvSize { expected: usize, actual: usize },

    #[error("invalid padding in decrypted data")]
    Padding,

    #[error("key unwrap integrity check failed")]
    KeyUnwrap,
}

impl Error {
    pub(crate) fn invalid_format<T: Into<String>>(reason: T) -> Self {
        Self::InvalidFormat(reason.into())
    }

    /// Returns true if the error was caused by malformed or truncated data.
    pub fn is_format_err(&self) -> bool {
        matches!(self, Self::InvalidFormat(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        // A reader running out of bytes inside a box means the box is truncated.
        if value.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::InvalidFormat(format!("unexpected end of data ({value})"))
        } else {
            Self::Io(value)
        }
    }
}
