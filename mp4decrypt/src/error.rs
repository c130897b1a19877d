use crate::keys::KeySpecError;
use std::{io, path::Path};
use thiserror::Error;

/// The error type returned by decrypt operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Container(#[from] mp4crypt::Error),

    #[error("Malformed key material (expected 16 bytes got {0} bytes)")]
    MalformedKey(usize),

    #[error("Invalid key specification: {0}")]
    KeySpec(#[from] KeySpecError),

    #[error("No key found for {0}")]
    KeyNotFound(String),

    #[error("No keys provided")]
    NoKeys,

    #[error("No input data")]
    NoInputData,

    #[error("Data too large (maximum supported {} bytes)", u32::MAX)]
    DataTooLarge,

    #[error("No such file '{0}'")]
    NoSuchFile(String),

    #[error("Permission denied '{0}'")]
    PermissionDenied(String),

    #[error("Cannot open file '{path}': {source}")]
    CannotOpenFile { path: String, source: io::Error },
}

/// Result codes shared by the C ABI and the command line tool.
pub mod code {
    pub const SUCCESS: i32 = 0;
    pub const KID_HEX: i32 = 100;
    pub const TRACK_ID: i32 = 101;
    pub const KEY_HEX: i32 = 102;
    pub const SPLIT: i32 = 103;
    pub const FAILURE: i32 = -1;
    pub const INVALID_PARAMETERS: i32 = -3;
    pub const NO_SUCH_FILE: i32 = -4;
    pub const PERMISSION_DENIED: i32 = -5;
    pub const CANNOT_OPEN_FILE: i32 = -6;
    pub const WRITE_FAILED: i32 = -8;
    pub const READ_FAILED: i32 = -9;
    pub const INVALID_FORMAT: i32 = -10;
    pub const NOT_SUPPORTED: i32 = -18;
    pub const OUT_OF_RANGE: i32 = -21;
}

impl Error {
    /// Map a failure to open `path` onto the matching variant.
    pub(crate) fn open(path: &Path, source: io::Error) -> Self {
        let path = path.display().to_string();

        match source.kind() {
            io::ErrorKind::NotFound => Self::NoSuchFile(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::CannotOpenFile { path, source },
        }
    }

    /// Stable result code of this error.
    ///
    /// Key specification errors use positive sentinels, every other failure is negative.
    pub fn code(&self) -> i32 {
        match self {
            Self::Io(e) => io_code(e),
            Self::Container(e) => match e {
                mp4crypt::Error::Io(e) => io_code(e),
                mp4crypt::Error::Unsupported(_) => code::NOT_SUPPORTED,
                mp4crypt::Error::KeyUnwrap => code::INVALID_PARAMETERS,
                mp4crypt::Error::InvalidFormat(_)
                | mp4crypt::Error::InvalidIvSize { .. }
                | mp4crypt::Error::Padding => code::INVALID_FORMAT,
            },
            Self::KeySpec(e) => e.code(),
            Self::MalformedKey(_) | Self::KeyNotFound(_) | Self::NoKeys | Self::NoInputData => {
                code::INVALID_PARAMETERS
            }
            Self::DataTooLarge => code::OUT_OF_RANGE,
            Self::NoSuchFile(_) => code::NO_SUCH_FILE,
            Self::PermissionDenied(_) => code::PERMISSION_DENIED,
            Self::CannotOpenFile { .. } => code::CANNOT_OPEN_FILE,
        }
    }
}

fn io_code(error: &io::Error) -> i32 {
    match error.kind() {
        io::ErrorKind::WriteZero | io::ErrorKind::StorageFull | io::ErrorKind::BrokenPipe => {
            code::WRITE_FAILED
        }
        io::ErrorKind::UnexpectedEof => code::INVALID_FORMAT,
        _ => code::READ_FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::from(KeySpecError::Split).code(), 103);
        assert_eq!(Error::MalformedKey(3).code(), -3);
        assert_eq!(Error::DataTooLarge.code(), -21);
        assert_eq!(
            Error::from(mp4crypt::Error::Unsupported("fragmented marlin".to_owned())).code(),
            -18
        );
        assert_eq!(
            Error::from(mp4crypt::Error::InvalidFormat("truncated".to_owned())).code(),
            -10
        );
    }

    #[test]
    fn open_errors_by_kind() {
        let path = Path::new("missing.mp4");
        let error = Error::open(path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(&error, Error::NoSuchFile(x) if x == "missing.mp4"));
        assert_eq!(error.code(), -4);

        let error = Error::open(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(error.code(), -5);

        let error = Error::open(path, io::Error::other("busy"));
        assert_eq!(error.code(), -6);
    }
}
