use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn initialization(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Initialization {
                path: path.into(),
                source,
            }
            .into(),
        )
    }

    pub fn closed() -> Error {
        Error(ErrorKind::Closed.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("failed to initialize temp store at '{}': {source}", path.display())]
    Initialization {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("temp file store is closed")]
    Closed,

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_error_message() {
        let err = Error::initialization(
            "/tmp/work",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.contains("/tmp/work"));
        assert!(message.contains("denied"));
        assert!(matches!(err.kind(), ErrorKind::Initialization { .. }));
    }

    #[test]
    fn test_closed_error() {
        let err = Error::closed();
        assert!(matches!(err.kind(), ErrorKind::Closed));
        assert_eq!(err.to_string(), "temp file store is closed");
    }

    #[test]
    fn test_io_error_from_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err.into_kind(), ErrorKind::Io { .. }));
    }
}
