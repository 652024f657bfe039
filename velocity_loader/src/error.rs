//! Error handling for module loading.

/// Velocity loader result type
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors that can occur while loading modules.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A module file failed parsing or verification
    #[error("Corrupt module file: {path}")]
    CorruptFile {
        path: String,
        #[source]
        source: velocity_elp::Error,
    },
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
    /// A module was not found on the module path
    #[error("Module not found: {0}")]
    ModuleNotFound(String),
    /// An error occurred in the object model or heap
    #[error(transparent)]
    ObjectError(#[from] velocity_object::Error),
    /// A signature failed to parse outside the context of a module file
    #[error(transparent)]
    SignError(#[from] velocity_elp::Error),
    /// A symbol did not resolve
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),
}

/// Convert [`std::io::Error` errors](std::io::Error) to [`IoError`](Error::IoError)
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IoError(error.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);
        assert_eq!(error.to_string(), "IO error: file not found");
    }

    #[test]
    fn test_corrupt_file_display() {
        let error = Error::CorruptFile {
            path: "hello.elp".to_string(),
            source: velocity_elp::Error::InvalidFileKind(0),
        };
        assert_eq!(error.to_string(), "Corrupt module file: hello.elp");
    }
}
