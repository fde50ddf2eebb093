//! Error type shared by every component of the library

/// Errors reported by the arbitration, cache, facade and control-surface
/// operations.
///
/// The variants mirror the error classes a control-surface user can observe.
/// Lower level bus failures are folded into [`Error::Io`] at the trait
/// boundary of the bus collaborators.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Unknown tag protocol, port, device or attribute
    #[error("not found: {0}")]
    NotFound(String),
    /// Malformed control-surface input or out of range argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The underlying provider does not implement the operation
    #[error("operation not supported")]
    Unsupported,
    /// The resource is owned by someone else right now
    #[error("resource busy")]
    Busy,
    /// The attribute does not allow this kind of access
    #[error("permission denied")]
    PermissionDenied,
    /// A bus transaction failed
    #[error("bus i/o error: {0}")]
    Io(String),
}

impl Error {
    /// Short, stable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not-found",
            Error::InvalidArgument(_) => "invalid-argument",
            Error::Unsupported => "unsupported",
            Error::Busy => "busy",
            Error::PermissionDenied => "permission-denied",
            Error::Io(_) => "io",
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

pub type Result<T> = core::result::Result<T, Error>;
