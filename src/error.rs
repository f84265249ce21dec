use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::dispatch::DispatchError;
use crate::layout::LayoutError;
use crate::mangle::DemangleError;
use crate::symbols::CodecError;

/// Unified error type for the interop core.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Demangle(DemangleError),
    Layout(LayoutError),
    Dispatch(DispatchError),
    Codec(CodecError),
}

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Demangle(err) => write!(f, "demangle error: {err}"),
            Error::Layout(err) => write!(f, "layout error: {err}"),
            Error::Dispatch(err) => write!(f, "dispatch error: {err}"),
            Error::Codec(err) => write!(f, "symbol table error: {err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Demangle(err) => Some(err),
            Error::Layout(err) => Some(err),
            Error::Dispatch(err) => Some(err),
            Error::Codec(err) => Some(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<DemangleError> for Error {
    fn from(error: DemangleError) -> Self {
        Error::Demangle(error)
    }
}

impl From<LayoutError> for Error {
    fn from(error: LayoutError) -> Self {
        Error::Layout(error)
    }
}

impl From<DispatchError> for Error {
    fn from(error: DispatchError) -> Self {
        Error::Dispatch(error)
    }
}

impl From<CodecError> for Error {
    fn from(error: CodecError) -> Self {
        Error::Codec(error)
    }
}
